//! # speech-stream
//!
//! Client for streaming speech audio to a remote recognition service over a
//! WebSocket and receiving partial and final transcriptions.
//!
//! ```rust,no_run
//! use speech_stream::{
//!     audio_source::ChunkedReader, config::SessionConfig, RecognitionMode, RecognitionRequest,
//!     RecognitionSession,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> speech_stream::Result<()> {
//! let config = SessionConfig::default();
//! let audio = ChunkedReader::open("hello.wav", config.chunk_size).await?;
//! let (mut session, mut results) = RecognitionSession::websocket(config)?;
//!
//! tokio::spawn(async move {
//!     while let Some(partial) = results.partials.recv().await {
//!         println!("… {}", partial.display_text);
//!     }
//! });
//!
//! let request = RecognitionRequest::new("en-US", RecognitionMode::ShortPhrase);
//! let summary = session
//!     .run(audio, &request, "subscription-key", &CancellationToken::new())
//!     .await?;
//! println!("{:?}", summary.final_result);
//! # Ok(())
//! # }
//! ```

pub mod audio_source;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{Result, SessionError};
pub use orchestrator::{RecognitionRequest, RecognitionSession, SessionState, SessionSummary};
pub use session::{RecognitionMode, SessionContext};
