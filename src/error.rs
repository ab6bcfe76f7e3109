use crate::audio_source::AudioSourceError;
use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::protocol::EncodeError;
use crate::transport::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Fatal outcomes of a recognition session.
///
/// Unrecognized server messages never surface here; the dispatcher drops them.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Frame encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Audio source error: {0}")]
    AudioSource(#[from] AudioSourceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audio source produced no data")]
    EmptyAudio,

    #[error("No server acknowledgment within {0:?}")]
    AckTimeout(std::time::Duration),

    #[error("Session was cancelled")]
    Cancelled,

    #[error("Session already started")]
    AlreadyStarted,
}

impl SessionError {
    /// Whether this failure happened while opening the connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(TransportError::Connection(_))
                | SessionError::Transport(TransportError::Timeout(_))
        )
    }

    /// Whether this failure happened while writing frames to an open connection.
    pub fn is_send_error(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(TransportError::Send(_))
                | SessionError::Transport(TransportError::Closed)
        )
    }
}
