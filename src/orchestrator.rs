use crate::audio_source::AudioSource;
use crate::auth::{CachedTokenProvider, HttpTokenProvider, TokenProvider};
use crate::config::SessionConfig;
use crate::dispatcher::{result_channels, FinalResult, MessageDispatcher, RecognitionEvent, ResultReceivers};
use crate::error::{Result, SessionError};
use crate::protocol::{Frame, FrameEncoder, FrameKind};
use crate::session::{RecognitionMode, SessionContext};
use crate::transport::{
    Connection, Connector, HandshakeHeaders, InboundMessage, Transport, TransportError,
    WsConnector,
};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Idle,
    Authenticating,
    Connecting,
    AwaitingAck,
    Streaming,
    Draining,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Authenticating)
            | (Authenticating, Connecting)
            | (Connecting, AwaitingAck)
            | (AwaitingAck, Streaming)
            | (Streaming, Draining)
            | (Draining, Completed) => true,
            _ => false,
        }
    }
}

/// What the caller wants recognized
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub locale: String,
    pub mode: RecognitionMode,
}

impl RecognitionRequest {
    pub fn new(locale: impl Into<String>, mode: RecognitionMode) -> Self {
        Self {
            locale: locale.into(),
            mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub conversation_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub frames_sent: usize,
    pub body_frames: usize,
    pub audio_bytes_sent: usize,
    pub partial_results: usize,
    pub final_result: Option<FinalResult>,
}

/// Signals from the inbound delivery task to the send loop
#[derive(Debug)]
enum InboundSignal {
    Event(RecognitionEvent),
    Closed,
}

struct LiveConnection {
    transport: Box<dyn Transport>,
    signals: mpsc::UnboundedReceiver<InboundSignal>,
    delivery: JoinHandle<()>,
}

#[derive(Default)]
struct Progress {
    frames_sent: usize,
    body_frames: usize,
    audio_bytes_sent: usize,
    partial_results: usize,
    final_result: Option<FinalResult>,
    server_closed: bool,
}

impl Progress {
    fn absorb(&mut self, signal: InboundSignal) {
        match signal {
            InboundSignal::Event(RecognitionEvent::Partial(_)) => self.partial_results += 1,
            InboundSignal::Event(RecognitionEvent::Final(result)) => {
                self.final_result.get_or_insert(result);
            }
            InboundSignal::Event(RecognitionEvent::Unrecognized) => {}
            InboundSignal::Closed => self.server_closed = true,
        }
    }
}

fn spawn_delivery(
    mut inbound: mpsc::Receiver<InboundMessage>,
    dispatcher: MessageDispatcher,
    signals: mpsc::UnboundedSender<InboundSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            let event = dispatcher.route_event(&message);
            let is_final = matches!(event, RecognitionEvent::Final(_));
            if signals.send(InboundSignal::Event(event)).is_err() {
                break;
            }
            if is_final {
                log::debug!("Session: final result received, stopping delivery");
                return;
            }
        }
        let _ = signals.send(InboundSignal::Closed);
    })
}

/// Drives one recognition request from token fetch to close.
///
/// An instance runs at most one session; a second `run` fails with `AlreadyStarted`.
pub struct RecognitionSession<P, C> {
    config: SessionConfig,
    tokens: P,
    connector: C,
    encoder: FrameEncoder,
    dispatcher: MessageDispatcher,
    state: SessionState,
    history: Vec<SessionState>,
}

impl RecognitionSession<CachedTokenProvider<HttpTokenProvider>, WsConnector> {
    /// Session wired to the real token endpoint and WebSocket transport
    pub fn websocket(config: SessionConfig) -> Result<(Self, ResultReceivers)> {
        let tokens = CachedTokenProvider::new(
            HttpTokenProvider::new(config.token_url.clone())?,
            config.token_ttl,
        );
        let connector = WsConnector::new(config.connect_timeout);
        Ok(Self::new(config, tokens, connector))
    }
}

impl<P: TokenProvider, C: Connector> RecognitionSession<P, C> {
    pub fn new(config: SessionConfig, tokens: P, connector: C) -> (Self, ResultReceivers) {
        let (dispatcher, receivers) = result_channels();
        let encoder = FrameEncoder::new(config.network_type.clone());
        let session = Self {
            config,
            tokens,
            connector,
            encoder,
            dispatcher,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
        };
        (session, receivers)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state visited so far, starting with `Idle`
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        log::info!("Session: {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Run the whole session. The audio source is consumed and released on return.
    pub async fn run<A: AudioSource>(
        &mut self,
        mut audio: A,
        request: &RecognitionRequest,
        secret: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionSummary> {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyStarted);
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let mut live: Option<LiveConnection> = None;
        let mut progress = Progress::default();

        let result = self
            .drive(&mut audio, request, secret, cancel, &mut live, &mut progress)
            .await;

        if let Err(ref e) = result {
            log::error!("Session: failed in state {}: {}", self.state, e);
            self.transition(SessionState::Failed);
        }

        if let Some(mut connection) = live.take() {
            if let Err(e) = connection.transport.close().await {
                log::warn!("Session: error while closing connection: {}", e);
            }
            connection.delivery.abort();
        }
        drop(audio);

        let conversation_id = result?;
        let summary = SessionSummary {
            conversation_id,
            started_at,
            elapsed: start.elapsed(),
            frames_sent: progress.frames_sent,
            body_frames: progress.body_frames,
            audio_bytes_sent: progress.audio_bytes_sent,
            partial_results: progress.partial_results,
            final_result: progress.final_result,
        };
        log::info!(
            "Session: {} complete - {} frames, {} audio bytes, {} partials, final: {}",
            summary.conversation_id,
            summary.frames_sent,
            summary.audio_bytes_sent,
            summary.partial_results,
            summary.final_result.is_some()
        );
        Ok(summary)
    }

    async fn drive<A: AudioSource>(
        &mut self,
        audio: &mut A,
        request: &RecognitionRequest,
        secret: &str,
        cancel: &CancellationToken,
        live: &mut Option<LiveConnection>,
        progress: &mut Progress,
    ) -> Result<String> {
        self.config.validate()?;

        // Read ahead so an empty source never opens a connection
        let Some(first_chunk) = audio.next_chunk().await? else {
            return Err(SessionError::EmptyAudio);
        };

        self.transition(SessionState::Authenticating);
        let token = tokio::select! {
            result = self.tokens.fetch_token(secret) => result?,
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
        };

        self.transition(SessionState::Connecting);
        let context = SessionContext::new(request.locale.clone(), request.mode, &self.config);
        let headers = HandshakeHeaders::new(&context, &token, &self.config)?;
        let context_frame = self.encoder.encode_context(&context)?;
        let connection = self
            .connect_with_retry(&context.endpoint, &headers, cancel)
            .await?;

        let (signal_tx, signals) = mpsc::unbounded_channel();
        let delivery = spawn_delivery(connection.inbound, self.dispatcher.clone(), signal_tx);
        let connection = live.insert(LiveConnection {
            transport: connection.transport,
            signals,
            delivery,
        });

        send_frame(connection, &context_frame, cancel, progress).await?;
        self.transition(SessionState::AwaitingAck);

        if let Some(ack_timeout) = self.config.ack_timeout {
            tokio::select! {
                signal = connection.signals.recv() => match signal {
                    Some(InboundSignal::Event(event)) => {
                        log::debug!("Session: server acknowledged with {:?}", event.kind());
                        progress.absorb(InboundSignal::Event(event));
                    }
                    Some(InboundSignal::Closed) | None => {
                        return Err(TransportError::Closed.into());
                    }
                },
                _ = tokio::time::sleep(ack_timeout) => {
                    return Err(SessionError::AckTimeout(ack_timeout));
                }
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            }
        }

        self.transition(SessionState::Streaming);
        let start_frame = self.encoder.encode_audio_start(&context, &first_chunk)?;
        send_frame(connection, &start_frame, cancel, progress).await?;
        progress.audio_bytes_sent += first_chunk.len();
        drop(first_chunk);

        loop {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            while let Ok(signal) = connection.signals.try_recv() {
                progress.absorb(signal);
            }
            if progress.server_closed {
                log::warn!("Session: server closed the connection while streaming");
                return Err(TransportError::Closed.into());
            }

            let Some(chunk) = audio.next_chunk().await? else {
                break;
            };
            let frame = self.encoder.encode_audio_body(&context, &chunk)?;
            send_frame(connection, &frame, cancel, progress).await?;
            progress.body_frames += 1;
            progress.audio_bytes_sent += chunk.len();
        }

        self.transition(SessionState::Draining);
        let end_frame = self.encoder.encode_audio_end(&context)?;
        send_frame(connection, &end_frame, cancel, progress).await?;
        self.transition(SessionState::Completed);

        self.await_final(connection, cancel, progress).await;
        Ok(context.conversation_id)
    }

    async fn connect_with_retry(
        &self,
        endpoint: &str,
        headers: &HandshakeHeaders,
        cancel: &CancellationToken,
    ) -> Result<Connection> {
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                result = self.connector.connect(endpoint, headers) => result,
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            };

            match result {
                Ok(connection) => return Ok(connection),
                Err(e @ (TransportError::Connection(_) | TransportError::Timeout(_)))
                    if attempt < self.config.connect_attempts =>
                {
                    log::warn!(
                        "Session: connect attempt {}/{} failed: {} (retrying in {:?})",
                        attempt,
                        self.config.connect_attempts,
                        e,
                        backoff
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                    }
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Wait for the terminal result; a missing one is logged, not fatal.
    async fn await_final(
        &self,
        connection: &mut LiveConnection,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) {
        let deadline = tokio::time::Instant::now() + self.config.final_result_timeout;
        while progress.final_result.is_none() && !progress.server_closed {
            tokio::select! {
                signal = connection.signals.recv() => match signal {
                    Some(signal) => progress.absorb(signal),
                    None => progress.server_closed = true,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    log::warn!(
                        "Session: no final result within {:?}",
                        self.config.final_result_timeout
                    );
                    return;
                }
                _ = cancel.cancelled() => {
                    log::info!("Session: cancelled while waiting for final result");
                    return;
                }
            }
        }
        if progress.final_result.is_none() {
            log::warn!("Session: connection closed before a final result arrived");
        }
    }
}

async fn send_frame(
    connection: &mut LiveConnection,
    frame: &Frame,
    cancel: &CancellationToken,
    progress: &mut Progress,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(SessionError::Cancelled);
    }
    connection.transport.send(frame).await?;
    progress.frames_sent += 1;
    if frame.kind() != FrameKind::AudioBody {
        log::debug!(
            "Session: sent {} ({} bytes)",
            frame.kind().label(),
            frame.as_bytes().len()
        );
    }
    Ok(())
}
