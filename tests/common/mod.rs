//! In-memory connector, transport and token provider for exercising the
//! session state machine without a network.

#![allow(dead_code)]

use async_trait::async_trait;
use speech_stream::audio_source::{AudioSource, AudioSourceError};
use speech_stream::auth::{AccessToken, AuthError, TokenProvider};
use speech_stream::protocol::{Frame, FrameKind};
use speech_stream::transport::{
    Connection, Connector, HandshakeHeaders, InboundMessage, Transport, TransportError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const FINAL_HELLO: &str =
    r#"{"RecognitionStatus":"Success","Phrases":[{"DisplayText":"hello world","Confidence":0.91}]}"#;

pub struct StaticTokens;

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn fetch_token(&self, secret: &str) -> Result<AccessToken, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::MissingSecret);
        }
        Ok(AccessToken::new("test-token"))
    }
}

pub struct RejectingTokens;

#[async_trait]
impl TokenProvider for RejectingTokens {
    async fn fetch_token(&self, _secret: &str) -> Result<AccessToken, AuthError> {
        Err(AuthError::Rejected {
            status: 401,
            message: "Access denied".to_string(),
        })
    }
}

/// Everything the mock observed, shared with the test body
#[derive(Default)]
pub struct Recorder {
    pub frames: Mutex<Vec<Frame>>,
    pub headers: Mutex<Vec<HandshakeHeaders>>,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Recorder {
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<FrameKind> {
        self.frames().iter().map(Frame::kind).collect()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

/// Scripted server behaviour
#[derive(Clone, Default)]
pub struct Script {
    /// Messages pushed to the client right after a frame of the given kind is sent
    pub replies: HashMap<FrameKind, Vec<InboundMessage>>,
    /// Number of initial connect attempts that fail
    pub failing_connects: usize,
    /// Never complete the handshake
    pub hang_on_connect: bool,
    /// Fail the send with this 0-based frame index
    pub fail_send_at: Option<usize>,
    /// Drop the inbound stream after the end frame without replying
    pub hang_up_after_end: bool,
}

impl Script {
    pub fn reply(mut self, kind: FrameKind, message: &str) -> Self {
        self.replies
            .entry(kind)
            .or_default()
            .push(InboundMessage::Text(message.to_string()));
        self
    }

    pub fn final_on_end(self) -> Self {
        self.reply(FrameKind::AudioEnd, FINAL_HELLO)
    }
}

pub struct MockConnector {
    pub recorder: Arc<Recorder>,
    pub script: Script,
}

impl MockConnector {
    pub fn new(script: Script) -> (Self, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (
            Self {
                recorder: Arc::clone(&recorder),
                script,
            },
            recorder,
        )
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _endpoint: &str,
        headers: &HandshakeHeaders,
    ) -> Result<Connection, TransportError> {
        let attempt = self.recorder.connects.fetch_add(1, Ordering::SeqCst);
        self.recorder.headers.lock().unwrap().push(headers.clone());

        if self.script.hang_on_connect {
            std::future::pending::<()>().await;
        }
        if attempt < self.script.failing_connects {
            return Err(TransportError::Connection("connection refused".to_string()));
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Ok(Connection {
            transport: Box::new(MockTransport {
                recorder: Arc::clone(&self.recorder),
                script: self.script.clone(),
                inbound: Some(inbound_tx),
                open: true,
            }),
            inbound: inbound_rx,
        })
    }
}

struct MockTransport {
    recorder: Arc<Recorder>,
    script: Script,
    inbound: Option<mpsc::Sender<InboundMessage>>,
    open: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let index = self.recorder.frames.lock().unwrap().len();
        if self.script.fail_send_at == Some(index) {
            return Err(TransportError::Send("broken pipe".to_string()));
        }
        self.recorder.frames.lock().unwrap().push(frame.clone());

        if let Some(replies) = self.script.replies.get(&frame.kind()) {
            if let Some(tx) = &self.inbound {
                for reply in replies {
                    let _ = tx.send(reply.clone()).await;
                }
            }
        }
        if frame.kind() == FrameKind::AudioEnd && self.script.hang_up_after_end {
            self.inbound = None;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.inbound = None;
        self.recorder.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Audio source that trips a cancellation token after handing out `cancel_after` chunks
pub struct CancellingSource {
    chunks: std::vec::IntoIter<Vec<u8>>,
    served: usize,
    cancel_after: usize,
    token: CancellationToken,
}

impl CancellingSource {
    pub fn new(chunks: Vec<Vec<u8>>, cancel_after: usize, token: CancellationToken) -> Self {
        Self {
            chunks: chunks.into_iter(),
            served: 0,
            cancel_after,
            token,
        }
    }
}

#[async_trait]
impl AudioSource for CancellingSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, AudioSourceError> {
        if self.served == self.cancel_after {
            self.token.cancel();
        }
        self.served += 1;
        Ok(self.chunks.next())
    }
}

/// Hands out fixed-size chunks with a pause before each, like a live capture
pub struct PacedSource {
    data: Vec<u8>,
    position: usize,
    chunk_size: usize,
    pause: Duration,
}

impl PacedSource {
    pub fn new(data: Vec<u8>, chunk_size: usize, pause: Duration) -> Self {
        Self {
            data,
            position: 0,
            chunk_size,
            pause,
        }
    }
}

#[async_trait]
impl AudioSource for PacedSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, AudioSourceError> {
        if self.position >= self.data.len() {
            return Ok(None);
        }
        tokio::time::sleep(self.pause).await;
        let end = (self.position + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.position..end].to_vec();
        self.position = end;
        Ok(Some(chunk))
    }
}

pub fn audio_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
