use crate::session::SessionContext;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

pub const HEADER_CLIENT_VERSION: &str = "X-CU-ClientVersion";
pub const HEADER_LOCALE: &str = "X-CU-Locale";
pub const HEADER_SEARCH_IG: &str = "X-Search-IG";
pub const HEADER_CONVERSATION_ID: &str = "X-CU-ConversationId";
pub const HEADER_MESSAGE_TYPE: &str = "X-LOBBY-MESSAGE-TYPE";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Session context has no conversation identifier")]
    MissingConversationId,
    #[error("Header {0} is empty")]
    EmptyHeader(&'static str),
    #[error("Header {0} contains a line break")]
    InvalidHeader(&'static str),
    #[error("Context payload serialization failed: {0}")]
    Payload(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    #[error("Frame has no blank line terminating the header block")]
    MissingHeaderTerminator,
    #[error("Header block is not valid UTF-8")]
    InvalidUtf8,
    #[error("Malformed header line: {0}")]
    MalformedHeader(String),
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),
}

/// Frame kinds, in the only order a session may send them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Context,
    AudioStart,
    AudioBody,
    AudioEnd,
}

impl FrameKind {
    /// Value of the `X-LOBBY-MESSAGE-TYPE` header
    pub fn label(&self) -> &'static str {
        match self {
            FrameKind::Context => "connection.context",
            FrameKind::AudioStart => "audio.stream.start",
            FrameKind::AudioBody => "audio.stream.body",
            FrameKind::AudioEnd => "audio.stream.end",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "connection.context" => Some(FrameKind::Context),
            "audio.stream.start" => Some(FrameKind::AudioStart),
            "audio.stream.body" => Some(FrameKind::AudioBody),
            "audio.stream.end" => Some(FrameKind::AudioEnd),
            _ => None,
        }
    }

    /// Context frames are all text and go out as text messages
    pub fn is_text(&self) -> bool {
        matches!(self, FrameKind::Context)
    }
}

/// One wire message: `Key:Value\n` header lines, a blank line, then the raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    bytes: Vec<u8>,
    header_len: usize,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Header block including the terminating blank line
    pub fn header(&self) -> &[u8] {
        &self.bytes[..self.header_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.header_len..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Split a wire buffer back into its headers and payload
    pub fn parse(bytes: &[u8]) -> Result<ParsedFrame, FrameParseError> {
        let header_end = bytes
            .windows(2)
            .position(|w| w == b"\n\n")
            .ok_or(FrameParseError::MissingHeaderTerminator)?;
        let header_text =
            std::str::from_utf8(&bytes[..header_end]).map_err(|_| FrameParseError::InvalidUtf8)?;

        let mut headers = HashMap::new();
        for line in header_text.split('\n') {
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| FrameParseError::MalformedHeader(line.to_string()))?;
            headers.insert(key.to_string(), value.to_string());
        }

        let label = headers
            .get(HEADER_MESSAGE_TYPE)
            .ok_or_else(|| FrameParseError::MalformedHeader(HEADER_MESSAGE_TYPE.to_string()))?;
        let kind = FrameKind::from_label(label)
            .ok_or_else(|| FrameParseError::UnknownMessageType(label.clone()))?;

        Ok(ParsedFrame {
            kind,
            headers,
            payload: bytes[header_end + 2..].to_vec(),
        })
    }
}

/// Decoded view of a frame, used by servers and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub kind: FrameKind,
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl ParsedFrame {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ContextPayload<'a> {
    groups: [ContextGroup<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ContextGroup<'a> {
    id: &'static str,
    #[serde(rename = "Type")]
    group_type: &'static str,
    values: NetworkValues<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkValues<'a> {
    network_type: &'a str,
}

/// Builds protocol frames for one session. Encoding is pure.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    network_type: String,
}

impl FrameEncoder {
    pub fn new(network_type: impl Into<String>) -> Self {
        Self {
            network_type: network_type.into(),
        }
    }

    pub fn encode_context(&self, session: &SessionContext) -> Result<Frame, EncodeError> {
        let payload = ContextPayload {
            groups: [ContextGroup {
                id: "ClientNetworkType",
                group_type: "Context",
                values: NetworkValues {
                    network_type: &self.network_type,
                },
            }],
        };
        let payload =
            serde_json::to_vec(&payload).map_err(|e| EncodeError::Payload(e.to_string()))?;
        encode(session, FrameKind::Context, &payload)
    }

    pub fn encode_audio_start(
        &self,
        session: &SessionContext,
        chunk: &[u8],
    ) -> Result<Frame, EncodeError> {
        encode(session, FrameKind::AudioStart, chunk)
    }

    pub fn encode_audio_body(
        &self,
        session: &SessionContext,
        chunk: &[u8],
    ) -> Result<Frame, EncodeError> {
        encode(session, FrameKind::AudioBody, chunk)
    }

    pub fn encode_audio_end(&self, session: &SessionContext) -> Result<Frame, EncodeError> {
        encode(session, FrameKind::AudioEnd, &[])
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new("wifi")
    }
}

fn encode(session: &SessionContext, kind: FrameKind, payload: &[u8]) -> Result<Frame, EncodeError> {
    if session.conversation_id.trim().is_empty() {
        return Err(EncodeError::MissingConversationId);
    }

    let headers = [
        (HEADER_CLIENT_VERSION, session.client_version.as_str()),
        (HEADER_LOCALE, session.locale.as_str()),
        (HEADER_SEARCH_IG, session.instrumentation_id.as_str()),
        (HEADER_CONVERSATION_ID, session.conversation_id.as_str()),
        (HEADER_MESSAGE_TYPE, kind.label()),
    ];

    let mut bytes = Vec::with_capacity(256 + payload.len());
    for (key, value) in headers {
        if value.trim().is_empty() {
            return Err(EncodeError::EmptyHeader(key));
        }
        if value.contains(['\r', '\n']) {
            return Err(EncodeError::InvalidHeader(key));
        }
        bytes.extend_from_slice(key.as_bytes());
        bytes.push(b':');
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(b'\n');
    }
    bytes.push(b'\n');
    let header_len = bytes.len();
    bytes.extend_from_slice(payload);

    log::trace!(
        "Encoded {} frame ({} header bytes, {} payload bytes)",
        kind.label(),
        header_len,
        payload.len()
    );

    Ok(Frame {
        kind,
        bytes,
        header_len,
    })
}
