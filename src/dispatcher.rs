use crate::transport::InboundMessage;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Structural classification of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Partial,
    Final,
    Unrecognized,
}

/// Speculative, non-terminal hypothesis
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PartialResult {
    #[serde(alias = "Text")]
    pub display_text: String,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Phrase {
    #[serde(alias = "Display")]
    pub display_text: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Terminal outcome of a session
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FinalResult {
    pub recognition_status: String,
    #[serde(default, alias = "NBest")]
    pub phrases: Vec<Phrase>,
}

impl FinalResult {
    pub fn is_success(&self) -> bool {
        self.recognition_status == "Success"
    }

    /// Highest-confidence phrase, if any
    pub fn best(&self) -> Option<&Phrase> {
        self.phrases
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// Caller side of the result channels
pub struct ResultReceivers {
    pub partials: mpsc::UnboundedReceiver<PartialResult>,
    pub finals: mpsc::UnboundedReceiver<FinalResult>,
}

/// Routes classified inbound messages onto typed result channels
#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    partial_tx: mpsc::UnboundedSender<PartialResult>,
    final_tx: mpsc::UnboundedSender<FinalResult>,
}

pub fn result_channels() -> (MessageDispatcher, ResultReceivers) {
    let (partial_tx, partials) = mpsc::unbounded_channel();
    let (final_tx, finals) = mpsc::unbounded_channel();
    (
        MessageDispatcher {
            partial_tx,
            final_tx,
        },
        ResultReceivers { partials, finals },
    )
}

/// Decode the JSON body of a message, skipping an optional header block.
fn decode_body(message: &InboundMessage) -> Option<Value> {
    let text = match message {
        InboundMessage::Text(text) => text.as_str(),
        InboundMessage::Binary(data) => std::str::from_utf8(data).ok()?,
    };
    let text = text.trim_start();

    let body = if text.starts_with('{') {
        text
    } else {
        let (_, body) = text
            .split_once("\r\n\r\n")
            .or_else(|| text.split_once("\n\n"))?;
        body
    };

    serde_json::from_str(body).ok()
}

fn classify_value(value: &Value) -> MessageKind {
    let Some(object) = value.as_object() else {
        return MessageKind::Unrecognized;
    };
    if object.contains_key("RecognitionStatus") {
        MessageKind::Final
    } else if object.contains_key("DisplayText") || object.contains_key("Text") {
        MessageKind::Partial
    } else {
        MessageKind::Unrecognized
    }
}

pub fn classify(message: &InboundMessage) -> MessageKind {
    decode_body(message)
        .as_ref()
        .map(classify_value)
        .unwrap_or(MessageKind::Unrecognized)
}

/// A routed message together with its decoded result
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Partial(PartialResult),
    Final(FinalResult),
    Unrecognized,
}

impl RecognitionEvent {
    pub fn kind(&self) -> MessageKind {
        match self {
            RecognitionEvent::Partial(_) => MessageKind::Partial,
            RecognitionEvent::Final(_) => MessageKind::Final,
            RecognitionEvent::Unrecognized => MessageKind::Unrecognized,
        }
    }
}

impl MessageDispatcher {
    /// Route one message. Unrecognized or malformed messages are logged and dropped.
    pub fn route(&self, message: &InboundMessage) -> MessageKind {
        self.route_event(message).kind()
    }

    /// Like `route`, but also hands the decoded result back to the caller.
    pub fn route_event(&self, message: &InboundMessage) -> RecognitionEvent {
        let Some(value) = decode_body(message) else {
            log::debug!("Dispatcher: dropping undecodable message: {:?}", message);
            return RecognitionEvent::Unrecognized;
        };

        match classify_value(&value) {
            MessageKind::Partial => match serde_json::from_value::<PartialResult>(value) {
                Ok(partial) => {
                    log::debug!("Dispatcher: partial '{}'", partial.display_text);
                    if self.partial_tx.send(partial.clone()).is_err() {
                        log::trace!("Dispatcher: partial receiver dropped");
                    }
                    RecognitionEvent::Partial(partial)
                }
                Err(e) => {
                    log::warn!("Dispatcher: malformed partial result: {}", e);
                    RecognitionEvent::Unrecognized
                }
            },
            MessageKind::Final => match serde_json::from_value::<FinalResult>(value) {
                Ok(result) => {
                    log::info!(
                        "Dispatcher: final result {} with {} phrases",
                        result.recognition_status,
                        result.phrases.len()
                    );
                    if self.final_tx.send(result.clone()).is_err() {
                        log::trace!("Dispatcher: final receiver dropped");
                    }
                    RecognitionEvent::Final(result)
                }
                Err(e) => {
                    log::warn!("Dispatcher: malformed final result: {}", e);
                    RecognitionEvent::Unrecognized
                }
            },
            MessageKind::Unrecognized => {
                log::warn!("Dispatcher: dropping unrecognized message: {}", value);
                RecognitionEvent::Unrecognized
            }
        }
    }
}
