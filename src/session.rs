use crate::config::SessionConfig;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Selects one of the two fixed recognition endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum RecognitionMode {
    #[strum(to_string = "short", serialize = "shortphrase")]
    ShortPhrase,
    #[strum(to_string = "long", serialize = "longdictation")]
    LongDictation,
}

impl RecognitionMode {
    pub fn endpoint<'a>(&self, config: &'a SessionConfig) -> &'a str {
        match self {
            RecognitionMode::ShortPhrase => &config.short_phrase_url,
            RecognitionMode::LongDictation => &config.long_dictation_url,
        }
    }
}

/// Immutable identifiers shared by every frame of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub conversation_id: String,
    /// Sent as `X-Search-IG`
    pub instrumentation_id: String,
    pub locale: String,
    pub client_version: String,
    pub mode: RecognitionMode,
    pub endpoint: String,
}

impl SessionContext {
    pub fn new(locale: impl Into<String>, mode: RecognitionMode, config: &SessionConfig) -> Self {
        Self {
            conversation_id: new_identifier(),
            instrumentation_id: new_identifier(),
            locale: locale.into(),
            client_version: config.client_version.clone(),
            mode,
            endpoint: mode.endpoint(config).to_string(),
        }
    }
}

fn new_identifier() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}
