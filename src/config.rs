use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::time::Duration;
use thiserror::Error;

pub const SUBSCRIPTION_KEY_VAR: &str = "SPEECH_SUBSCRIPTION_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid subscription key: {reason}")]
    InvalidKeyFormat { reason: String },
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Credentials for the recognition service
#[derive(Debug)]
pub struct ApiConfig {
    pub subscription_key: SecretBox<String>,
}

impl ApiConfig {
    /// Load the subscription key from the environment (or a `.env` file)
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let key = env::var(SUBSCRIPTION_KEY_VAR)
            .map_err(|_| ConfigError::MissingEnvVar(SUBSCRIPTION_KEY_VAR.to_string()))?;
        Self::from_key(key)
    }

    /// Build a config from an explicitly supplied key (e.g. a CLI flag)
    pub fn from_key(key: String) -> Result<Self, ConfigError> {
        Self::validate_key_format(&key)?;
        Ok(Self {
            subscription_key: SecretBox::new(Box::new(key)),
        })
    }

    fn validate_key_format(key: &str) -> Result<(), ConfigError> {
        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                reason: "subscription key cannot be empty".to_string(),
            });
        }
        if key.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidKeyFormat {
                reason: "subscription key cannot contain whitespace".to_string(),
            });
        }
        Ok(())
    }

    /// Get the subscription key (use only when making API calls)
    pub fn subscription_key(&self) -> &str {
        self.subscription_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_subscription_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Tuning knobs for one recognition session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum audio bytes per frame
    pub chunk_size: usize,
    pub client_version: String,
    /// Value of the `X-CU-LogLevel` handshake header
    pub log_level: String,
    /// Reported in the `connection.context` payload
    pub network_type: String,
    pub user_agent: String,
    pub token_url: String,
    pub short_phrase_url: String,
    pub long_dictation_url: String,
    pub connect_timeout: Duration,
    pub connect_attempts: u32,
    /// Initial delay between connect attempts, doubled after each failure
    pub retry_backoff: Duration,
    /// When set, streaming waits for the first server message after the context frame
    pub ack_timeout: Option<Duration>,
    pub final_result_timeout: Duration,
    /// How long a fetched token is reused by `CachedTokenProvider`
    pub token_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            client_version: "4.0.150429".to_string(),
            log_level: "1".to_string(),
            network_type: "wifi".to_string(),
            user_agent: default_user_agent(),
            token_url: "https://api.cognitive.microsoft.com/sts/v1.0/issueToken".to_string(),
            short_phrase_url: "wss://speech.platform.bing.com/recognition".to_string(),
            long_dictation_url: "wss://speech.platform.bing.com/recognition/continuous"
                .to_string(),
            connect_timeout: Duration::from_secs(10),
            connect_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            ack_timeout: None,
            final_result_timeout: Duration::from_secs(30),
            // Service tokens live for 10 minutes
            token_ttl: Duration::from_secs(9 * 60),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.connect_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connect_attempts".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        for (field, value) in [
            ("client_version", &self.client_version),
            ("log_level", &self.log_level),
            ("user_agent", &self.user_agent),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "cannot be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn default_user_agent() -> String {
    format!(
        "{}/{} (OS={}; Arch={}; DeviceType=Near)",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env::consts::OS,
        env::consts::ARCH
    )
}
