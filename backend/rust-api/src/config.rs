use std::env;
use std::str::FromStr;

const DEFAULT_HF_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub cases_collection: String,
    pub feedback: FeedbackConfig,
    pub ws: WsConfig,
    /// `username:password` expected on `/metrics`
    pub metrics_auth: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackProvider {
    HuggingFace,
    Gemini,
    Disabled,
}

impl FeedbackProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackProvider::HuggingFace => "huggingface",
            FeedbackProvider::Gemini => "gemini",
            FeedbackProvider::Disabled => "disabled",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            FeedbackProvider::Gemini => DEFAULT_GEMINI_MODEL,
            FeedbackProvider::HuggingFace | FeedbackProvider::Disabled => DEFAULT_HF_MODEL,
        }
    }
}

impl FromStr for FeedbackProvider {
    type Err = config::ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "huggingface" | "hf" => Ok(FeedbackProvider::HuggingFace),
            "gemini" | "google" => Ok(FeedbackProvider::Gemini),
            "disabled" | "none" | "off" => Ok(FeedbackProvider::Disabled),
            other => Err(config::ConfigError::Message(format!(
                "unknown feedback provider: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    pub provider: FeedbackProvider,
    pub api_key: Option<String>,
    pub model: String,
    /// Overrides the provider base URL (used by tests and self-hosted gateways)
    pub endpoint: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub retry_attempts: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            provider: FeedbackProvider::HuggingFace,
            api_key: None,
            model: DEFAULT_HF_MODEL.to_string(),
            endpoint: None,
            max_tokens: 256,
            temperature: 0.5,
            timeout_seconds: 60,
            retry_attempts: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub heartbeat_seconds: u64,
    pub intent_queue: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            heartbeat_seconds: 30,
            intent_queue: 32,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "digital_opd".to_string(),
            cases_collection: "patients".to_string(),
            feedback: FeedbackConfig::default(),
            ws: WsConfig::default(),
            metrics_auth: "admin:changeme".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let bind_addr = settings
            .get_string("server.bind_addr")
            .unwrap_or(defaults.bind_addr);

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or(defaults.mongo_uri);

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let cases_collection = settings
            .get_string("database.cases_collection")
            .unwrap_or(defaults.cases_collection);

        let provider = match settings.get_string("feedback.provider") {
            Ok(value) => value.parse::<FeedbackProvider>()?,
            Err(_) => defaults.feedback.provider,
        };

        let legacy_key_var = match provider {
            FeedbackProvider::Gemini => "GEMINI_API_KEY",
            _ => "HUGGING_FACE_API_KEY",
        };
        let api_key = settings
            .get_string("feedback.api_key")
            .or_else(|_| env::var(legacy_key_var))
            .ok()
            .filter(|key| !key.is_empty());

        let model = settings
            .get_string("feedback.model")
            .unwrap_or_else(|_| provider.default_model().to_string());

        let endpoint = settings.get_string("feedback.endpoint").ok();

        let feedback = FeedbackConfig {
            provider,
            api_key,
            model,
            endpoint,
            max_tokens: positive_int(&settings, "feedback.max_tokens")?
                .map(|v| v as u32)
                .unwrap_or(defaults.feedback.max_tokens),
            temperature: match settings.get_float("feedback.temperature") {
                Ok(value) => value as f32,
                Err(config::ConfigError::NotFound(_)) => defaults.feedback.temperature,
                Err(e) => return Err(e),
            },
            timeout_seconds: positive_int(&settings, "feedback.timeout_seconds")?
                .map(|v| v as u64)
                .unwrap_or(defaults.feedback.timeout_seconds),
            retry_attempts: positive_int(&settings, "feedback.retry_attempts")?
                .map(|v| v as usize)
                .unwrap_or(defaults.feedback.retry_attempts),
        };

        let ws = WsConfig {
            heartbeat_seconds: positive_int(&settings, "ws.heartbeat_seconds")?
                .map(|v| v as u64)
                .unwrap_or(defaults.ws.heartbeat_seconds),
            intent_queue: positive_int(&settings, "ws.intent_queue")?
                .map(|v| v as usize)
                .unwrap_or(defaults.ws.intent_queue),
        };

        let metrics_auth = settings
            .get_string("metrics.auth")
            .or_else(|_| env::var("METRICS_AUTH"))
            .unwrap_or_else(|_| {
                if env == "prod" {
                    tracing::warn!("METRICS_AUTH not set in production, using default credentials");
                }
                defaults.metrics_auth
            });

        Ok(Config {
            bind_addr,
            mongo_uri,
            mongo_database,
            cases_collection,
            feedback,
            ws,
            metrics_auth,
        })
    }
}

/// Missing keys resolve to `None`; zero, negative or unparsable values are rejected.
fn positive_int(settings: &config::Config, key: &str) -> Result<Option<i64>, config::ConfigError> {
    match settings.get_int(key) {
        Ok(value) if value > 0 => Ok(Some(value)),
        Ok(value) => Err(config::ConfigError::Message(format!(
            "{} must be positive, got {}",
            key, value
        ))),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "APP__FEEDBACK__PROVIDER",
            "APP__FEEDBACK__TIMEOUT_SECONDS",
            "APP__FEEDBACK__MODEL",
            "APP__WS__INTENT_QUEUE",
            "HUGGING_FACE_API_KEY",
            "GEMINI_API_KEY",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_nothing_configured() {
        clear_env();
        let config = Config::load().unwrap();

        assert_eq!(config.feedback.provider, FeedbackProvider::HuggingFace);
        assert_eq!(config.feedback.model, DEFAULT_HF_MODEL);
        assert_eq!(config.feedback.max_tokens, 256);
        assert_eq!(config.feedback.timeout_seconds, 60);
        assert_eq!(config.ws.heartbeat_seconds, 30);
    }

    #[test]
    #[serial]
    fn test_env_overrides_provider_and_model_default() {
        clear_env();
        std::env::set_var("APP__FEEDBACK__PROVIDER", "gemini");
        std::env::set_var("GEMINI_API_KEY", "test-key");
        std::env::set_var("APP__FEEDBACK__TIMEOUT_SECONDS", "5");

        let config = Config::load().unwrap();
        clear_env();

        assert_eq!(config.feedback.provider, FeedbackProvider::Gemini);
        assert_eq!(config.feedback.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.feedback.api_key.as_deref(), Some("test-key"));
        assert_eq!(config.feedback.timeout_seconds, 5);
    }

    #[test]
    #[serial]
    fn test_rejects_unknown_provider() {
        clear_env();
        std::env::set_var("APP__FEEDBACK__PROVIDER", "clippy");
        let result = Config::load();
        clear_env();

        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_rejects_zero_queue_size() {
        clear_env();
        std::env::set_var("APP__WS__INTENT_QUEUE", "0");
        let result = Config::load();
        clear_env();

        assert!(result.is_err());
    }

    #[test]
    fn test_provider_parsing_is_case_insensitive() {
        assert_eq!(
            "HuggingFace".parse::<FeedbackProvider>().unwrap(),
            FeedbackProvider::HuggingFace
        );
        assert_eq!(
            "OFF".parse::<FeedbackProvider>().unwrap(),
            FeedbackProvider::Disabled
        );
    }
}
