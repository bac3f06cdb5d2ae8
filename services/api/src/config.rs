use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    /// Web search answers 500 when this is absent.
    pub perplexity_api_key: Option<SecretString>,
    pub realtime_model: String,
    pub default_voice: String,
    pub image_model: String,
    pub search_model: String,
    pub files_dir: PathBuf,
    pub static_dir: PathBuf,
    pub instructions_path: Option<PathBuf>,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn secret(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = secret("OPENAI_API_KEY")
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let perplexity_api_key = secret("PERPLEXITY_API_KEY");

        let realtime_model = var_or("REALTIME_MODEL", "gpt-4o-realtime-preview-2024-12-17");
        let default_voice = var_or("DEFAULT_VOICE", "sage");
        let image_model = var_or("IMAGE_MODEL", "dall-e-3");
        let search_model = var_or("SEARCH_MODEL", "sonar");

        let files_dir = PathBuf::from(var_or("FILES_DIR", "./files"));
        let static_dir = PathBuf::from(var_or("STATIC_DIR", "./public"));
        let instructions_path = std::env::var("INSTRUCTIONS_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            perplexity_api_key,
            realtime_model,
            default_voice,
            image_model,
            search_model,
            files_dir,
            static_dir,
            instructions_path,
            log_level,
        })
    }
}
