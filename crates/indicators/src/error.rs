use thiserror::Error;

/// Errors raised at the configuration parse boundary.
///
/// The engine itself never fails on these; [`crate::config::EngineConfig::resolve`]
/// turns each one into a recorded fallback.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid anchor '{input}': {reason}")]
    InvalidAnchor { input: String, reason: String },
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
