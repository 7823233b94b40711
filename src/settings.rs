//! Process settings for the `scriptbuddy` binary.
//!
//! Loaded once at startup from the environment (and a `.env` file, when
//! present). Transport endpoints live in [`crate::client::Config`]; this covers
//! everything around them.

use std::env;
use std::path::PathBuf;
use tracing::Level;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000/api";
pub const DEFAULT_COMPLETION_PHRASE: &str = "练习结束";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the config and script sources.
    pub api_base: String,
    /// Local script document, used instead of the remote fetch.
    pub script_file: Option<PathBuf>,
    pub script_id: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    /// Spoken once the cursor walks past the last line.
    pub completion_phrase: String,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("{name} must be an http(s) url, got {value:?}")]
    InvalidUrl { name: &'static str, value: String },
}

impl Settings {
    /// Loads settings from environment variables.
    ///
    // *   `SCRIPTBUDDY_API_BASE`: (Optional) Config and script source base URL. Defaults to `http://127.0.0.1:8000/api`.
    // *   `SCRIPTBUDDY_SCRIPT_FILE`: (Optional) Path to a local script document.
    // *   `SCRIPTBUDDY_SCRIPT_ID`: (Optional) Script id passed to the script source.
    // *   `SCRIPTBUDDY_INPUT_DEVICE` / `SCRIPTBUDDY_OUTPUT_DEVICE`: (Optional) Audio device names.
    // *   `SCRIPTBUDDY_COMPLETION_PHRASE`: (Optional) Spoken at the end of the script. Defaults to "练习结束".
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // ignored if not present
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_base = var("SCRIPTBUDDY_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl {
                name: "SCRIPTBUDDY_API_BASE",
                value: api_base,
            });
        }

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            script_file: var("SCRIPTBUDDY_SCRIPT_FILE").map(PathBuf::from),
            script_id: var("SCRIPTBUDDY_SCRIPT_ID"),
            input_device: var("SCRIPTBUDDY_INPUT_DEVICE"),
            output_device: var("SCRIPTBUDDY_OUTPUT_DEVICE"),
            completion_phrase: var("SCRIPTBUDDY_COMPLETION_PHRASE")
                .unwrap_or_else(|| DEFAULT_COMPLETION_PHRASE.to_string()),
            log_level,
        })
    }
}
