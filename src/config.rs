use std::collections::BTreeMap;
use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::core::wizard::Payload;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("{0}")]
    Invalid(String),

    #[error("Failed to write configuration: {0}")]
    Write(String),
}

// ============================================================================
// Application Configuration
// ============================================================================

/// Top-level process configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewaySettings,
    pub logging: LoggingConfig,
}

/// Settings for the HTTP gateway to the Precliniset backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Base URL relative endpoint paths are resolved against.
    pub base_url: String,
    /// Header carrying the anti-forgery token.
    pub csrf_header: String,
    pub user_agent: String,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    /// Override the default log directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Also write JSON logs to a daily rolling file.
    pub json_file: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/".to_string(),
            csrf_header: "X-CSRFToken".to_string(),
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            json_file: false,
        }
    }
}

impl LoggingConfig {
    /// Resolved log directory (override or XDG default).
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("precliniset").join("logs"))
                .unwrap_or_else(|| PathBuf::from("logs"))
        })
    }
}

impl AppConfig {
    /// Load configuration from `~/.config/precliniset/config.toml` merged with
    /// `PRECLINISET_` environment variables (`__` separates nested keys).
    /// Returns `Default` if the file is unparseable.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match Self::load_from(&config_path) {
            Ok(config) => {
                log::info!("Loaded config from {}", config_path.display());
                config
            }
            Err(e) => {
                log::warn!(
                    "Failed to load config at {}: {e}; using defaults",
                    config_path.display()
                );
                Self::default()
            }
        }
    }

    /// Load from an explicit file. A missing file yields defaults plus environment.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PRECLINISET_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Render as TOML, e.g. to seed a starter config file.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Write(e.to_string()))
    }

    /// Write to `path`, creating parent directories.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write(e.to_string()))?;
        }
        std::fs::write(path, self.to_toml()?).map_err(|e| ConfigError::Write(e.to_string()))
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("precliniset").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}

// ============================================================================
// Wizard Session Configuration
// ============================================================================

/// User-facing message templates. `{field}` is replaced with the field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Messages {
    pub required: String,
    pub invalid_format: String,
    pub transport_error: String,
    pub invalid_response: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            required: "This field is required".to_string(),
            invalid_format: "Invalid format".to_string(),
            transport_error: "Could not reach the server. Please try again.".to_string(),
            invalid_response: "The server returned an unexpected response.".to_string(),
        }
    }
}

impl Messages {
    pub fn required_for(&self, field: &str) -> String {
        self.required.replace("{field}", field)
    }

    pub fn invalid_format_for(&self, field: &str) -> String {
        self.invalid_format.replace("{field}", field)
    }
}

/// Per-session configuration supplied by the hosting page as embedded JSON.
///
/// ```json
/// { "totalSteps": 4, "isLinear": true,
///   "urls": { "submit": "/groups/12/randomize" },
///   "i18n": { "required": "This field is required" },
///   "csrfToken": "..." }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardConfig {
    pub total_steps: usize,
    #[serde(default)]
    pub is_linear: bool,
    /// Endpoint key to URL (absolute, or relative to the gateway base URL).
    #[serde(default)]
    pub urls: BTreeMap<String, String>,
    #[serde(default)]
    pub i18n: Messages,
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub initial_payload: Payload,
}

impl WizardConfig {
    pub fn new(total_steps: usize, is_linear: bool) -> Self {
        Self {
            total_steps,
            is_linear,
            urls: BTreeMap::new(),
            i18n: Messages::default(),
            csrf_token: None,
            initial_payload: Payload::new(),
        }
    }

    /// Parse and validate the host page configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_steps == 0 {
            return Err(ConfigError::Invalid(
                "totalSteps must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_url(mut self, key: impl Into<String>, url: impl Into<String>) -> Self {
        self.urls.insert(key.into(), url.into());
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.initial_payload = payload;
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn with_messages(mut self, messages: Messages) -> Self {
        self.i18n = messages;
        self
    }

    pub fn url(&self, key: &str) -> Option<&str> {
        self.urls.get(key).map(String::as_str)
    }
}
