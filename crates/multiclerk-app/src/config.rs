// Configuration loading and parsing (config/clerk.toml).

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use multiclerk_core::platform::PlatformGroup;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_port: u16,
    pub db_path: String,
    pub coordination: CoordinationConfig,
    pub colors: ColorsConfig,
    pub analytics: AnalyticsConfig,
    /// Platform groups in registry order.
    pub platforms: Vec<PlatformGroup>,
}

// ---------------------------------------------------------------------------
// clerk.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire clerk.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ClerkFile {
    websocket: WebsocketSection,
    database: DatabaseSection,
    coordination: CoordinationConfig,
    colors: ColorsConfig,
    #[serde(default)]
    analytics: AnalyticsConfig,
    platforms: Vec<PlatformGroup>,
}

#[derive(Debug, Clone, Deserialize)]
struct WebsocketSection {
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinationConfig {
    /// At most one tab per platform group.
    pub production: bool,
    /// Delay between per-tab bid dispatches; 0 yields one scheduler tick.
    #[serde(default)]
    pub stagger_ms: u64,
    /// Seconds without a frame before the bridge counts as gone.
    pub heartbeat_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColorsConfig {
    pub palette: Vec<String>,
    #[serde(default)]
    pub randomize: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Reported as both `url` and `domain` of every event.
    pub site: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            site: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/clerk.toml` relative to `base_dir`.
///
/// Does not copy defaults; prefer `load_config()`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("clerk.toml");
    let text = read_file(&path)?;
    let file: ClerkFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        ws_port: file.websocket.port,
        db_path: file.database.path,
        coordination: file.coordination,
        colors: file.colors,
        analytics: file.analytics,
        platforms: file.platforms,
    };

    validate(&config)?;

    Ok(config)
}

/// Copy `defaults/clerk.toml` to `config/clerk.toml` when the latter is
/// missing. Returns the copied path, or `None` if the config already existed.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join("clerk.toml");
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join("clerk.toml");
    if !source.exists() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "neither config/clerk.toml nor defaults/clerk.toml found in {}",
                base_dir.display()
            ),
        });
    }

    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to create config directory: {e}"),
        })?;
    }
    std::fs::copy(&source, &target).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to copy {} to {}: {e}", source.display(), target.display()),
    })?;

    Ok(Some(target))
}

/// Load config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.ws_port == 0 {
        return Err(invalid("websocket.port", "must be greater than 0"));
    }

    if config.coordination.heartbeat_timeout_secs == 0 {
        return Err(invalid(
            "coordination.heartbeat_timeout_secs",
            "must be greater than 0",
        ));
    }

    if config.colors.palette.is_empty() {
        return Err(invalid("colors.palette", "must contain at least one color"));
    }

    if config.analytics.enabled && config.analytics.endpoint.is_empty() {
        return Err(invalid(
            "analytics.endpoint",
            "required when analytics is enabled",
        ));
    }

    if config.platforms.is_empty() {
        return Err(invalid("platforms", "at least one platform is required"));
    }

    let mut names = HashSet::new();
    for (i, platform) in config.platforms.iter().enumerate() {
        if platform.url_prefix.is_empty() {
            return Err(invalid(
                format!("platforms[{i}].url_prefix"),
                format!("empty prefix for platform {}", platform.name),
            ));
        }
        if !names.insert(platform.name.as_str()) {
            return Err(invalid(
                format!("platforms[{i}].name"),
                format!("duplicate platform name {}", platform.name),
            ));
        }
    }

    Ok(())
}
