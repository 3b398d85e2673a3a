use crate::utils::error::{ParkingError, Result};
use crate::utils::validation::{validate_path, validate_range, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runtime configuration. Every section and field has a default, so an empty
/// file (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub busy_timeout_ms: u64,
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "parkwise.db".to_string(),
            busy_timeout_ms: 5_000,
            in_memory: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_slots_per_lot: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 50,
            max_slots_per_lot: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| ParkingError::ConfigError {
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| ParkingError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Loads and validates the file when given, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Replaces `${VAR}` and `${VAR:-fallback}`. An unset variable without a
    /// fallback is left as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").map_err(|e| {
            ParkingError::ConfigError {
                message: format!("invalid substitution pattern: {}", e),
            }
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match (std::env::var(var_name), caps.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(fallback)) => fallback.as_str().to_string(),
                (Err(_), None) => caps[0].to_string(),
            }
        });

        Ok(result.into_owned())
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        if !self.database.in_memory {
            validate_path("database.path", &self.database.path)?;
        }
        validate_range("database.busy_timeout_ms", self.database.busy_timeout_ms, 0, 600_000)?;
        validate_range("engine.max_retries", self.engine.max_retries, 0, 100)?;
        validate_range("engine.retry_backoff_ms", self.engine.retry_backoff_ms, 0, 60_000)?;
        validate_range("engine.max_slots_per_lot", self.engine.max_slots_per_lot, 1, 1_000_000)?;

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ParkingError::ConfigError {
                message: format!(
                    "logging.level '{}' is not one of {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }

        Ok(())
    }
}
