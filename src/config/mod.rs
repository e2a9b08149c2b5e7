//! Application configuration.
//!
//! One `Config` struct covering every section (storage, messaging, hold
//! policy, consumer batching), loadable from YAML and overridable through
//! the environment.

mod messaging;
mod reservation;
mod storage;

pub use messaging::MessagingConfig;
pub use reservation::{ExpirationConfig, ReservationConfig};
pub use storage::{PostgresConfig, StorageConfig};

use serde::Deserialize;

/// Environment variable controlling the tracing filter.
pub const LOG_ENV_VAR: &str = "MARQUEE_LOG";

/// Raised when a loaded configuration violates a documented range.
#[derive(Debug, thiserror::Error)]
#[error("Invalid configuration: {0}")]
pub struct InvalidConfig(pub String);

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Messaging configuration.
    pub messaging: MessagingConfig,
    /// Hold TTL and retry policy.
    pub reservation: ReservationConfig,
    /// Expiration consumer batching.
    pub expiration: ExpirationConfig,
}

impl Config {
    /// Read configuration, later sources winning over earlier ones:
    /// a `config.yaml` in the working directory, then the file named by
    /// the `path` argument or `MARQUEE_CONFIG`, then `MARQUEE_`-prefixed
    /// environment variables (`__` separates nesting levels).
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new("config.yaml", FileFormat::Yaml).required(false));

        let explicit = path
            .map(str::to_string)
            .or_else(|| std::env::var("MARQUEE_CONFIG").ok());
        if let Some(config_path) = explicit {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("MARQUEE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check documented ranges across all sections.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        self.reservation.validate()?;
        self.expiration.validate()?;
        Ok(())
    }
}
