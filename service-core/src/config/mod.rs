//! Shared listener configuration.
//!
//! Only the HTTP port lives here. Everything service-specific (database
//! pool sizing, log level, OTLP endpoint) is layered on top by each
//! service's own `from_env`.

use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Reads an optional `configuration` file overlaid with `APP`-prefixed
    /// environment variables. A `.env` file is honored for local runs.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
