//! Configuration loader with environment variable support

use super::Config;
use crate::error::Result;
use config::{Environment, File};
use std::path::Path;

/// Prefix for environment overrides, e.g. `KNOWLEDGE_RAG__SEARCH__SCORE_THRESHOLD`
pub const ENV_PREFIX: &str = "KNOWLEDGE_RAG";

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = config::Config::builder()
        .add_source(File::from(path.as_ref()))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    Ok(cfg)
}

/// Load configuration from a TOML file with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = config::Config::builder()
        .add_source(File::from(path.as_ref()))
        .add_source(env_source())
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    Ok(cfg)
}

/// Load configuration where the file is optional; missing values fall back to defaults
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = config::Config::builder()
        .add_source(File::from(path.as_ref()).required(false))
        .add_source(env_source())
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    Ok(cfg)
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
