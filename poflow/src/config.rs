use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    pub relay: Option<relay::config::Config>,
    pub uplink: uplink::config::Config,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;

        if let Some(relay) = &config.relay {
            relay.validate()?;
        }
        config.uplink.validate()?;

        Ok(config)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid relay config: {0}")]
    Relay(#[from] relay::config::ValidationError),
    #[error("invalid uplink config: {0}")]
    Uplink(#[from] uplink::config::ValidationError),
}
