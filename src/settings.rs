use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::bus::Topics;

const DEFAULT_FILE: &str = "lobx.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Database directory for the sled backend.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    pub capacity: usize,
    pub intake_topic: String,
    pub match_topic: String,
    /// Match events kept for redelivery while the bus is down.
    pub undelivered_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// Prometheus listener, only used with the `metrics-exporter` feature.
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    pub bus: BusSettings,
    pub log: LogSettings,
    pub metrics: MetricsSettings,
}

impl Settings {
    /// Defaults, then the TOML file (`path` must exist; without it `lobx.toml`
    /// is read if present), then `LOBX__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };
        Config::builder()
            .set_default("store.backend", "memory")?
            .set_default("store.path", "./data/book")?
            .set_default("bus.capacity", 1024_i64)?
            .set_default("bus.intake_topic", "doOrder")?
            .set_default("bus.match_topic", "matchOrder")?
            .set_default("bus.undelivered_capacity", 10_000_i64)?
            .set_default("log.filter", "info")?
            .set_default("metrics.listen", "0.0.0.0:9000")?
            .add_source(file)
            .add_source(Environment::with_prefix("LOBX").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn topics(&self) -> Topics {
        Topics {
            intake: self.bus.intake_topic.clone(),
            matches: self.bus.match_topic.clone(),
        }
    }
}
