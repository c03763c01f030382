use std::{io, time::Duration};

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{load, save};

pub const CONFIG_NAME: &str = "config.yaml";

/// Settings kept in `<config dir>/coverhue/config.yaml`. Missing fields take their defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// the in-process cache is used when this is unset
    pub redis_url: Option<String>,
    pub cache_ttl_secs: u64,
    /// most albums analyzed at once
    pub workers: usize,
    pub fetch_timeout_secs: u64,
    /// a redis round trip taking longer than this is a miss
    pub cache_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: None,
            cache_ttl_secs: 24 * 60 * 60,
            workers: 8,
            fetch_timeout_secs: 10,
            cache_timeout_secs: 2,
        }
    }
}

impl Config {
    /// Load the saved config, or save and return the defaults if there is none.
    ///
    /// # Errors
    ///
    /// This function fails if a config file exists but cannot be read or parsed. The file is left
    /// untouched.
    pub fn load_or_create() -> anyhow::Result<Self> {
        match load::<Config>(CONFIG_NAME) {
            Ok(config) => {
                debug!("loaded config");
                Ok(config)
            }
            Err(err) if is_missing(&err) => {
                debug!("no config yet, saving defaults");
                let config = Config::default();
                if let Err(err) = save(&config, CONFIG_NAME) {
                    warn!("failed to save default config: {err}");
                }
                Ok(config)
            }
            Err(err) => Err(err.context(format!("bad {CONFIG_NAME}"))),
        }
    }

    /// # Errors
    ///
    /// This function fails if `workers` or any of the durations is 0.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        // entries always expire; an expiry of 0 would mean never caching at all
        if self.cache_ttl_secs == 0 {
            bail!("cache_ttl_secs must be at least 1");
        }
        if self.fetch_timeout_secs == 0 {
            bail!("fetch_timeout_secs must be at least 1");
        }
        if self.cache_timeout_secs == 0 {
            bail!("cache_timeout_secs must be at least 1");
        }
        Ok(())
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_secs)
    }
}

fn is_missing(err: &anyhow::Error) -> bool {
    err.downcast_ref::<io::Error>()
        .is_some_and(|err| err.kind() == io::ErrorKind::NotFound)
}
