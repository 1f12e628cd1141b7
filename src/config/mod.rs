use std::{fs, io, path::Path};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{fs::write_atomic, skiplist::MAX_LEVEL};

pub const DEFAULT_LEVEL_PROBABILITY: f64 = 0.25;

/// Tunables for the ordered index of every table built from this config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Upper bound on the number of levels a node may draw, at most 32.
    pub max_level: usize,
    /// Probability that a node is promoted one more level.
    pub level_probability: f64,
    /// Fixed seed for level draws. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_level: MAX_LEVEL,
            level_probability: DEFAULT_LEVEL_PROBABILITY,
            seed: None,
        }
    }
}

impl Config {
    pub fn seeded(seed: u64) -> Self {
        Config {
            seed: Some(seed),
            ..Config::default()
        }
    }

    /// Reads the JSON config at `path`. If there is no file yet, the default
    /// config is written there and returned.
    pub fn load<P>(path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config = serde_json::from_str(&contents)
                    .with_context(|| format!("parsing config {}", path.display()))?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config found, writing defaults");
                let config = Config::default();
                config.write(path)?;
                Ok(config)
            }
            Err(e) => Err(e).with_context(|| format!("reading config {}", path.display())),
        }
    }

    pub fn write<P>(&self, path: P) -> anyhow::Result<()>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let encoded = serde_json::to_string_pretty(self)?;
        write_atomic(path, encoded.as_bytes())
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_level == 0 || self.max_level > MAX_LEVEL {
            bail!(
                "max_level must be between 1 and {}, got {}",
                MAX_LEVEL,
                self.max_level
            );
        }
        if !(self.level_probability > 0.0 && self.level_probability < 1.0) {
            bail!(
                "level_probability must be in (0, 1), got {}",
                self.level_probability
            );
        }
        Ok(())
    }
}
