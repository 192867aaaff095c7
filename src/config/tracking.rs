use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Bounds applied to every watch created through a registry
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrackingConfig {
    /// Maximum number of disjoint ranges a single watch retains before it
    /// collapses into one bounding range and reports `overflowed`
    #[serde(default = "default_max_ranges_per_watch")]
    pub max_ranges_per_watch: usize,

    /// Maximum number of live watch handles per observer
    #[serde(default = "default_max_watches_per_observer")]
    pub max_watches_per_observer: usize,

    /// Longest accepted path, in bytes
    #[serde(default = "default_max_path_len")]
    pub max_path_len: usize,

    /// Maximum number of files the in-process interceptor will hook at once
    #[serde(default = "default_max_instrumented_files")]
    pub max_instrumented_files: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_ranges_per_watch: default_max_ranges_per_watch(),
            max_watches_per_observer: default_max_watches_per_observer(),
            max_path_len: default_max_path_len(),
            max_instrumented_files: default_max_instrumented_files(),
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_ranges_per_watch == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_ranges_per_watch must be greater than 0".into(),
            )));
        }

        if self.max_watches_per_observer == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_watches_per_observer must be greater than 0".into(),
            )));
        }

        if self.max_path_len == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_path_len must be greater than 0".into(),
            )));
        }

        if self.max_instrumented_files == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_instrumented_files must be greater than 0".into(),
            )));
        }

        Ok(())
    }
}

fn default_max_ranges_per_watch() -> usize {
    1024
}
fn default_max_watches_per_observer() -> usize {
    64
}
// PATH_MAX on Linux
fn default_max_path_len() -> usize {
    4096
}
fn default_max_instrumented_files() -> usize {
    8192
}
