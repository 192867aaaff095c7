use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Unix socket the control server listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "socket_path cannot be empty".into(),
            )));
        }
        Ok(())
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/blockwatch.sock")
}
