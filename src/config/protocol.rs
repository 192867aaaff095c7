use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::QUERY_REPLY_PREFIX_LEN;
use crate::constants::REQUEST_HEADER_LEN;
use crate::constants::RESPONSE_HEADER_LEN;
use crate::constants::WIRE_INT_LEN;
use crate::Error;
use crate::Result;

/// Framing limits for the control channel
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProtocolConfig {
    /// Largest frame accepted or produced, header included
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Upper bound applied to the `max_items` of every query
    #[serde(default = "default_max_query_items")]
    pub max_query_items: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            max_query_items: default_max_query_items(),
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size <= REQUEST_HEADER_LEN || self.max_frame_size > i32::MAX as usize {
            return Err(Error::Config(ConfigError::Message(format!(
                "max_frame_size must be in ({REQUEST_HEADER_LEN}, {}]",
                i32::MAX
            ))));
        }

        if self.max_query_items == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_query_items must be greater than 0".into(),
            )));
        }

        let worst_case = self.worst_case_query_reply();
        if worst_case > self.max_frame_size {
            return Err(Error::Config(ConfigError::Message(format!(
                "max_query_items {} needs up to {} bytes per reply, above max_frame_size {}",
                self.max_query_items, worst_case, self.max_frame_size
            ))));
        }

        Ok(())
    }

    /// Every unit takes at most two integers; a range starting at block 0
    /// is split and costs one more.
    pub(crate) fn worst_case_query_reply(&self) -> usize {
        let ints = self.max_query_items.saturating_mul(2).saturating_add(1);
        RESPONSE_HEADER_LEN + QUERY_REPLY_PREFIX_LEN + ints.saturating_mul(WIRE_INT_LEN)
    }
}

fn default_max_frame_size() -> usize {
    64 * 1024
}
fn default_max_query_items() -> usize {
    4096
}
