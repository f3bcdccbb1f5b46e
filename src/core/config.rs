use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{Address, BoardId, RadioConfig};
use super::{Error, Result};

/// Timing and retry policy of the handshake and burst engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Delay before re-sending a query whose transmission failed
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub query_retry_delay: Duration,
    /// How long the initiator waits for a ready reply
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub ready_timeout: Duration,
    /// How long the responder waits for the test definition
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub definition_timeout: Duration,
    /// How long a heartbeat waits for its ack
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub heartbeat_timeout: Duration,
    /// Attempts for every acknowledged send
    pub ack_attempts: u8,
    /// Longest single wait inside a receive loop
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub rx_poll_interval: Duration,
    /// Pause before a burst so the receiver can reconfigure
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub settle_delay: Duration,
    /// Pause between burst packets
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub inter_packet_delay: Duration,
    /// Multiplier applied to the airtime of one packet
    pub airtime_safety_factor: f64,
    /// Fixed allowance added to every packet's timeout
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub per_packet_margin: Duration,
    /// Give up querying after this many rounds, `None` keeps querying until cancelled
    pub max_query_rounds: Option<u32>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            query_retry_delay: Duration::from_millis(500),
            ready_timeout: Duration::from_millis(3000),
            definition_timeout: Duration::from_millis(5000),
            heartbeat_timeout: Duration::from_millis(3000),
            ack_attempts: 3,
            rx_poll_interval: Duration::from_millis(500),
            settle_delay: Duration::from_millis(1000),
            inter_packet_delay: Duration::from_millis(100),
            airtime_safety_factor: 1.3,
            per_packet_margin: Duration::from_millis(100),
            max_query_rounds: None,
        }
    }
}

/// Configuration for one link-test node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Provisioned board id, also used as radio address
    pub board_id: BoardId,
    /// Configuration shared by all nodes for handshakes
    #[serde(default)]
    pub base_radio: RadioConfig,
    /// Protocol timing
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Root of the test definition and result directories
    pub storage_root: PathBuf,
}

impl NodeConfig {
    /// Creates a configuration with default radio and protocol settings
    pub fn new(board_id: BoardId, storage_root: impl Into<PathBuf>) -> Self {
        NodeConfig {
            board_id,
            base_radio: RadioConfig::BASE,
            protocol: ProtocolConfig::default(),
            storage_root: storage_root.into(),
        }
    }

    /// Loads and validates a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: NodeConfig = serde_json::from_str(&text)
            .map_err(|e| Error::config(format!("Failed to parse node config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.board_id.is_valid() {
            return Err(Error::config(format!(
                "board id 0x{:02X} is neither master nor slave",
                self.board_id.0
            )));
        }
        if self.protocol.ack_attempts == 0 {
            return Err(Error::config("ack_attempts must be at least 1"));
        }
        if self.protocol.rx_poll_interval.is_zero() {
            return Err(Error::config("rx_poll_interval must be non-zero"));
        }
        self.base_radio.validate()
    }

    pub fn address(&self) -> Address {
        self.board_id.address()
    }
}
