use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Error, Result, MAX_PACKET_LEN, MIN_PACKET_LEN, TESTDEF_ID_LEN};

/// Radio address of a node on the shared medium
pub type Address = u8;

/// Address every node accepts frames for
pub const BROADCAST_ADDRESS: Address = 0xFF;

/// Full LoRa modulation configuration for one node.
///
/// Frequency, spreading factor, bandwidth and preamble length must match
/// between peers for a frame to be demodulated at all. Power, coding rate and
/// CRC may differ per node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Carrier frequency in MHz
    pub frequency_mhz: f32,
    /// Spreading factor (7-12)
    pub spreading_factor: u8,
    /// Transmit power in dBm
    pub tx_power_dbm: i8,
    /// Signal bandwidth in Hz
    pub bandwidth_hz: u32,
    /// Coding rate denominator, rate is 4/N
    pub coding_rate_denom: u8,
    /// Preamble length in symbols
    pub preamble_len: u16,
    /// Payload CRC enabled
    pub crc: bool,
}

impl RadioConfig {
    /// Configuration every node is provisioned with and uses for handshakes
    pub const BASE: RadioConfig = RadioConfig {
        frequency_mhz: 868.0,
        spreading_factor: 12,
        tx_power_dbm: 14,
        bandwidth_hz: 125_000,
        coding_rate_denom: 5,
        preamble_len: 8,
        crc: true,
    };

    /// Checks the parameters are within what the modem supports
    pub fn validate(&self) -> Result<()> {
        if !(7..=12).contains(&self.spreading_factor) {
            return Err(Error::config(format!(
                "spreading factor {} outside 7..=12",
                self.spreading_factor
            )));
        }
        if self.bandwidth_hz == 0 {
            return Err(Error::config("bandwidth must be non-zero"));
        }
        if !(5..=8).contains(&self.coding_rate_denom) {
            return Err(Error::config(format!(
                "coding rate 4/{} outside 4/5..=4/8",
                self.coding_rate_denom
            )));
        }
        if !(self.frequency_mhz.is_finite() && self.frequency_mhz > 0.0) {
            return Err(Error::config("frequency must be positive"));
        }
        Ok(())
    }

    /// Whether a frame sent with `self` can be demodulated by a receiver using `other`
    pub fn can_demodulate(&self, other: &RadioConfig) -> bool {
        self.frequency_mhz == other.frequency_mhz
            && self.spreading_factor == other.spreading_factor
            && self.bandwidth_hz == other.bandwidth_hz
            && self.preamble_len == other.preamble_len
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig::BASE
    }
}

impl fmt::Display for RadioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} MHz, SF{}, {} dBm, {} Hz, CR 4/{}, preamble {}, CRC {}",
            self.frequency_mhz,
            self.spreading_factor,
            self.tx_power_dbm,
            self.bandwidth_hz,
            self.coding_rate_denom,
            self.preamble_len,
            if self.crc { "on" } else { "off" },
        )
    }
}

/// Definition of a single packet-burst test.
///
/// Immutable once built. The peers that run it are recorded separately in a
/// [`NegotiatedTest`] by the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Short identifier, at most `TESTDEF_ID_LEN` bytes
    pub id: String,
    /// Scheduling tier, highest runs first
    pub exp_range: u8,
    /// Number of packets in the burst
    pub packet_cnt: u16,
    /// Wire length of each packet including the transport header
    pub packet_len: u8,
    /// Modulation used during the burst
    pub config: RadioConfig,
}

impl TestDefinition {
    /// Creates a definition, rejecting ids that don't fit the wire format
    pub fn new(
        id: impl Into<String>,
        exp_range: u8,
        packet_cnt: u16,
        packet_len: u8,
        config: RadioConfig,
    ) -> Result<Self> {
        let id = id.into();
        if id.len() > TESTDEF_ID_LEN {
            return Err(Error::config(format!(
                "test id '{}' longer than {} bytes",
                id, TESTDEF_ID_LEN
            )));
        }
        Ok(TestDefinition {
            id,
            exp_range,
            packet_cnt,
            packet_len,
            config,
        })
    }

    /// Rejects packet lengths the transport cannot carry
    pub fn validate_packet_len(&self) -> Result<()> {
        let len = self.packet_len as usize;
        if len < MIN_PACKET_LEN || len > MAX_PACKET_LEN {
            return Err(Error::config(format!(
                "packet length {} outside [{}, {}]",
                len, MIN_PACKET_LEN, MAX_PACKET_LEN
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TestDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (range {}, {} x {} bytes, {})",
            self.id, self.exp_range, self.packet_cnt, self.packet_len, self.config
        )
    }
}

/// Which side of a burst a node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstRole {
    /// Transmits the packets
    Sender,
    /// Listens and records statistics
    Receiver,
}

/// A test definition together with the peers the handshake paired for it
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedTest {
    pub definition: TestDefinition,
    pub master_id: Address,
    pub slave_id: Address,
}

impl NegotiatedTest {
    /// Address that transmits the burst
    pub fn transmitter(&self) -> Address {
        self.slave_id
    }

    /// Address that receives the burst
    pub fn receiver(&self) -> Address {
        self.master_id
    }

    /// Role `address` plays in the burst, if it takes part at all
    pub fn role_of(&self, address: Address) -> Option<BurstRole> {
        if address == self.transmitter() {
            Some(BurstRole::Sender)
        } else if address == self.receiver() {
            Some(BurstRole::Receiver)
        } else {
            None
        }
    }
}

/// Provisioned board identity, doubling as the node's radio address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoardId(pub u8);

/// Role a board is provisioned for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Slave,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Master => f.write_str("Master"),
            NodeRole::Slave => f.write_str("Slave"),
        }
    }
}

impl BoardId {
    const MASTER_FLAG: u8 = 0x80;
    const SLAVE_FLAG: u8 = 0x40;

    /// An id that never classifies as valid
    pub const INVALID: BoardId = BoardId(0xFF);

    pub fn is_master(&self) -> bool {
        self.0 & Self::MASTER_FLAG != 0
    }

    pub fn is_slave(&self) -> bool {
        self.0 & Self::SLAVE_FLAG != 0
    }

    /// Exactly one of the master and slave bits must be set
    pub fn is_valid(&self) -> bool {
        self.is_master() ^ self.is_slave()
    }

    pub fn role(&self) -> Option<NodeRole> {
        match (self.is_master(), self.is_slave()) {
            (true, false) => Some(NodeRole::Master),
            (false, true) => Some(NodeRole::Slave),
            _ => None,
        }
    }

    pub fn address(&self) -> Address {
        self.0
    }
}
