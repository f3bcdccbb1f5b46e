//! Radio transport seam and the per-node radio context
//!
//! The addressed send/receive/ack primitives belong to an external transport
//! behind [`RadioTransport`]. [`RadioModule`] wraps one transport together with
//! the node's cancellation signal and adds the bounded, cancellable retry and
//! polling loops the protocol relies on.

mod module;
pub mod simulated;

pub use self::module::RadioModule;
pub use self::simulated::{LinkSettings, SimulatedLink, SimulatedTransport, Transmission};

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::{Address, RadioConfig, Result};

/// One addressed frame as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
}

/// Signal statistics of the most recent reception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RfStats {
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Signal to noise ratio in dB
    pub snr: i16,
    /// Frames that failed to decode since power up, wraps at 16 bits
    pub bad_receive_count: u16,
}

/// Addressed radio transport provided by the driver layer
#[async_trait]
pub trait RadioTransport: Send {
    /// Address this transport sends from
    fn address(&self) -> Address;

    /// Applies a modulation configuration to the modem
    async fn configure(&mut self, config: &RadioConfig) -> Result<()>;

    /// Best-effort send, returns once the frame has left the modem
    async fn send(&mut self, to: Address, data: &[u8]) -> Result<()>;

    /// Single acknowledged send attempt, fails if no transport ack arrives
    async fn send_acknowledged(&mut self, to: Address, data: &[u8]) -> Result<()>;

    /// Waits up to `timeout` for a frame addressed to us or broadcast.
    /// With `acknowledge` set, a frame sent with an ack request is acknowledged.
    async fn recv(&mut self, timeout: Duration, acknowledge: bool) -> Result<Option<Datagram>>;

    /// RSSI of the last received frame
    fn last_rssi(&self) -> i16;

    /// SNR of the last received frame
    fn last_snr(&self) -> i16;

    /// Count of frames that failed to decode
    fn bad_receive_count(&self) -> u16;
}
