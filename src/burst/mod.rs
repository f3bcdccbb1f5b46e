//! Packet burst engine
//!
//! Once a test is negotiated, the slave switches to the test configuration
//! and transmits `packet_cnt` numbered packets while the master listens and
//! records signal statistics for every packet it accepts.

mod receiver;
mod sender;

pub use self::receiver::{receive_burst, ReceiveSummary};
pub use self::sender::send_burst;

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::{ProtocolConfig, TestDefinition, TRANSPORT_HEADER_LEN};
use crate::protocol::airtime::packet_timeout;
use crate::protocol::HEADER_LEN;

/// Repeating payload filler of every test packet
pub const FILLER_PATTERN: [u8; 4] = [0xF0, 0x0F, 0xAA, 0x55];

/// Payload that makes a test packet exactly `packet_len` bytes on the wire
pub fn filler_payload(packet_len: usize) -> Bytes {
    let len = packet_len.saturating_sub(TRANSPORT_HEADER_LEN + HEADER_LEN);
    let mut buf = BytesMut::with_capacity(len);
    for byte in FILLER_PATTERN.iter().cycle().take(len) {
        buf.put_u8(*byte);
    }
    buf.freeze()
}

/// Increase of the modem's 16-bit bad receive counter, allowing one wrap
pub fn bad_receive_delta(previous: u16, current: u16) -> u16 {
    current.wrapping_sub(previous)
}

/// How long the receiver listens for a whole burst.
///
/// One packet timeout per packet plus a spare one, plus the sender's settle
/// delay.
pub fn receive_window(definition: &TestDefinition, protocol: &ProtocolConfig) -> Duration {
    let per_packet = packet_timeout(&definition.config, definition.packet_len as usize, protocol);
    per_packet * (u32::from(definition.packet_cnt) + 1) + protocol.settle_delay
}
