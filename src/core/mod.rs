//! Core types and traits for the link test engine
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod cancel;
pub mod config;
pub mod error;
pub mod serde;
pub mod types;

pub use self::cancel::CancellationSignal;
pub use self::config::{NodeConfig, ProtocolConfig};
pub use self::error::{Error, Result};
pub use self::types::{
    Address, BoardId, BurstRole, NegotiatedTest, NodeRole, RadioConfig, TestDefinition,
    BROADCAST_ADDRESS,
};

/// Maximum length of a test definition id in bytes
pub const TESTDEF_ID_LEN: usize = 10;

/// Maximum number of test definitions in one scheduled run
pub const MAX_TESTDEFS: usize = 100;

/// Bytes the radio transport prepends to every frame (to, from, id, flags)
pub const TRANSPORT_HEADER_LEN: usize = 4;

/// Largest frame the transport accepts, excluding its own header
pub const MAX_FRAME_LEN: usize = 251;

/// Shortest test packet: transport header plus an empty message
pub const MIN_PACKET_LEN: usize = TRANSPORT_HEADER_LEN + crate::protocol::HEADER_LEN;

/// Longest test packet the modem can carry
pub const MAX_PACKET_LEN: usize = TRANSPORT_HEADER_LEN + MAX_FRAME_LEN;
