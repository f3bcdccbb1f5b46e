//! Link test protocol
//!
//! This module defines the test messages and their wire encoding, LoRa airtime
//! arithmetic, and the handshake state machines run before every burst.

pub mod airtime;
pub mod codec;
pub mod handshake;
pub mod message;

pub use self::codec::MessageCodec;
pub use self::handshake::{Command, Initiator, InitiatorState};
pub use self::message::{CommandType, Message, MessageFrame, MessageHeader, MessageType, HEADER_LEN};
