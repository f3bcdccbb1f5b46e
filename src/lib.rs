//! LoRa link test: master/slave characterisation of point-to-point LoRa links
//!
//! A master node negotiates each of its test definitions with a slave over a
//! shared base configuration, then listens while the slave transmits a burst
//! of numbered packets on the test's own modulation. Signal statistics of
//! every received packet are written to storage, and definitions are worked
//! through in tiers so a run stops early once a whole tier comes back empty.
pub mod core;

pub mod burst;
pub mod protocol;
pub mod radio;
pub mod scheduler;
pub mod storage;
pub mod util;

// Re-export commonly used items
pub use crate::core::{CancellationSignal, Error, NodeConfig, ProtocolConfig, RadioConfig, Result, TestDefinition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
