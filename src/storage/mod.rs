//! Storage collaborator
//!
//! Test definitions are loaded from, and burst results written to, a
//! [`TestStorage`]. [`DirectoryStorage`] keeps everything as plain files under a
//! root directory; [`MemoryStorage`] keeps it in memory for tests and demos.

mod directory;
mod memory;

pub use self::directory::{parse_testdef, testdef_id_from_file_name, CsvResultLog, DirectoryStorage};
pub use self::memory::{MemoryResultLog, MemoryStorage, RecordedTest};

use std::fmt;

use async_trait::async_trait;

use crate::core::{Result, TestDefinition};

/// Column names of a result log
pub const RESULT_FIELDS: [&str; 5] = ["id", "rssi", "snr", "failed_recv", "time_left"];

/// Column names of a test definition file
pub const TESTDEF_FIELDS: [&str; 10] = [
    "exp_range",
    "packet_cnt",
    "packet_len",
    "freq",
    "sf",
    "tx_dbm",
    "bw",
    "cr4_denom",
    "preamble_syms",
    "crc",
];

/// One accepted burst packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultRow {
    /// Sequence id carried by the packet
    pub sequence_id: u16,
    pub rssi: i16,
    pub snr: i16,
    /// Bad receives counted since the burst started
    pub failed_receives: u32,
    /// Time left in the receive window when the packet arrived
    pub time_left_ms: u64,
}

impl fmt::Display for ResultRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.sequence_id, self.rssi, self.snr, self.failed_receives, self.time_left_ms
        )
    }
}

/// Closing count of a result log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultSummary {
    pub received: u16,
    pub expected: u16,
}

impl fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "# received {}/{}", self.received, self.expected)
    }
}

/// Appendable log of one test's results
#[async_trait]
pub trait ResultSink: Send {
    /// Appends one accepted packet
    async fn write_row(&mut self, row: &ResultRow) -> Result<()>;

    /// Closes the log with the received packet count
    async fn write_summary(&mut self, summary: &ResultSummary) -> Result<()>;
}

/// Source of test definitions and destination of results
#[async_trait]
pub trait TestStorage: Send + Sync {
    type Sink: ResultSink;

    /// Loads at most `MAX_TESTDEFS` definitions in a stable order
    async fn load_testdefs(&self) -> Result<Vec<TestDefinition>>;

    /// Opens a fresh result log for `test_id`, replacing any previous one
    async fn init_result_log(&self, test_id: &str) -> Result<Self::Sink>;

    /// Appends a line to the run log
    async fn append_log(&self, line: &str) -> Result<()>;
}
