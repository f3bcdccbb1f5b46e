use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::{Result, TestDefinition, MAX_TESTDEFS};
use super::{ResultRow, ResultSink, ResultSummary, TestStorage};

/// Everything written for one test
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedTest {
    pub rows: Vec<ResultRow>,
    pub summary: Option<ResultSummary>,
}

#[derive(Debug, Default)]
struct Records {
    results: HashMap<String, RecordedTest>,
    log: Vec<String>,
}

/// In-memory storage. Clones share the same recorded results.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    definitions: Vec<TestDefinition>,
    records: Arc<Mutex<Records>>,
}

impl MemoryStorage {
    pub fn new(definitions: Vec<TestDefinition>) -> Self {
        MemoryStorage {
            definitions,
            records: Arc::default(),
        }
    }

    /// Results recorded for `test_id`, if a log was ever opened
    pub async fn results(&self, test_id: &str) -> Option<RecordedTest> {
        self.records.lock().await.results.get(test_id).cloned()
    }

    pub async fn log_lines(&self) -> Vec<String> {
        self.records.lock().await.log.clone()
    }
}

#[async_trait]
impl TestStorage for MemoryStorage {
    type Sink = MemoryResultLog;

    async fn load_testdefs(&self) -> Result<Vec<TestDefinition>> {
        Ok(self.definitions.iter().take(MAX_TESTDEFS).cloned().collect())
    }

    async fn init_result_log(&self, test_id: &str) -> Result<MemoryResultLog> {
        self.records
            .lock()
            .await
            .results
            .insert(test_id.to_string(), RecordedTest::default());
        Ok(MemoryResultLog {
            test_id: test_id.to_string(),
            records: Arc::clone(&self.records),
        })
    }

    async fn append_log(&self, line: &str) -> Result<()> {
        self.records.lock().await.log.push(line.to_string());
        Ok(())
    }
}

/// Result log backed by a [`MemoryStorage`]
#[derive(Debug)]
pub struct MemoryResultLog {
    test_id: String,
    records: Arc<Mutex<Records>>,
}

#[async_trait]
impl ResultSink for MemoryResultLog {
    async fn write_row(&mut self, row: &ResultRow) -> Result<()> {
        let mut records = self.records.lock().await;
        records
            .results
            .entry(self.test_id.clone())
            .or_default()
            .rows
            .push(*row);
        Ok(())
    }

    async fn write_summary(&mut self, summary: &ResultSummary) -> Result<()> {
        let mut records = self.records.lock().await;
        records
            .results
            .entry(self.test_id.clone())
            .or_default()
            .summary = Some(*summary);
        Ok(())
    }
}
