use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::core::{Error, RadioConfig, Result, TestDefinition, MAX_TESTDEFS, TESTDEF_ID_LEN};
use super::{ResultRow, ResultSink, ResultSummary, TestStorage, RESULT_FIELDS, TESTDEF_FIELDS};

const TESTDEF_DIR: &str = "testdefs";
const RESULTS_DIR: &str = "results";
const FORMAT_FILE: &str = "_format.txt";
const LOG_FILE: &str = "_log.txt";

/// Test definitions and results kept as files under a root directory.
///
/// ```text
/// <root>/testdefs/<id>.txt      one definition per file, `_` prefixed files ignored
/// <root>/testdefs/_format.txt   field order reminder
/// <root>/results/<id>.csv       one result log per test
/// <root>/_log.txt               timestamped run log
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn testdef_dir(&self) -> PathBuf {
        self.root.join(TESTDEF_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Creates the expected directories and the format helper if missing
    pub async fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.testdef_dir()).await?;
        fs::create_dir_all(self.results_dir()).await?;

        let format_path = self.testdef_dir().join(FORMAT_FILE);
        if !fs::try_exists(&format_path).await? {
            let mut line = TESTDEF_FIELDS.join(",");
            line.push(',');
            fs::write(&format_path, line).await?;
            debug!(path = %format_path.display(), "format helper written");
        }
        Ok(())
    }

    async fn testdef_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let dir = self.testdef_dir();
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            Error::storage(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if name.starts_with('_') {
                debug!(file = %name, "ignored");
                continue;
            }
            files.push((name, entry.path()));
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl TestStorage for DirectoryStorage {
    type Sink = CsvResultLog;

    async fn load_testdefs(&self) -> Result<Vec<TestDefinition>> {
        let mut definitions = Vec::new();

        for (name, path) in self.testdef_files().await? {
            if definitions.len() == MAX_TESTDEFS {
                warn!(limit = MAX_TESTDEFS, "test definition limit reached, remaining files skipped");
                break;
            }
            let text = fs::read_to_string(&path).await?;
            let id = testdef_id_from_file_name(&name);
            match parse_testdef(&id, &text) {
                Ok(definition) => {
                    debug!(file = %name, test = %definition, "found");
                    definitions.push(definition);
                }
                Err(e) => warn!(file = %name, error = %e, "failed to load test definition"),
            }
        }

        info!(count = definitions.len(), "test definitions loaded");
        Ok(definitions)
    }

    async fn init_result_log(&self, test_id: &str) -> Result<CsvResultLog> {
        let path = self.results_dir().join(format!("{}.csv", test_id));
        let mut file = File::create(&path)
            .await
            .map_err(|e| Error::storage(format!("cannot create {}: {}", path.display(), e)))?;

        let header = format!("{}\n", RESULT_FIELDS.join(","));
        file.write_all(header.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %path.display(), "result log initialised");

        Ok(CsvResultLog { file, path })
    }

    async fn append_log(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .await?;
        let stamped = format!("{} {}\n", Utc::now().format("[%Y-%m-%d] %H:%M:%S"), line);
        file.write_all(stamped.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Result log written as CSV, flushed after every row
#[derive(Debug)]
pub struct CsvResultLog {
    file: File,
    path: PathBuf,
}

impl CsvResultLog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_line(&mut self, line: String) -> Result<()> {
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for CsvResultLog {
    async fn write_row(&mut self, row: &ResultRow) -> Result<()> {
        self.write_line(format!("{}\n", row)).await
    }

    async fn write_summary(&mut self, summary: &ResultSummary) -> Result<()> {
        self.write_line(format!("{}\n", summary)).await
    }
}

/// Test id for a definition file: the name up to the first `.`, at most
/// `TESTDEF_ID_LEN` bytes
pub fn testdef_id_from_file_name(name: &str) -> String {
    let stem = name.split('.').next().unwrap_or_default();
    let mut end = stem.len().min(TESTDEF_ID_LEN);
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    stem[..end].to_string()
}

/// Parses the comma separated body of a definition file.
///
/// Fields follow [`TESTDEF_FIELDS`]; a trailing comma and surrounding
/// whitespace are accepted.
pub fn parse_testdef(id: &str, text: &str) -> Result<TestDefinition> {
    let body = text.trim();
    let body = body.strip_suffix(',').unwrap_or(body);
    let fields: Vec<&str> = body.split(',').map(str::trim).collect();

    if fields.len() != TESTDEF_FIELDS.len() {
        return Err(Error::storage(format!(
            "expected {} fields, found {}",
            TESTDEF_FIELDS.len(),
            fields.len()
        )));
    }

    let config = RadioConfig {
        frequency_mhz: field(&fields, 3)?,
        spreading_factor: field(&fields, 4)?,
        tx_power_dbm: field(&fields, 5)?,
        bandwidth_hz: field(&fields, 6)?,
        coding_rate_denom: field(&fields, 7)?,
        preamble_len: field(&fields, 8)?,
        crc: parse_flag(fields[9])?,
    };
    config.validate()?;

    let definition = TestDefinition::new(
        id,
        field(&fields, 0)?,
        field(&fields, 1)?,
        field(&fields, 2)?,
        config,
    )?;
    definition.validate_packet_len()?;
    Ok(definition)
}

fn field<T>(fields: &[&str], index: usize) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fields[index].parse().map_err(|e| {
        Error::storage(format!(
            "invalid {} '{}': {}",
            TESTDEF_FIELDS[index], fields[index], e
        ))
    })
}

fn parse_flag(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => other
            .parse::<i64>()
            .map(|v| v != 0)
            .map_err(|_| Error::storage(format!("invalid crc '{}'", other))),
    }
}
