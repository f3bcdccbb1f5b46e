use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::burst::receive_burst;
use crate::core::{CancellationSignal, Error, Result, TestDefinition, MAX_TESTDEFS};
use crate::protocol::handshake::negotiate;
use crate::radio::{RadioModule, RadioTransport};
use crate::storage::TestStorage;

/// Executes a single test definition on behalf of the scheduler
#[async_trait]
pub trait TestRunner: Send {
    /// Runs `definition` and returns the number of packets received
    async fn run_test(&mut self, definition: &TestDefinition) -> Result<u16>;
}

/// Why a scheduled run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every definition was attempted
    Exhausted,
    /// A tier produced no packets, so lower tiers were abandoned
    GaveUp {
        /// Tier that came back empty
        tier: u8,
    },
    /// The cancellation signal was set
    Cancelled,
}

/// Result of one attempted definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    /// Position in the loaded definition list
    pub index: usize,
    pub test_id: String,
    pub exp_range: u8,
    pub received: u16,
    /// Error that ended the attempt, if any
    pub error: Option<String>,
}

/// Summary of a scheduled run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Attempts in execution order
    pub outcomes: Vec<TestOutcome>,
    pub stop: StopReason,
}

impl ScheduleReport {
    /// Ids in the order they were run
    pub fn executed_ids(&self) -> Vec<&str> {
        self.outcomes.iter().map(|o| o.test_id.as_str()).collect()
    }
}

/// Tiered scheduler for a master's test definitions.
///
/// The highest `exp_range` still pending runs next, ties going to the lowest
/// index. When the selection drops to a lower tier, packets received at the
/// tier just left are inspected once the first lower-tier definition has
/// run: if the left tier received nothing the run ends there.
///
/// The give-up therefore never skips that first lower-tier definition, even
/// when it turns out productive. With tiers `[30, 20, 10]` and nothing heard
/// at 30, the 20 still runs and the run stops before 10 with
/// `GaveUp { tier: 30 }`.
pub struct TestScheduler {
    definitions: Vec<TestDefinition>,
    completed: Vec<bool>,
    last_tier: Option<u8>,
    packets_at_tier: u32,
    cancel: CancellationSignal,
}

impl TestScheduler {
    /// Creates a scheduler, refusing more than `MAX_TESTDEFS` definitions
    pub fn new(definitions: Vec<TestDefinition>, cancel: CancellationSignal) -> Result<Self> {
        if definitions.len() > MAX_TESTDEFS {
            return Err(Error::config(format!(
                "{} test definitions exceed the limit of {}",
                definitions.len(),
                MAX_TESTDEFS
            )));
        }
        Ok(TestScheduler {
            completed: vec![false; definitions.len()],
            definitions,
            last_tier: None,
            packets_at_tier: 0,
            cancel,
        })
    }

    /// Creates a scheduler over the definitions held by `storage`
    pub async fn from_storage<S: TestStorage>(storage: &S, cancel: CancellationSignal) -> Result<Self> {
        let definitions = storage.load_testdefs().await?;
        Self::new(definitions, cancel)
    }

    pub fn definitions(&self) -> &[TestDefinition] {
        &self.definitions
    }

    /// Index of the definition that would run next
    pub fn next_index(&self) -> Option<usize> {
        self.definitions
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.completed[*i])
            // max_by_key keeps the last maximum, so compare reversed indices
            .max_by_key(|(i, def)| (def.exp_range, std::cmp::Reverse(*i)))
            .map(|(i, _)| i)
    }

    /// Runs definitions until all are attempted, a tier comes back empty, or
    /// the node is cancelled. Failures of single definitions are recorded and
    /// do not stop the run.
    pub async fn run<R: TestRunner + ?Sized>(&mut self, runner: &mut R) -> ScheduleReport {
        let mut outcomes = Vec::new();

        let stop = loop {
            if self.cancel.is_set() {
                info!("scheduled run cancelled");
                break StopReason::Cancelled;
            }
            let Some(index) = self.next_index() else {
                info!(attempted = outcomes.len(), "all test definitions attempted");
                break StopReason::Exhausted;
            };

            let definition = self.definitions[index].clone();
            let tier = definition.exp_range;

            let mut exited_empty = None;
            if let Some(last) = self.last_tier {
                if tier < last {
                    debug!(from = last, to = tier, packets = self.packets_at_tier, "changing tier");
                    if self.packets_at_tier == 0 {
                        exited_empty = Some(last);
                    }
                    self.packets_at_tier = 0;
                }
            }

            info!(test = %definition, "running test definition");
            let (received, error) = match runner.run_test(&definition).await {
                Ok(received) => (received, None),
                Err(e) => {
                    warn!(test = %definition.id, error = %e, "test definition failed");
                    (0, Some(e.to_string()))
                }
            };

            self.packets_at_tier += u32::from(received);
            self.completed[index] = true;
            self.last_tier = Some(tier);
            outcomes.push(TestOutcome {
                index,
                test_id: definition.id.clone(),
                exp_range: tier,
                received,
                error,
            });

            if let Some(empty_tier) = exited_empty {
                info!(tier = empty_tier, "no packets received at previous tier, giving up");
                break StopReason::GaveUp { tier: empty_tier };
            }
        };

        ScheduleReport { outcomes, stop }
    }
}

/// Runs definitions over a radio as the master: handshake, then receive the
/// burst into a fresh result log.
pub struct RadioTestRunner<T, S> {
    radio: RadioModule<T>,
    storage: S,
}

impl<T: RadioTransport, S: TestStorage> RadioTestRunner<T, S> {
    pub fn new(radio: RadioModule<T>, storage: S) -> Self {
        RadioTestRunner { radio, storage }
    }

    pub fn radio(&self) -> &RadioModule<T> {
        &self.radio
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_parts(self) -> (RadioModule<T>, S) {
        (self.radio, self.storage)
    }

    async fn negotiate_and_receive(&mut self, definition: &TestDefinition) -> Result<u16> {
        self.radio.reset_to_base_config().await?;
        let session = negotiate(&mut self.radio, definition).await?;

        let mut sink = self.storage.init_result_log(&definition.id).await?;
        let summary = receive_burst(&mut self.radio, &session, &mut sink).await?;

        self.storage
            .append_log(&format!(
                "{}: received {}/{} from 0x{:02X}{}",
                definition.id,
                summary.received,
                definition.packet_cnt,
                session.slave_id,
                if summary.completed { "" } else { " (cancelled)" }
            ))
            .await?;

        if !summary.completed {
            return Err(Error::Cancelled);
        }
        Ok(summary.received)
    }
}

#[async_trait]
impl<T, S> TestRunner for RadioTestRunner<T, S>
where
    T: RadioTransport,
    S: TestStorage,
{
    async fn run_test(&mut self, definition: &TestDefinition) -> Result<u16> {
        let result = self.negotiate_and_receive(definition).await;
        if let Err(e) = self.radio.reset_to_base_config().await {
            warn!(error = %e, "failed to restore base configuration");
        }
        result
    }
}
