use std::time::Duration;

use tracing::{debug, info, warn};

use crate::burst::send_burst;
use crate::core::{Address, Error, NegotiatedTest, Result};
use crate::protocol::handshake::{accept_test, answer_heartbeat, wait_for_command};
use crate::protocol::CommandType;
use crate::radio::{RadioModule, RadioTransport};
use crate::util::as_millis;

/// What a responder did for one command
#[derive(Debug, Clone, PartialEq)]
pub enum Served {
    /// Negotiated a test and transmitted its burst
    Test {
        session: NegotiatedTest,
        elapsed: Duration,
    },
    /// Acknowledged a heartbeat
    Heartbeat { from: Address },
}

/// Counters kept by [`Responder::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponderStats {
    pub tests: u32,
    pub heartbeats: u32,
    pub failures: u32,
}

/// Slave side: answers test requests and heartbeats from masters
pub struct Responder<T> {
    radio: RadioModule<T>,
}

impl<T: RadioTransport> Responder<T> {
    pub fn new(radio: RadioModule<T>) -> Self {
        Responder { radio }
    }

    pub fn radio(&self) -> &RadioModule<T> {
        &self.radio
    }

    pub fn into_inner(self) -> RadioModule<T> {
        self.radio
    }

    /// Waits for one command on the base configuration and serves it
    pub async fn serve_once(&mut self) -> Result<Served> {
        self.radio.reset_to_base_config().await?;
        let command = wait_for_command(&mut self.radio).await?;

        match command.kind {
            CommandType::TestDef => {
                let session = accept_test(&mut self.radio, command.from).await?;
                let sent = send_burst(&mut self.radio, &session).await;
                if let Err(e) = self.radio.reset_to_base_config().await {
                    warn!(error = %e, "failed to restore base configuration");
                }
                Ok(Served::Test {
                    session,
                    elapsed: sent?,
                })
            }
            CommandType::Heartbeat => {
                answer_heartbeat(&mut self.radio, command.from).await?;
                Ok(Served::Heartbeat { from: command.from })
            }
            CommandType::Invalid => Err(Error::protocol_violation("unrecognised command")),
        }
    }

    /// Serves commands until the cancellation signal is set.
    ///
    /// Failed exchanges are counted and the responder goes back to waiting.
    pub async fn run(&mut self) -> Result<ResponderStats> {
        let mut stats = ResponderStats::default();
        info!(address = self.radio.address(), "responder started");

        loop {
            match self.serve_once().await {
                Ok(Served::Test { session, elapsed }) => {
                    stats.tests += 1;
                    debug!(test = %session.definition.id, elapsed_ms = as_millis(elapsed), "test served");
                }
                Ok(Served::Heartbeat { from }) => {
                    stats.heartbeats += 1;
                    debug!(from, "heartbeat served");
                }
                Err(Error::Cancelled) => {
                    info!(?stats, "responder stopped");
                    return Ok(stats);
                }
                Err(e) => {
                    stats.failures += 1;
                    warn!(error = %e, "command failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Instant};
    use crate::core::{CancellationSignal, ProtocolConfig, RadioConfig, TestDefinition};
    use crate::protocol::handshake::{negotiate, send_heartbeat};
    use crate::radio::{LinkSettings, SimulatedLink, SimulatedTransport};

    async fn radio(link: &SimulatedLink, address: Address) -> RadioModule<SimulatedTransport> {
        RadioModule::new(
            link.endpoint(address).await,
            RadioConfig::BASE,
            ProtocolConfig::default(),
            CancellationSignal::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_serves_heartbeat() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut master = radio(&link, 0x81).await;
        let mut responder = Responder::new(radio(&link, 0x41).await);

        let (served, alive) = tokio::join!(responder.serve_once(), async {
            // Let the responder settle on the base configuration first
            sleep(Duration::from_millis(10)).await;
            send_heartbeat(&mut master).await
        });
        assert_eq!(served.unwrap(), Served::Heartbeat { from: 0x81 });
        assert!(alive.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_serves_test_and_returns_to_base() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut master = radio(&link, 0x81).await;
        let mut responder = Responder::new(radio(&link, 0x41).await);
        let config = RadioConfig {
            spreading_factor: 8,
            ..RadioConfig::BASE
        };
        let def = TestDefinition::new("resp", 0, 2, 20, config).unwrap();

        let (served, negotiated) = tokio::join!(responder.serve_once(), async {
            sleep(Duration::from_millis(10)).await;
            negotiate(&mut master, &def).await
        });

        let negotiated = negotiated.unwrap();
        match served.unwrap() {
            Served::Test { session, elapsed } => {
                assert_eq!(session, negotiated);
                assert_eq!(elapsed, Duration::from_millis(1200));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(responder.radio().current_config(), &RadioConfig::BASE);
        assert_eq!(link.transmissions().await.iter().filter(|t| t.config == config).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut responder = Responder::new(radio(&link, 0x41).await);
        let cancel = responder.radio().cancel_signal().clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(2000)).await;
            cancel.set();
        });

        let start = Instant::now();
        let stats = responder.run().await.unwrap();
        assert_eq!(stats, ResponderStats::default());
        assert!(start.elapsed() <= Duration::from_millis(2500));
    }
}
