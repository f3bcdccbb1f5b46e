use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{
    Address, Error, NegotiatedTest, Result, TestDefinition, BROADCAST_ADDRESS,
};
use crate::radio::{RadioModule, RadioTransport};
use super::message::{CommandType, Message, MessageType};

/// States of the initiating (master) side of the test handshake
#[derive(Debug, Clone, PartialEq)]
pub enum InitiatorState {
    /// Broadcast a query for a ready peer
    SendQuery,
    /// Wait for a peer to answer the query
    WaitReady,
    /// Hand the definition to the peer that answered
    SendDefinition {
        /// Peer that replied ready
        slave_id: Address,
    },
    /// Handshake completed
    Done(NegotiatedTest),
    /// Handshake abandoned
    Failed,
}

impl InitiatorState {
    /// Short name of the state for logging
    pub fn name(&self) -> &'static str {
        match self {
            InitiatorState::SendQuery => "SendQuery",
            InitiatorState::WaitReady => "WaitReady",
            InitiatorState::SendDefinition { .. } => "SendDefinition",
            InitiatorState::Done(_) => "Done",
            InitiatorState::Failed => "Failed",
        }
    }
}

/// Initiator side of the query, ready, definition exchange
pub struct Initiator<'a, T> {
    /// Radio used for the exchange
    radio: &'a mut RadioModule<T>,
    /// Definition being offered
    definition: &'a TestDefinition,
    /// Current state
    state: InitiatorState,
    /// Queries sent so far
    query_rounds: u32,
}

impl<'a, T: RadioTransport> Initiator<'a, T> {
    /// Creates an initiator in the `SendQuery` state
    pub fn new(radio: &'a mut RadioModule<T>, definition: &'a TestDefinition) -> Self {
        Initiator {
            radio,
            definition,
            state: InitiatorState::SendQuery,
            query_rounds: 0,
        }
    }

    pub fn state(&self) -> &InitiatorState {
        &self.state
    }

    /// Number of query transmissions attempted
    pub fn query_rounds(&self) -> u32 {
        self.query_rounds
    }

    /// Drives the state machine until it completes or fails
    pub async fn run(mut self) -> Result<NegotiatedTest> {
        loop {
            if let InitiatorState::Done(session) = &self.state {
                return Ok(session.clone());
            }
            self.step().await?;
        }
    }

    /// Performs a single state transition.
    ///
    /// Any error leaves the machine in `Failed`.
    pub async fn step(&mut self) -> Result<()> {
        let result = match self.state.clone() {
            InitiatorState::SendQuery => self.send_query().await,
            InitiatorState::WaitReady => self.wait_ready().await,
            InitiatorState::SendDefinition { slave_id } => self.send_definition(slave_id).await,
            InitiatorState::Done(_) => Ok(()),
            InitiatorState::Failed => Err(Error::protocol_violation("handshake already failed")),
        };

        if result.is_err() {
            self.state = InitiatorState::Failed;
        }
        result
    }

    async fn send_query(&mut self) -> Result<()> {
        if self.radio.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(max) = self.radio.protocol().max_query_rounds {
            if self.query_rounds >= max {
                warn!(rounds = self.query_rounds, "no peer answered queries");
                return Err(Error::timeout(format!("no ready peer after {} queries", max)));
            }
        }

        self.query_rounds += 1;
        debug!(round = self.query_rounds, "sending query to slaves");
        match self
            .radio
            .send_unacknowledged(BROADCAST_ADDRESS, Message::query())
            .await
        {
            Ok(()) => {
                self.state = InitiatorState::WaitReady;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "query transmission failed, retrying");
                let delay = self.radio.protocol().query_retry_delay;
                self.radio.pause(delay).await
            }
        }
    }

    async fn wait_ready(&mut self) -> Result<()> {
        let timeout = self.radio.protocol().ready_timeout;
        let own = self.radio.address();

        match self.radio.receive(Some(timeout), true).await? {
            Some(frame)
                if frame.message_type() == MessageType::TestReady
                    && frame.from != BROADCAST_ADDRESS
                    && frame.to == own =>
            {
                debug!(slave = frame.from, "ready received");
                self.state = InitiatorState::SendDefinition { slave_id: frame.from };
            }
            Some(frame) => {
                debug!(from = frame.from, message_type = ?frame.message_type(), "received message is not a ready");
                self.state = InitiatorState::SendQuery;
            }
            None => {
                debug!("no ready before timeout");
                self.state = InitiatorState::SendQuery;
            }
        }
        Ok(())
    }

    async fn send_definition(&mut self, slave_id: Address) -> Result<()> {
        let message = Message::definition(self.definition)?;
        let attempts = self.radio.protocol().ack_attempts;

        debug!(slave = slave_id, test = %self.definition.id, "sending test definition");
        self.radio
            .send_acknowledged(slave_id, message, attempts)
            .await?;

        let session = NegotiatedTest {
            definition: self.definition.clone(),
            master_id: self.radio.address(),
            slave_id,
        };
        info!(test = %session.definition.id, slave = slave_id, "test definition accepted");
        self.state = InitiatorState::Done(session);
        Ok(())
    }
}

/// Negotiates `definition` with whichever peer answers first
pub async fn negotiate<T: RadioTransport>(
    radio: &mut RadioModule<T>,
    definition: &TestDefinition,
) -> Result<NegotiatedTest> {
    Initiator::new(radio, definition).run().await
}

/// A recognised request addressed to a responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandType,
    pub from: Address,
}

/// Blocks until a peer sends a recognised command.
///
/// Frames from the broadcast address and unrecognised types are ignored.
pub async fn wait_for_command<T: RadioTransport>(radio: &mut RadioModule<T>) -> Result<Command> {
    loop {
        let Some(frame) = radio.receive(None, false).await? else {
            continue;
        };
        if frame.from == BROADCAST_ADDRESS {
            continue;
        }
        let kind = CommandType::from(frame.message_type());
        if kind != CommandType::Invalid {
            debug!(from = frame.from, ?kind, "command received");
            return Ok(Command {
                kind,
                from: frame.from,
            });
        }
    }
}

/// Responder side of a test handshake started by `master_id`.
///
/// Replies ready, then expects the definition from the same master. Any
/// mismatch or timeout fails the exchange; the caller restarts by waiting for
/// the next command.
pub async fn accept_test<T: RadioTransport>(
    radio: &mut RadioModule<T>,
    master_id: Address,
) -> Result<NegotiatedTest> {
    let own = radio.address();
    let attempts = radio.protocol().ack_attempts;
    let timeout = radio.protocol().definition_timeout;

    debug!(master = master_id, "responding with ready");
    radio
        .send_acknowledged(master_id, Message::ready(), attempts)
        .await?;

    let frame = radio
        .receive(Some(timeout), true)
        .await?
        .ok_or_else(|| Error::timeout("no test definition from master"))?;

    if !frame.matches(MessageType::TestDefinition, master_id, own) {
        return Err(Error::protocol_violation(format!(
            "expected definition from 0x{:02X}, got {:?} from 0x{:02X}",
            master_id,
            frame.message_type(),
            frame.from
        )));
    }

    let definition = frame.message.to_definition()?;
    info!(test = %definition.id, master = master_id, "test definition received");
    Ok(NegotiatedTest {
        definition,
        master_id,
        slave_id: own,
    })
}

/// Broadcasts a heartbeat and reports whether any peer acknowledged it
pub async fn send_heartbeat<T: RadioTransport>(radio: &mut RadioModule<T>) -> Result<bool> {
    if let Err(e) = radio
        .send_unacknowledged(BROADCAST_ADDRESS, Message::heartbeat())
        .await
    {
        warn!(error = %e, "heartbeat transmission failed");
        return Ok(false);
    }

    let own = radio.address();
    let deadline = Instant::now() + radio.protocol().heartbeat_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("heartbeat not acknowledged");
            return Ok(false);
        }
        match radio.receive(Some(remaining), false).await? {
            Some(frame) if frame.message_type() == MessageType::Ack && frame.to == own => {
                debug!(from = frame.from, "heartbeat acknowledged");
                return Ok(true);
            }
            Some(_) => continue,
            None => {
                debug!("heartbeat not acknowledged");
                return Ok(false);
            }
        }
    }
}

/// Answers a heartbeat with a single best-effort ack
pub async fn answer_heartbeat<T: RadioTransport>(radio: &mut RadioModule<T>, to: Address) -> Result<()> {
    debug!(to, "acknowledging heartbeat");
    radio.send_unacknowledged(to, Message::ack()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;
    use async_trait::async_trait;
    use tokio::time::sleep;
    use crate::core::{CancellationSignal, ProtocolConfig, RadioConfig};
    use crate::protocol::MessageCodec;
    use crate::radio::{Datagram, LinkSettings, SimulatedLink, SimulatedTransport};

    const MASTER: Address = 0x81;
    const SLAVE: Address = 0x41;

    async fn radio_with(
        link: &SimulatedLink,
        address: Address,
        protocol: ProtocolConfig,
    ) -> RadioModule<SimulatedTransport> {
        RadioModule::new(
            link.endpoint(address).await,
            RadioConfig::BASE,
            protocol,
            CancellationSignal::new(),
        )
        .await
        .unwrap()
    }

    async fn radio(link: &SimulatedLink, address: Address) -> RadioModule<SimulatedTransport> {
        radio_with(link, address, ProtocolConfig::default()).await
    }

    fn definition() -> TestDefinition {
        let mut config = RadioConfig::BASE;
        config.spreading_factor = 7;
        TestDefinition::new("Test_A", 2, 10, 60, config).unwrap()
    }

    async fn query_count(link: &SimulatedLink) -> usize {
        link.transmissions()
            .await
            .iter()
            .filter(|t| t.data.first() == Some(&u8::from(MessageType::TestQuery)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_handshake() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut master = radio(&link, MASTER).await;
        let mut slave = radio(&link, SLAVE).await;
        let def = definition();

        let (offered, accepted) = tokio::join!(negotiate(&mut master, &def), async {
            let command = wait_for_command(&mut slave).await?;
            assert_eq!(command.kind, CommandType::TestDef);
            accept_test(&mut slave, command.from).await
        });

        let offered = offered.unwrap();
        let accepted = accepted.unwrap();
        assert_eq!(offered, accepted);
        assert_eq!(offered.master_id, MASTER);
        assert_eq!(offered.slave_id, SLAVE);
        assert_eq!(accepted.definition, def);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_timeout_requeries() {
        let link = SimulatedLink::new(LinkSettings::default());
        let protocol = ProtocolConfig {
            max_query_rounds: Some(2),
            ..Default::default()
        };
        let mut master = radio_with(&link, MASTER, protocol).await;
        let def = definition();

        let start = Instant::now();
        let result = negotiate(&mut master, &def).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(query_count(&link).await, 2);
        assert_eq!(start.elapsed(), Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queries_until_cancelled() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut master = radio(&link, MASTER).await;
        let cancel = master.cancel_signal().clone();
        let def = definition();

        tokio::spawn(async move {
            sleep(Duration::from_millis(7000)).await;
            cancel.set();
        });

        let start = Instant::now();
        let result = negotiate(&mut master, &def).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() <= Duration::from_millis(7500));
        assert!(query_count(&link).await >= 2);
    }

    /// Transport whose first send fails and which never hears anything
    struct FlakyTransport {
        failures_left: u32,
        send_times: Arc<StdMutex<Vec<Duration>>>,
        start: Instant,
    }

    #[async_trait]
    impl RadioTransport for FlakyTransport {
        fn address(&self) -> Address {
            MASTER
        }

        async fn configure(&mut self, _config: &RadioConfig) -> Result<()> {
            Ok(())
        }

        async fn send(&mut self, _to: Address, _data: &[u8]) -> Result<()> {
            self.send_times.lock().unwrap().push(self.start.elapsed());
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(Error::transport("modem busy"));
            }
            Ok(())
        }

        async fn send_acknowledged(&mut self, _to: Address, _data: &[u8]) -> Result<()> {
            Err(Error::transport("no ack"))
        }

        async fn recv(&mut self, timeout: Duration, _acknowledge: bool) -> Result<Option<Datagram>> {
            sleep(timeout).await;
            Ok(None)
        }

        fn last_rssi(&self) -> i16 {
            0
        }

        fn last_snr(&self) -> i16 {
            0
        }

        fn bad_receive_count(&self) -> u16 {
            0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_query_send_retried_after_delay() {
        let send_times = Arc::new(StdMutex::new(Vec::new()));
        let transport = FlakyTransport {
            failures_left: 1,
            send_times: Arc::clone(&send_times),
            start: Instant::now(),
        };
        let protocol = ProtocolConfig {
            max_query_rounds: Some(3),
            ..Default::default()
        };
        let mut master = RadioModule::new(transport, RadioConfig::BASE, protocol, CancellationSignal::new())
            .await
            .unwrap();
        let def = definition();

        let result = negotiate(&mut master, &def).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        let times: Vec<u128> = send_times.lock().unwrap().iter().map(|t| t.as_millis()).collect();
        // Failed send at 0, retry after 500 ms, then one ready wait of 3000 ms
        assert_eq!(times, vec![0, 500, 3500]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_reply_returns_to_query() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut master = radio(&link, MASTER).await;
        let mut other = link.endpoint(SLAVE).await;
        let def = definition();
        let mut initiator = Initiator::new(&mut master, &def);

        initiator.step().await.unwrap();
        assert_eq!(initiator.state(), &InitiatorState::WaitReady);

        // A broadcast ready is not addressed to the master
        let data = MessageCodec::new().encode_message(Message::ready()).unwrap();
        other.send(BROADCAST_ADDRESS, &data).await.unwrap();

        initiator.step().await.unwrap();
        assert_eq!(initiator.state(), &InitiatorState::SendQuery);
        assert_eq!(initiator.state().name(), "SendQuery");

        initiator.step().await.unwrap();
        assert_eq!(initiator.query_rounds(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_ready() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut master = radio(&link, MASTER).await;
        let cancel = master.cancel_signal().clone();
        let def = definition();

        tokio::spawn(async move {
            sleep(Duration::from_millis(1100)).await;
            cancel.set();
        });

        let mut initiator = Initiator::new(&mut master, &def);
        initiator.step().await.unwrap();
        let start = Instant::now();
        assert!(matches!(initiator.step().await, Err(Error::Cancelled)));
        assert!(start.elapsed() <= Duration::from_millis(1600));
        assert_eq!(initiator.state(), &InitiatorState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_definition_from_wrong_type_rejected() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut slave = radio(&link, SLAVE).await;
        let mut master = link.endpoint(MASTER).await;

        let fake_master = async move {
            // Acknowledge the ready, then answer with a heartbeat instead
            let ready = master.recv(Duration::from_millis(2000), true).await.unwrap();
            assert!(ready.is_some());
            let data = MessageCodec::new().encode_message(Message::heartbeat()).unwrap();
            master.send(SLAVE, &data).await.unwrap();
        };

        let (result, _) = tokio::join!(accept_test(&mut slave, MASTER), fake_master);
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_definition_timeout() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut slave = radio(&link, SLAVE).await;
        let mut master = link.endpoint(MASTER).await;

        let silent_master = async move {
            master.recv(Duration::from_millis(2000), true).await.unwrap()
        };

        let start = Instant::now();
        let (result, ready) = tokio::join!(accept_test(&mut slave, MASTER), silent_master);
        assert!(ready.is_some());
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(start.elapsed(), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_round_trip() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut master = radio(&link, MASTER).await;
        let mut slave = radio(&link, SLAVE).await;

        let (alive, answered) = tokio::join!(send_heartbeat(&mut master), async {
            let command = wait_for_command(&mut slave).await?;
            assert_eq!(command.kind, CommandType::Heartbeat);
            answer_heartbeat(&mut slave, command.from).await
        });

        assert!(answered.is_ok());
        assert!(alive.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_without_peer() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut master = radio(&link, MASTER).await;

        let start = Instant::now();
        assert!(!send_heartbeat(&mut master).await.unwrap());
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }
}
