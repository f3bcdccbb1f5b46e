use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::core::{
    Address, CancellationSignal, Error, ProtocolConfig, RadioConfig, Result,
};
use crate::protocol::{Message, MessageCodec, MessageFrame};
use super::{RadioTransport, RfStats};

/// Context object owning a node's transport, configuration and cancellation signal.
///
/// Every operation takes `&mut self`, so at most one transmit or receive is in
/// flight per module. Frames are returned by value and never alias an
/// internal buffer.
pub struct RadioModule<T> {
    /// Underlying transport
    transport: T,
    /// Configuration agreed by all nodes for handshakes
    base_config: RadioConfig,
    /// Configuration currently applied to the modem
    current_config: RadioConfig,
    /// Protocol timing
    protocol: ProtocolConfig,
    /// Shared cancellation flag
    cancel: CancellationSignal,
    /// Message codec
    codec: MessageCodec,
}

impl<T: RadioTransport> RadioModule<T> {
    /// Creates a module and applies the base configuration
    pub async fn new(
        mut transport: T,
        base_config: RadioConfig,
        protocol: ProtocolConfig,
        cancel: CancellationSignal,
    ) -> Result<Self> {
        base_config.validate()?;
        transport.configure(&base_config).await?;
        debug!(address = transport.address(), config = %base_config, "radio initialised");

        Ok(RadioModule {
            transport,
            base_config,
            current_config: base_config,
            protocol,
            cancel,
            codec: MessageCodec::new(),
        })
    }

    /// Address of this node
    pub fn address(&self) -> Address {
        self.transport.address()
    }

    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }

    pub fn cancel_signal(&self) -> &CancellationSignal {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_set()
    }

    pub fn current_config(&self) -> &RadioConfig {
        &self.current_config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns to the configuration shared by all nodes
    pub async fn reset_to_base_config(&mut self) -> Result<()> {
        let base = self.base_config;
        self.apply_config(&base).await
    }

    /// Applies a new modulation configuration
    pub async fn apply_config(&mut self, config: &RadioConfig) -> Result<()> {
        config.validate()?;
        self.transport.configure(config).await?;
        self.current_config = *config;
        debug!(config = %config, "configuration applied");
        Ok(())
    }

    /// Signal statistics as reported by the transport
    pub fn rf_stats(&self) -> RfStats {
        RfStats {
            rssi: self.transport.last_rssi(),
            snr: self.transport.last_snr(),
            bad_receive_count: self.transport.bad_receive_count(),
        }
    }

    /// Best-effort transmission of one message
    pub async fn send_unacknowledged(&mut self, to: Address, message: Message) -> Result<()> {
        let message_type = message.message_type();
        let data = self.codec.encode_message(message)?;
        trace!(to, ?message_type, len = data.len(), "sending unacknowledged");
        self.transport.send(to, &data).await
    }

    /// Acknowledged transmission with up to `attempts` tries.
    ///
    /// The signal is checked before every attempt, so cancellation is honoured
    /// within one attempt's ack wait.
    pub async fn send_acknowledged(
        &mut self,
        to: Address,
        message: Message,
        attempts: u8,
    ) -> Result<()> {
        let message_type = message.message_type();
        let data = self.codec.encode_message(message)?;
        let attempts = attempts.max(1);

        for attempt in 1..=attempts {
            if self.cancel.is_set() {
                debug!(to, ?message_type, "acknowledged send interrupted");
                return Err(Error::Cancelled);
            }
            trace!(to, ?message_type, attempt, "sending acknowledged");
            match self.transport.send_acknowledged(to, &data).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!(to, attempt, error = %e, "acknowledged send attempt failed"),
            }
        }

        warn!(to, ?message_type, attempts, "acknowledged send failed");
        Err(Error::transport(format!(
            "no acknowledgment from 0x{:02X} after {} attempts",
            to, attempts
        )))
    }

    /// Waits for the next decodable frame addressed to this node or broadcast.
    ///
    /// Waits forever when `timeout` is `None`. The wait is split into sub-polls
    /// of at most `rx_poll_interval`, with the remaining time recomputed from
    /// the monotonic clock and the cancellation signal checked in between.
    /// Returns `Ok(None)` on timeout and `Err(Cancelled)` when interrupted.
    pub async fn receive(
        &mut self,
        timeout: Option<Duration>,
        acknowledge: bool,
    ) -> Result<Option<MessageFrame>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let poll = self.protocol.rx_poll_interval;

        loop {
            if self.cancel.is_set() {
                debug!("receive interrupted");
                return Err(Error::Cancelled);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        trace!("receive timed out");
                        return Ok(None);
                    }
                    remaining.min(poll)
                }
                None => poll,
            };

            let datagram = match self.transport.recv(wait, acknowledge).await {
                Ok(Some(datagram)) => datagram,
                Ok(None) => continue,
                Err(e) => {
                    debug!(error = %e, "transport receive failed");
                    sleep(wait).await;
                    continue;
                }
            };

            if datagram.to != self.address() && datagram.to != crate::core::BROADCAST_ADDRESS {
                trace!(to = datagram.to, "frame for another node ignored");
                continue;
            }

            match self.codec.decode_datagram(&datagram) {
                Some(frame) => {
                    trace!(from = frame.from, to = frame.to, message_type = ?frame.message_type(), "frame received");
                    return Ok(Some(frame));
                }
                None => trace!(len = datagram.data.len(), "runt frame discarded"),
            }
        }
    }

    /// Sleeps for `duration`, waking early with `Err(Cancelled)` if signalled
    pub async fn pause(&mut self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancel.is_set() {
                return Err(Error::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            sleep(remaining.min(self.protocol.rx_poll_interval)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use crate::radio::{LinkSettings, SimulatedLink};
    use tokio_test::{assert_err, assert_ok};

    async fn module(link: &SimulatedLink, address: Address) -> RadioModule<crate::radio::SimulatedTransport> {
        let transport = link.endpoint(address).await;
        RadioModule::new(
            transport,
            RadioConfig::BASE,
            ProtocolConfig::default(),
            CancellationSignal::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut radio = module(&link, 0x81).await;

        let start = Instant::now();
        let frame = assert_ok!(radio.receive(Some(Duration::from_millis(1200)), false).await);
        assert!(frame.is_none());
        assert_eq!(start.elapsed(), Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_receive_within_one_poll() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut radio = module(&link, 0x81).await;
        let cancel = radio.cancel_signal().clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(1200)).await;
            cancel.set();
        });

        let start = Instant::now();
        let result = radio.receive(Some(Duration::from_millis(5000)), true).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1200));
        assert!(elapsed <= Duration::from_millis(1700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_send_exhausts_attempts() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut radio = module(&link, 0x41).await;

        // Nobody is listening at 0x81
        let result = radio.send_acknowledged(0x81, Message::ready(), 3).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(link.transmissions().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_send() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut radio = module(&link, 0x41).await;
        radio.cancel_signal().set();

        assert_err!(radio.send_acknowledged(0x81, Message::ready(), 3).await);
        assert!(link.transmissions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runt_frames_are_skipped() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut master = module(&link, 0x81).await;
        let mut raw = link.endpoint(0x41).await;
        raw.configure(&RadioConfig::BASE).await.unwrap();

        raw.send(0x81, &[4]).await.unwrap();
        raw.send(0x81, &[4, 0, 0]).await.unwrap();

        let frame = master
            .receive(Some(Duration::from_millis(1000)), false)
            .await
            .unwrap()
            .expect("second frame decodes");
        assert_eq!(frame.message_type(), MessageType::TestReady);
        assert_eq!(frame.from, 0x41);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_is_cancellable() {
        let link = SimulatedLink::new(LinkSettings::default());
        let mut radio = module(&link, 0x81).await;
        assert_ok!(radio.pause(Duration::from_millis(300)).await);

        radio.cancel_signal().set();
        assert!(matches!(
            radio.pause(Duration::from_millis(300)).await,
            Err(Error::Cancelled)
        ));
    }
}
