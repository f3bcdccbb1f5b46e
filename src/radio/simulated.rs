//! Simulated radio medium for testing and demos

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, trace};

use crate::core::{Address, Error, RadioConfig, Result, BROADCAST_ADDRESS};
use super::{Datagram, RadioTransport};

/// Channel characteristics of a simulated link
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Probability that a frame is corrupted in flight
    pub loss_probability: f64,
    /// RSSI reported for every received frame
    pub rssi: i16,
    /// SNR reported for every received frame
    pub snr: i16,
    /// How long an acknowledged send waits for its ack
    pub ack_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        LinkSettings {
            loss_probability: 0.0,
            rssi: -60,
            snr: 9,
            ack_timeout: Duration::from_millis(1000),
        }
    }
}

/// Record of one frame put on the medium
#[derive(Debug, Clone)]
pub struct Transmission {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    /// Sent with a transport ack request
    pub acknowledged: bool,
    pub config: RadioConfig,
    pub at: Instant,
}

struct Delivery {
    datagram: Datagram,
    rssi: i16,
    snr: i16,
    ack: Option<oneshot::Sender<()>>,
}

struct Station {
    inbox: mpsc::UnboundedSender<Delivery>,
    config: RadioConfig,
    bad_receives: Arc<AtomicU16>,
}

struct Medium {
    settings: LinkSettings,
    stations: HashMap<Address, Station>,
    transmissions: Vec<Transmission>,
    rng: StdRng,
}

impl Medium {
    fn transmit(
        &mut self,
        from: Address,
        to: Address,
        data: &[u8],
        config: RadioConfig,
        mut ack: Option<oneshot::Sender<()>>,
    ) {
        let data = Bytes::copy_from_slice(data);
        self.transmissions.push(Transmission {
            from,
            to,
            data: data.clone(),
            acknowledged: ack.is_some(),
            config,
            at: Instant::now(),
        });

        let targets: Vec<Address> = if to == BROADCAST_ADDRESS {
            self.stations.keys().copied().filter(|&a| a != from).collect()
        } else if self.stations.contains_key(&to) {
            vec![to]
        } else {
            Vec::new()
        };

        for target in targets {
            let lost = self.settings.loss_probability > 0.0
                && self.rng.gen::<f64>() < self.settings.loss_probability;
            let Some(station) = self.stations.get(&target) else {
                continue;
            };
            if !config.can_demodulate(&station.config) {
                trace!(from, target, "frame not demodulated, configuration mismatch");
                continue;
            }
            if lost {
                station.bad_receives.fetch_add(1, Ordering::SeqCst);
                trace!(from, target, "frame corrupted in flight");
                continue;
            }
            let delivery = Delivery {
                datagram: Datagram {
                    from,
                    to,
                    data: data.clone(),
                },
                rssi: self.settings.rssi,
                snr: self.settings.snr,
                ack: ack.take(),
            };
            // A closed inbox means the endpoint was dropped
            let _ = station.inbox.send(delivery);
        }
    }
}

/// Shared in-memory medium connecting any number of simulated transports.
///
/// Frames reach a station only if its current configuration can demodulate
/// the sender's, and queued frames are flushed whenever a station
/// reconfigures, as on a real modem.
#[derive(Clone)]
pub struct SimulatedLink {
    medium: Arc<Mutex<Medium>>,
}

impl SimulatedLink {
    /// Creates a medium with randomly seeded loss
    pub fn new(settings: LinkSettings) -> Self {
        Self::build(settings, StdRng::from_entropy())
    }

    /// Creates a medium whose loss pattern is reproducible
    pub fn with_seed(settings: LinkSettings, seed: u64) -> Self {
        Self::build(settings, StdRng::seed_from_u64(seed))
    }

    fn build(settings: LinkSettings, rng: StdRng) -> Self {
        SimulatedLink {
            medium: Arc::new(Mutex::new(Medium {
                settings,
                stations: HashMap::new(),
                transmissions: Vec::new(),
                rng,
            })),
        }
    }

    /// Attaches a new station at `address`, replacing any previous one
    pub async fn endpoint(&self, address: Address) -> SimulatedTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let bad_receives = Arc::new(AtomicU16::new(0));
        let config = RadioConfig::BASE;

        let mut medium = self.medium.lock().await;
        medium.stations.insert(
            address,
            Station {
                inbox: tx,
                config,
                bad_receives: Arc::clone(&bad_receives),
            },
        );
        let ack_timeout = medium.settings.ack_timeout;
        debug!(address, "simulated station attached");

        SimulatedTransport {
            address,
            medium: Arc::clone(&self.medium),
            inbox: rx,
            config,
            ack_timeout,
            last_rssi: 0,
            last_snr: 0,
            bad_receives,
        }
    }

    /// Every frame transmitted so far, in order
    pub async fn transmissions(&self) -> Vec<Transmission> {
        self.medium.lock().await.transmissions.clone()
    }

    /// Changes the loss probability for subsequent frames
    pub async fn set_loss_probability(&self, probability: f64) {
        self.medium.lock().await.settings.loss_probability = probability;
    }
}

/// One station on a [`SimulatedLink`]
pub struct SimulatedTransport {
    address: Address,
    medium: Arc<Mutex<Medium>>,
    inbox: mpsc::UnboundedReceiver<Delivery>,
    config: RadioConfig,
    ack_timeout: Duration,
    last_rssi: i16,
    last_snr: i16,
    bad_receives: Arc<AtomicU16>,
}

impl SimulatedTransport {
    /// Sets the bad receive counter, e.g. to exercise wraparound
    pub fn set_bad_receive_count(&self, count: u16) {
        self.bad_receives.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl RadioTransport for SimulatedTransport {
    fn address(&self) -> Address {
        self.address
    }

    async fn configure(&mut self, config: &RadioConfig) -> Result<()> {
        let mut medium = self.medium.lock().await;
        let station = medium
            .stations
            .get_mut(&self.address)
            .ok_or_else(|| Error::transport("station detached from medium"))?;
        station.config = *config;
        self.config = *config;
        drop(medium);

        while self.inbox.try_recv().is_ok() {}
        Ok(())
    }

    async fn send(&mut self, to: Address, data: &[u8]) -> Result<()> {
        self.medium
            .lock()
            .await
            .transmit(self.address, to, data, self.config, None);
        Ok(())
    }

    async fn send_acknowledged(&mut self, to: Address, data: &[u8]) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let deadline = Instant::now() + self.ack_timeout;
        self.medium
            .lock()
            .await
            .transmit(self.address, to, data, self.config, Some(ack_tx));

        match timeout(self.ack_timeout, ack_rx).await {
            Ok(Ok(())) => Ok(()),
            _ => {
                sleep_until(deadline).await;
                Err(Error::transport(format!("no ack from 0x{:02X}", to)))
            }
        }
    }

    async fn recv(&mut self, wait: Duration, acknowledge: bool) -> Result<Option<Datagram>> {
        match timeout(wait, self.inbox.recv()).await {
            Ok(Some(delivery)) => {
                self.last_rssi = delivery.rssi;
                self.last_snr = delivery.snr;
                if acknowledge {
                    if let Some(ack) = delivery.ack {
                        let _ = ack.send(());
                    }
                }
                Ok(Some(delivery.datagram))
            }
            Ok(None) => Err(Error::transport("medium closed")),
            Err(_) => Ok(None),
        }
    }

    fn last_rssi(&self) -> i16 {
        self.last_rssi
    }

    fn last_snr(&self) -> i16 {
        self.last_snr
    }

    fn bad_receive_count(&self) -> u16 {
        self.bad_receives.load(Ordering::SeqCst)
    }
}
