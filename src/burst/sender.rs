use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{Error, NegotiatedTest, Result};
use crate::protocol::Message;
use crate::radio::{RadioModule, RadioTransport};
use crate::util::as_millis;
use super::filler_payload;

/// Transmits the negotiated burst and returns how long it took.
///
/// The packet length is checked before the radio is touched. The radio is
/// left on the test configuration; the caller resets it.
pub async fn send_burst<T: RadioTransport>(
    radio: &mut RadioModule<T>,
    session: &NegotiatedTest,
) -> Result<Duration> {
    let def = &session.definition;
    def.validate_packet_len()?;

    radio.apply_config(&def.config).await?;
    let payload = filler_payload(def.packet_len as usize);
    let to = session.receiver();
    let (settle, spacing) = {
        let protocol = radio.protocol();
        (protocol.settle_delay, protocol.inter_packet_delay)
    };

    let start = Instant::now();
    radio.pause(settle).await?;

    info!(test = %def.id, to, count = def.packet_cnt, len = def.packet_len, "sending test packets");
    for sequence_id in 0..def.packet_cnt {
        if radio.is_cancelled() {
            debug!(sequence_id, "burst interrupted");
            return Err(Error::Cancelled);
        }
        if let Err(e) = radio
            .send_unacknowledged(to, Message::packet(sequence_id, payload.clone()))
            .await
        {
            warn!(sequence_id, error = %e, "test packet transmission failed");
        }
        radio.pause(spacing).await?;
    }

    let elapsed = start.elapsed();
    info!(test = %def.id, elapsed_ms = as_millis(elapsed), "finished sending packets");
    Ok(elapsed)
}
