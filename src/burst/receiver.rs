use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::core::{Error, NegotiatedTest, Result};
use crate::protocol::MessageType;
use crate::radio::{RadioModule, RadioTransport};
use crate::storage::{ResultRow, ResultSink, ResultSummary};
use crate::util::as_millis;
use super::{bad_receive_delta, receive_window};

/// Outcome of listening to one burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveSummary {
    /// False only if the burst was cancelled part way
    pub completed: bool,
    /// Packets that passed verification
    pub received: u16,
}

/// Listens for the negotiated burst and writes one row per accepted packet.
///
/// Stops when the receive window closes, the last packet arrives or the
/// node is cancelled. A summary line is written in every case.
pub async fn receive_burst<T, S>(
    radio: &mut RadioModule<T>,
    session: &NegotiatedTest,
    sink: &mut S,
) -> Result<ReceiveSummary>
where
    T: RadioTransport,
    S: ResultSink + ?Sized,
{
    let def = &session.definition;
    def.validate_packet_len()?;
    radio.apply_config(&def.config).await?;

    let window = receive_window(def, radio.protocol());
    let deadline = Instant::now() + window;
    let last_sequence = def.packet_cnt.checked_sub(1);
    let (from, to) = (session.transmitter(), session.receiver());

    let mut previous_bad = radio.rf_stats().bad_receive_count;
    let mut failed_receives: u32 = 0;
    let mut received: u16 = 0;
    let mut completed = true;

    info!(test = %def.id, window_ms = as_millis(window), "waiting for test packets");
    while last_sequence.is_some() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!(test = %def.id, "receive window closed");
            break;
        }

        let frame = match radio.receive(Some(remaining), false).await {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(Error::Cancelled) => {
                completed = false;
                break;
            }
            Err(e) => return Err(e),
        };

        if !frame.matches(MessageType::TestPacket, from, to)
            || frame.wire_len() != def.packet_len as usize
        {
            trace!(from = frame.from, len = frame.wire_len(), "frame is not a test packet");
            continue;
        }

        received = received.saturating_add(1);
        let stats = radio.rf_stats();
        failed_receives += u32::from(bad_receive_delta(previous_bad, stats.bad_receive_count));
        previous_bad = stats.bad_receive_count;

        let row = ResultRow {
            sequence_id: frame.message.sequence_id(),
            rssi: stats.rssi,
            snr: stats.snr,
            failed_receives,
            time_left_ms: as_millis(deadline.saturating_duration_since(Instant::now())),
        };
        debug!(sequence_id = row.sequence_id, rssi = row.rssi, snr = row.snr, "test packet received");
        sink.write_row(&row).await?;

        if Some(row.sequence_id) == last_sequence {
            break;
        }
    }

    sink.write_summary(&ResultSummary {
        received,
        expected: def.packet_cnt,
    })
    .await?;
    info!(test = %def.id, received, expected = def.packet_cnt, completed, "finished receiving packets");

    Ok(ReceiveSummary { completed, received })
}
