//! Time-on-air of LoRa frames and the timeouts derived from it.
//!
//! Follows the modem's published timing equations with an explicit header
//! and CRC always assumed present.

use std::time::Duration;

use crate::core::{ProtocolConfig, RadioConfig};
use crate::util::{from_millis_f64, to_millis_f64};

/// Symbol duration above which low data rate optimisation is mandatory
const LOW_DATARATE_SYMBOL_MS: f64 = 16.0;

/// Duration of one symbol in milliseconds.
///
/// A spreading factor too large to shift yields infinity; run
/// [`RadioConfig::validate`] first to get a meaningful figure.
pub fn symbol_time_ms(config: &RadioConfig) -> f64 {
    let chips = 1u32
        .checked_shl(u32::from(config.spreading_factor))
        .map_or(f64::INFINITY, f64::from);
    1000.0 * chips / f64::from(config.bandwidth_hz)
}

/// Whether the modulation requires low data rate optimisation
pub fn is_low_datarate_required(config: &RadioConfig) -> bool {
    symbol_time_ms(config) > LOW_DATARATE_SYMBOL_MS
}

/// Number of payload symbols for `payload_len` bytes
pub fn payload_symbol_count(config: &RadioConfig, payload_len: usize) -> u32 {
    let sf = i64::from(config.spreading_factor);
    let ldro = i64::from(is_low_datarate_required(config));
    let header_overhead_bits = 4 * sf + 28 + 16 - 20;
    let numerator = 8 * payload_len as i64 - header_overhead_bits;
    let denominator = 4 * (sf - 2 * ldro);

    let blocks = if numerator <= 0 {
        0
    } else {
        (numerator + denominator - 1) / denominator
    };
    8 + (blocks * i64::from(config.coding_rate_denom)) as u32
}

/// Time on air of one frame carrying `payload_len` bytes, in milliseconds
pub fn airtime_ms(config: &RadioConfig, payload_len: usize) -> f64 {
    let symbol_ms = symbol_time_ms(config);
    let preamble_ms = (f64::from(config.preamble_len) + 4.25) * symbol_ms;
    let payload_ms = f64::from(payload_symbol_count(config, payload_len)) * symbol_ms;
    preamble_ms + payload_ms
}

/// How long to allow for a single packet of `packet_len` bytes to arrive
pub fn packet_timeout(config: &RadioConfig, packet_len: usize, protocol: &ProtocolConfig) -> Duration {
    from_millis_f64(
        airtime_ms(config, packet_len) * protocol.airtime_safety_factor
            + to_millis_f64(protocol.per_packet_margin),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(sf: u8, cr: u8) -> RadioConfig {
        RadioConfig {
            spreading_factor: sf,
            coding_rate_denom: cr,
            bandwidth_hz: 125_000,
            preamble_len: 8,
            ..RadioConfig::BASE
        }
    }

    #[test]
    fn test_sf12_reference_airtime() {
        let cfg = config(12, 8);
        assert!((symbol_time_ms(&cfg) - 32.768).abs() < 1e-9);
        assert!(is_low_datarate_required(&cfg));
        assert_eq!(payload_symbol_count(&cfg, 20), 32);

        let airtime = airtime_ms(&cfg, 20);
        assert!((airtime - 1449.984).abs() < 1e-6);
        assert_eq!(airtime.round() as u64, 1450);
    }

    #[test]
    fn test_sf7_reference_airtime() {
        let cfg = config(7, 5);
        assert!(!is_low_datarate_required(&cfg));
        assert_eq!(payload_symbol_count(&cfg, 20), 28);
        assert!((airtime_ms(&cfg, 20) - 41.216).abs() < 1e-6);
    }

    #[test]
    fn test_low_datarate_threshold() {
        // SF11 at 125 kHz is 16.384 ms per symbol
        assert!(is_low_datarate_required(&config(11, 5)));
        assert!(!is_low_datarate_required(&config(10, 5)));

        // Exactly 16 ms does not require it
        let mut cfg = config(12, 5);
        cfg.bandwidth_hz = 256_000;
        assert_eq!(symbol_time_ms(&cfg), 16.0);
        assert!(!is_low_datarate_required(&cfg));
    }

    #[test]
    fn test_small_payload_uses_minimum_symbols() {
        let cfg = config(12, 8);
        assert_eq!(payload_symbol_count(&cfg, 0), 8);
        assert_eq!(payload_symbol_count(&cfg, 9), 8);
        assert_eq!(payload_symbol_count(&cfg, 10), 16);
    }

    #[test]
    fn test_unvalidated_spreading_factor_does_not_overflow() {
        let cfg = config(40, 5);
        assert_eq!(symbol_time_ms(&cfg), f64::INFINITY);
        assert!(is_low_datarate_required(&cfg));
        assert_eq!(payload_symbol_count(&cfg, 20), 8);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_packet_timeout() {
        let cfg = config(12, 8);
        let timeout = packet_timeout(&cfg, 20, &ProtocolConfig::default());
        // 1449.984 * 1.3 + 100
        assert_eq!(timeout.as_millis(), 1984);
    }
}
