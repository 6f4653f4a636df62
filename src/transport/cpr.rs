//! Constant Packet Rate pacing.
//!
//! Grounded on `cpr.go`'s `CPRInit`: a CPR rate in KiB/s is converted
//! once into a fixed inter-packet cycle duration; enabling CPR also
//! forces Noise on, since every frame must be MTU-sized for the rate
//! to be meaningful.

use std::time::Duration;

/// Convert a KiB/s rate into the duration between consecutive frames
/// of `mtu` bytes. Returns `None` when CPR is disabled (`rate == 0`).
pub fn cycle_duration(rate_kib_per_sec: u32, mtu: usize) -> Option<Duration> {
    if rate_kib_per_sec == 0 {
        return None;
    }
    let bytes_per_sec = rate_kib_per_sec as u64 * 1024;
    let packets_per_sec = bytes_per_sec / mtu as u64;
    if packets_per_sec == 0 {
        return Some(Duration::from_secs(1));
    }
    Some(Duration::from_secs_f64(1.0 / packets_per_sec as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_when_zero() {
        assert_eq!(cycle_duration(0, 1452), None);
    }

    #[test]
    fn matches_rate_arithmetic() {
        // 100 KiB/s over a 1452-byte MTU: ~70 packets/sec.
        let cycle = cycle_duration(100, 1452).unwrap();
        let packets_per_sec = 1.0 / cycle.as_secs_f64();
        let expected = 100.0 * 1024.0 / 1452.0;
        assert!((packets_per_sec - expected).abs() < 1.0);
    }
}
