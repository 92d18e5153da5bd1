use std::time::Duration;

use crate::config::DEFAULT_SETTLE_US;

/// Time for the EF output to emit `pulses` pulses at `frequency_hz`
pub fn pulse_duration(pulses: u32, frequency_hz: f64) -> Duration {
    Duration::from_secs_f64(pulses as f64 / frequency_hz)
}

/// Time to wait after commanding `pulses` before the stage is trusted to
/// have settled: `pulses * 1e6 / frequency` µs plus the settle allowance.
pub fn wait_time(pulses: u32, frequency_hz: f64, settle: Duration) -> Duration {
    pulse_duration(pulses, frequency_hz) + settle
}

/// Per-axis waits for one scan, computed once from the step magnitudes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanTiming {
    pub x_wait: Duration,
    pub z_wait: Duration,
}

impl ScanTiming {
    pub fn new(x_pulses: u32, z_pulses: u32, frequency_hz: f64, settle: Duration) -> Self {
        Self {
            x_wait: wait_time(x_pulses, frequency_hz, settle),
            z_wait: wait_time(z_pulses, frequency_hz, settle),
        }
    }

    pub fn with_default_settle(x_pulses: u32, z_pulses: u32, frequency_hz: f64) -> Self {
        Self::new(
            x_pulses,
            z_pulses,
            frequency_hz,
            Duration::from_micros(DEFAULT_SETTLE_US),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::split_step;

    const SETTLE: Duration = Duration::from_micros(DEFAULT_SETTLE_US);

    #[test]
    fn test_wait_time_formula() {
        // 500 pulses at 1 kHz = 0.5 s, plus 0.1 s settle
        assert_eq!(wait_time(500, 1000.0, SETTLE), Duration::from_millis(600));
        assert_eq!(wait_time(0, 1000.0, SETTLE), SETTLE);
    }

    #[test]
    fn test_wait_time_strictly_increasing() {
        let mut previous = wait_time(0, 2500.0, SETTLE);
        for pulses in 1..2000 {
            let current = wait_time(pulses, 2500.0, SETTLE);
            assert!(current > previous, "not increasing at {pulses}");
            previous = current;
        }
    }

    #[test]
    fn test_wait_time_ignores_direction_sign() {
        let (pos, _) = split_step(350).unwrap();
        let (neg, _) = split_step(-350).unwrap();
        assert_eq!(wait_time(pos, 1000.0, SETTLE), wait_time(neg, 1000.0, SETTLE));
    }

    #[test]
    fn test_scan_timing_per_axis() {
        let timing = ScanTiming::with_default_settle(1000, 250, 1000.0);
        assert_eq!(timing.x_wait, Duration::from_millis(1100));
        assert_eq!(timing.z_wait, Duration::from_millis(350));
    }
}
