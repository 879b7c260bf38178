// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use super::BW_UNIT;
use super::GAIN_UNIT;

/// Pacing rate below which a single datagram is sent per burst: `1.2MB/s`.
const LOW_PACING_RATE_THRESHOLD: u64 = 1_200_000 * BW_UNIT;

/// Pacing rate below which two datagrams are sent per burst: `24MB/s`.
const HIGH_PACING_RATE_THRESHOLD: u64 = 24_000_000 * BW_UNIT;

/// The upper bound of a send quantum in bytes.
const MAX_SEND_QUANTUM: u64 = 64 * 1024;

const MICROS_PER_SEC: u128 = 1_000_000;

const MILLIS_PER_SEC: u64 = 1_000;

/// Compute the maximum size of a data aggregate scheduled and transmitted
/// together, given a pacing rate in bits per second.
pub fn send_quantum(pacing_rate: u64, max_datagram_size: u64) -> u64 {
    if pacing_rate < LOW_PACING_RATE_THRESHOLD {
        max_datagram_size
    } else if pacing_rate < HIGH_PACING_RATE_THRESHOLD {
        max_datagram_size * 2
    } else {
        // Bytes sent in one millisecond at the pacing rate.
        (pacing_rate / BW_UNIT / MILLIS_PER_SEC).min(MAX_SEND_QUANTUM)
    }
}

/// Snapshot of the controller used to compute a send allowance.
#[derive(Debug, Clone, Copy)]
pub struct PacingState {
    /// Effective congestion window in bytes.
    pub congestion_window: u64,

    /// Bytes in flight.
    pub bytes_in_flight: u64,

    /// Estimated bandwidth in bits per second.
    pub bandwidth: u64,

    /// Pacing gain in units of `GAIN_UNIT`.
    pub pacing_gain: u64,

    /// Minimal RTT, None if unknown.
    pub min_rtt: Option<Duration>,

    /// Whether the controller is probing for bandwidth quickly.
    pub in_startup: bool,
}

/// Splits the congestion window into chunks spread out over the RTT.
///
/// The pacer is stateless: the connection tracks the time of its last send
/// and asks for an allowance before every transmission opportunity.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    /// Enable pacing or not.
    enabled: bool,

    /// Below this RTT, pacing is not worth its cost.
    granularity: Duration,
}

impl Pacer {
    pub fn new(enabled: bool, granularity: Duration) -> Self {
        Self {
            enabled,
            granularity,
        }
    }

    /// Bytes that may be sent now.
    pub fn send_allowance(&self, s: &PacingState, time_since_last_send: Option<Duration>) -> u64 {
        if s.bytes_in_flight >= s.congestion_window {
            // Blocked by congestion control.
            return 0;
        }
        let available = s.congestion_window - s.bytes_in_flight;

        let elapsed = match (time_since_last_send, s.min_rtt) {
            (Some(elapsed), Some(min_rtt)) if self.enabled && min_rtt >= self.granularity => {
                elapsed
            }
            _ => return available,
        };

        // Bytes the pacing rate allows over the elapsed time.
        let credit = s.bandwidth as u128 * s.pacing_gain as u128 * elapsed.as_micros()
            / (GAIN_UNIT as u128 * MICROS_PER_SEC * BW_UNIT as u128);
        let mut allowance = u64::try_from(credit).unwrap_or(u64::MAX);

        if s.in_startup {
            let startup_credit = (s.congestion_window * s.pacing_gain / GAIN_UNIT)
                .saturating_sub(s.bytes_in_flight);
            allowance = allowance.max(startup_credit);
        }

        // Never send more than a quarter of the window at once.
        allowance.min(available).min(s.congestion_window / 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacing_state() -> PacingState {
        PacingState {
            congestion_window: 120_000,
            bytes_in_flight: 0,
            bandwidth: 80_000_000, // 10MB/s
            pacing_gain: GAIN_UNIT,
            min_rtt: Some(Duration::from_millis(50)),
            in_startup: false,
        }
    }

    #[test]
    fn send_quantum_thresholds() {
        assert_eq!(send_quantum(0, 1200), 1200);
        assert_eq!(send_quantum(LOW_PACING_RATE_THRESHOLD - 1, 1200), 1200);
        assert_eq!(send_quantum(LOW_PACING_RATE_THRESHOLD, 1200), 2400);
        assert_eq!(send_quantum(HIGH_PACING_RATE_THRESHOLD - 1, 1200), 2400);
        assert_eq!(send_quantum(HIGH_PACING_RATE_THRESHOLD, 1200), 24_000);
        assert_eq!(send_quantum(100_000_000 * BW_UNIT, 1200), MAX_SEND_QUANTUM);
    }

    #[test]
    fn send_allowance_blocked() {
        let pacer = Pacer::new(true, Duration::from_millis(1));
        let mut s = pacing_state();
        s.bytes_in_flight = s.congestion_window;
        assert_eq!(pacer.send_allowance(&s, Some(Duration::from_millis(1))), 0);

        s.bytes_in_flight = s.congestion_window + 1;
        assert_eq!(pacer.send_allowance(&s, None), 0);
    }

    #[test]
    fn send_allowance_unpaced() {
        let mut s = pacing_state();
        s.bytes_in_flight = 20_000;

        // Pacing disabled.
        let pacer = Pacer::new(false, Duration::from_millis(1));
        assert!(!pacer.enabled);
        assert_eq!(pacer.send_allowance(&s, Some(Duration::from_millis(1))), 100_000);

        let pacer = Pacer::new(true, Duration::from_millis(1));
        assert!(pacer.enabled);

        // Unknown time since last send.
        assert_eq!(pacer.send_allowance(&s, None), 100_000);

        // Unknown min rtt.
        s.min_rtt = None;
        assert_eq!(pacer.send_allowance(&s, Some(Duration::from_millis(1))), 100_000);

        // Min rtt below the pacing granularity.
        s.min_rtt = Some(Duration::from_micros(999));
        assert_eq!(pacer.send_allowance(&s, Some(Duration::from_millis(1))), 100_000);
    }

    #[test]
    fn send_allowance_paced() {
        let pacer = Pacer::new(true, Duration::from_millis(1));
        let mut s = pacing_state();

        // 10MB/s for 1ms.
        assert_eq!(pacer.send_allowance(&s, Some(Duration::from_millis(1))), 10_000);

        // Pacing gain 1.25.
        s.pacing_gain = 320;
        assert_eq!(pacer.send_allowance(&s, Some(Duration::from_millis(1))), 12_500);

        // Clamped to a quarter of the window.
        assert_eq!(pacer.send_allowance(&s, Some(Duration::from_millis(10))), 30_000);

        // Clamped to the remaining window.
        s.bytes_in_flight = 115_000;
        assert_eq!(pacer.send_allowance(&s, Some(Duration::from_millis(10))), 5_000);
    }

    #[test]
    fn send_allowance_startup() {
        let pacer = Pacer::new(true, Duration::from_millis(1));
        let mut s = pacing_state();
        s.in_startup = true;
        s.pacing_gain = 739;
        s.bandwidth = 0;
        s.bytes_in_flight = 100_000;

        // The startup credit lets the window fill up even without bandwidth.
        assert_eq!(pacer.send_allowance(&s, Some(Duration::from_millis(1))), 20_000);

        s.bytes_in_flight = 0;
        assert_eq!(pacer.send_allowance(&s, Some(Duration::from_millis(1))), 30_000);
    }
}
