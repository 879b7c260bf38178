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

#![allow(unused_variables)]

use core::str::FromStr;
use std::fmt;
use std::time::Duration;

use crate::Error;
use crate::RecoveryConfig;
use crate::Result;
pub use bbr::Bbr;
pub use bbr::BbrConfig;
pub use bbr::BbrState;
pub use bbr::RecoveryState;
pub use dummy::Dummy;
pub use event::AckEvent;
pub use event::AckedPacket;
pub use event::LastAckedPacketInfo;
pub use event::LossEvent;
pub use observer::BbrEvent;
pub use observer::BbrMetrics;
pub use observer::BbrObserver;
pub use observer::LogObserver;
pub use observer::NoopObserver;

/// Fixed-point unit of pacing and congestion window gains.
pub const GAIN_UNIT: u64 = 256;

/// Bandwidth is expressed in bytes * BW_UNIT per second, i.e. bits per second.
pub const BW_UNIT: u64 = 8;

/// Available congestion control algorithm
#[repr(C)]
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum CongestionControlAlgorithm {
    /// BBR uses recent measurements of a transport connection's delivery rate
    /// and round-trip time to build an explicit model of the network path.
    /// The model is then used to control data transmission speed and the
    /// maximum volume of data allowed in flight in the network at any time.
    #[default]
    Bbr,

    /// Dummy keeps a static congestion window. It is intended to be used for
    /// testing and experiments.
    Dummy,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("bbr") {
            Ok(CongestionControlAlgorithm::Bbr)
        } else if algor.eq_ignore_ascii_case("dummy") {
            Ok(CongestionControlAlgorithm::Dummy)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Congestion control statistics.
#[derive(Debug, Default, Clone)]
pub struct CongestionStats {
    /// Bytes in flight.
    pub bytes_in_flight: u64,

    /// Total bytes sent in slow start.
    pub bytes_sent_in_slow_start: u64,

    /// Total bytes acked in slow start.
    pub bytes_acked_in_slow_start: u64,

    /// Total bytes lost in slow start.
    pub bytes_lost_in_slow_start: u64,

    /// Total bytes sent.
    pub bytes_sent_in_total: u64,

    /// Total bytes acked.
    pub bytes_acked_in_total: u64,

    /// Total bytes lost.
    pub bytes_lost_in_total: u64,

    /// Number of congestion events.
    pub congestion_events: u64,

    /// Number of persistent congestion events.
    pub persistent_congestion_events: u64,
}

/// Change of the "can send" condition caused by a mutating operation.
///
/// The connection uses it to maintain its flow blocked reasons.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BlockedStateChange {
    /// Nothing changed.
    #[default]
    Unchanged,

    /// The connection was able to send and is now blocked by congestion
    /// control.
    Blocked,

    /// The connection was blocked by congestion control and is now able to
    /// send.
    Unblocked,
}

impl BlockedStateChange {
    /// Compare two snapshots of the "can send" condition.
    pub fn new(could_send: bool, can_send: bool) -> Self {
        match (could_send, can_send) {
            (true, false) => BlockedStateChange::Blocked,
            (false, true) => BlockedStateChange::Unblocked,
            _ => BlockedStateChange::Unchanged,
        }
    }

    /// Whether the connection became unblocked.
    pub fn is_unblocked(&self) -> bool {
        *self == BlockedStateChange::Unblocked
    }
}

/// Congestion control interfaces shared by different algorithms.
///
/// All byte counts are in bytes. Bandwidths are in bits per second.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Callback after retransmittable bytes were sent out.
    fn on_data_sent(&mut self, bytes_sent: u64) -> BlockedStateChange;

    /// Callback after sent bytes were discarded without being acked or lost,
    /// e.g. when a packet number space is dropped.
    fn on_data_invalidated(&mut self, bytes_sent: u64) -> BlockedStateChange;

    /// Callback after an ack frame was processed.
    fn on_data_acknowledged(&mut self, ack: &AckEvent) -> BlockedStateChange;

    /// Callback after packets were declared lost.
    fn on_data_lost(&mut self, loss: &LossEvent) -> BlockedStateChange;

    /// Callback after a previous congestion event was found to be spurious.
    /// Return true if the algorithm undid the congestion response.
    fn on_spurious_congestion_event(&mut self) -> bool {
        false
    }

    /// Mark the sender as application limited up to the given packet number.
    fn set_app_limited(&mut self, largest_sent_packet_number: u64) {}

    /// Allow the given number of packets to bypass the congestion window.
    fn set_exemption(&mut self, num_packets: u8);

    /// Number of packets still allowed to bypass the congestion window.
    fn exemptions(&self) -> u8;

    /// Restore the initial state. A partial reset keeps bytes in flight.
    fn reset(&mut self, full_reset: bool);

    /// Update the max datagram size of the path, e.g. after PMTU discovery.
    fn set_max_datagram_size(&mut self, max_datagram_size: u64);

    /// Current effective congestion window.
    fn congestion_window(&self) -> u64;

    /// Bytes that may be sent right now, given the time elapsed since the
    /// last send (None if unknown).
    fn send_allowance(&self, time_since_last_send: Option<Duration>) -> u64;

    /// Whether the congestion controller allows sending.
    fn can_send(&self) -> bool {
        self.bytes_in_flight() < self.congestion_window() || self.exemptions() > 0
    }

    /// Estimated bottleneck bandwidth, or 0 if unknown.
    fn bandwidth(&self) -> u64 {
        0
    }

    /// Whether the last bandwidth estimate was taken while app limited.
    fn is_app_limited(&self) -> bool {
        false
    }

    /// Bytes in flight.
    fn bytes_in_flight(&self) -> u64;

    /// Maximum bytes in flight ever observed since the last reset.
    fn bytes_in_flight_max(&self) -> u64;

    /// Check if in slow start.
    fn in_slow_start(&self) -> bool {
        false
    }

    /// Check if in recovery mode.
    fn in_recovery(&self) -> bool {
        false
    }

    /// Current pacing rate estimated by Congestion Control Algorithm (CCA).
    /// If CCA does not estimate pacing rate, return None.
    fn pacing_rate(&self) -> Option<u64> {
        None
    }

    /// Initial congestion window.
    fn initial_window(&self) -> u64;

    /// Minimal congestion window.
    fn minimal_window(&self) -> u64;

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller.")
    }
}

/// Build a congestion controller.
///
/// The configuration is validated first, so that a controller never starts
/// with an empty or undersized congestion window.
pub fn build_congestion_controller(conf: &RecoveryConfig) -> Result<Box<dyn CongestionController>> {
    conf.validate()?;

    let max_datagram_size: u64 = conf.max_datagram_size as u64;
    let initial_cwnd = conf
        .initial_congestion_window
        .saturating_mul(max_datagram_size);

    Ok(match conf.congestion_control_algorithm {
        CongestionControlAlgorithm::Bbr => Box::new(Bbr::new(BbrConfig::from_recovery_config(conf))),
        CongestionControlAlgorithm::Dummy => Box::new(Dummy::new(initial_cwnd)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congestion_control_name() {
        let cases = [
            ("bbr", Ok(CongestionControlAlgorithm::Bbr)),
            ("Bbr", Ok(CongestionControlAlgorithm::Bbr)),
            ("BBR", Ok(CongestionControlAlgorithm::Bbr)),
            ("dummy", Ok(CongestionControlAlgorithm::Dummy)),
            ("Dummy", Ok(CongestionControlAlgorithm::Dummy)),
            ("DUMMY", Ok(CongestionControlAlgorithm::Dummy)),
            ("cubic", Err(Error::InvalidConfig("unknown".into()))),
            ("bbrr", Err(Error::InvalidConfig("unknown".into()))),
        ];

        for (name, algor) in cases {
            assert_eq!(CongestionControlAlgorithm::from_str(name), algor);
        }
    }

    #[test]
    fn blocked_state_change() {
        let cases = [
            (true, true, BlockedStateChange::Unchanged),
            (false, false, BlockedStateChange::Unchanged),
            (true, false, BlockedStateChange::Blocked),
            (false, true, BlockedStateChange::Unblocked),
        ];

        for (before, after, change) in cases {
            assert_eq!(BlockedStateChange::new(before, after), change);
        }
        assert!(BlockedStateChange::Unblocked.is_unblocked());
        assert!(!BlockedStateChange::Blocked.is_unblocked());
        assert_eq!(BlockedStateChange::default(), BlockedStateChange::Unchanged);
    }

    #[test]
    fn build_controllers() -> Result<()> {
        let mut conf = RecoveryConfig::default();
        let cc = build_congestion_controller(&conf)?;
        assert_eq!(cc.name(), "BBR");
        assert_eq!(cc.congestion_window(), 12000);
        assert_eq!(cc.initial_window(), 12000);
        assert_eq!(cc.minimal_window(), 4800);
        assert!(cc.in_slow_start());
        assert_eq!(format!("{:?}", cc), "congestion controller.");

        conf.set_congestion_control_algorithm(CongestionControlAlgorithm::Dummy);
        conf.set_initial_congestion_window(20);
        let cc = build_congestion_controller(&conf)?;
        assert_eq!(cc.name(), "DUMMY");
        assert_eq!(cc.congestion_window(), 24000);

        Ok(())
    }

    #[test]
    fn build_controller_invalid_config() {
        // Fields written directly bypass the setters.
        let mut conf = RecoveryConfig::default();
        conf.initial_congestion_window = 0;
        assert_eq!(
            build_congestion_controller(&conf).err(),
            Some(Error::InvalidConfig("zero initial congestion window".into()))
        );

        let mut conf = RecoveryConfig::default();
        conf.min_congestion_window = 1;
        assert!(build_congestion_controller(&conf).is_err());

        conf.set_min_congestion_window(1);
        let cc = match build_congestion_controller(&conf) {
            Ok(cc) => cc,
            Err(e) => panic!("unexpected error: {}", e),
        };
        assert_eq!(cc.minimal_window(), 4800);
    }
}

#[path = "bbr/bbr.rs"]
mod bbr;

mod dummy;
mod event;
mod minmax;
mod observer;
mod pacing;
