// Copyright (c) 2024 The TQUIC Authors.
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

use std::time::Duration;

use super::event::AckEvent;
use super::event::LossEvent;
use super::BlockedStateChange;
use super::CongestionController;
use super::CongestionStats;

/// Dummy is a simple congestion controller with a static congestion window.
/// It is intended to be used for testing and experiments.
#[derive(Debug)]
pub struct Dummy {
    /// Congestion window in bytes.
    cwnd: u64,

    /// Max bytes in flight since the last reset.
    bytes_in_flight_max: u64,

    /// Packets allowed to bypass the congestion window.
    exemptions: u8,

    /// Congestion statistics.
    stats: CongestionStats,
}

impl Dummy {
    pub fn new(initial_cwnd: u64) -> Self {
        Self {
            cwnd: initial_cwnd,
            bytes_in_flight_max: 0,
            exemptions: 0,
            stats: Default::default(),
        }
    }
}

impl CongestionController for Dummy {
    fn name(&self) -> &str {
        "DUMMY"
    }

    fn on_data_sent(&mut self, bytes_sent: u64) -> BlockedStateChange {
        let could_send = self.can_send();
        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_add(bytes_sent);
        self.stats.bytes_sent_in_total = self.stats.bytes_sent_in_total.saturating_add(bytes_sent);
        self.bytes_in_flight_max = self.bytes_in_flight_max.max(self.stats.bytes_in_flight);
        self.exemptions = self.exemptions.saturating_sub(1);
        BlockedStateChange::new(could_send, self.can_send())
    }

    fn on_data_invalidated(&mut self, bytes_sent: u64) -> BlockedStateChange {
        let could_send = self.can_send();
        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_sub(bytes_sent);
        BlockedStateChange::new(could_send, self.can_send())
    }

    fn on_data_acknowledged(&mut self, ack: &AckEvent) -> BlockedStateChange {
        let could_send = self.can_send();
        if !ack.is_implicit {
            self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_sub(ack.acked_bytes);
            self.stats.bytes_acked_in_total = self
                .stats
                .bytes_acked_in_total
                .saturating_add(ack.acked_bytes);
        }
        BlockedStateChange::new(could_send, self.can_send())
    }

    fn on_data_lost(&mut self, loss: &LossEvent) -> BlockedStateChange {
        let could_send = self.can_send();
        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_sub(loss.lost_bytes);
        self.stats.bytes_lost_in_total = self.stats.bytes_lost_in_total.saturating_add(loss.lost_bytes);
        self.stats.congestion_events += 1;
        if loss.persistent_congestion {
            self.stats.persistent_congestion_events += 1;
        }
        BlockedStateChange::new(could_send, self.can_send())
    }

    fn set_exemption(&mut self, num_packets: u8) {
        self.exemptions = num_packets;
    }

    fn exemptions(&self) -> u8 {
        self.exemptions
    }

    fn reset(&mut self, full_reset: bool) {
        if full_reset {
            self.stats.bytes_in_flight = 0;
        }
        self.bytes_in_flight_max = self.stats.bytes_in_flight;
        self.exemptions = 0;
    }

    fn set_max_datagram_size(&mut self, max_datagram_size: u64) {
        // Do nothing.
    }

    fn congestion_window(&self) -> u64 {
        self.cwnd
    }

    fn send_allowance(&self, time_since_last_send: Option<Duration>) -> u64 {
        self.cwnd.saturating_sub(self.stats.bytes_in_flight)
    }

    fn bytes_in_flight(&self) -> u64 {
        self.stats.bytes_in_flight
    }

    fn bytes_in_flight_max(&self) -> u64 {
        self.bytes_in_flight_max
    }

    fn initial_window(&self) -> u64 {
        self.cwnd
    }

    fn minimal_window(&self) -> u64 {
        self.cwnd
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn dummy_init() {
        let d = Dummy::new(1200 * 10);
        assert_eq!(d.name(), "DUMMY");
        assert_eq!(d.congestion_window(), 1200 * 10);
        assert_eq!(d.initial_window(), 1200 * 10);
        assert_eq!(d.minimal_window(), 1200 * 10);

        assert_eq!(d.in_slow_start(), false);
        assert_eq!(d.in_recovery(), false);
        assert_eq!(d.stats().bytes_in_flight, 0);
        assert_eq!(d.pacing_rate(), None);
        assert_eq!(d.send_allowance(None), 1200 * 10);
    }

    #[test]
    fn dummy_stats() {
        let mut d = Dummy::new(1200 * 10);
        let now = Instant::now();

        // Sent and acked a packet
        d.on_data_sent(1200);
        assert_eq!(d.stats().bytes_in_flight, 1200);
        assert_eq!(d.stats().bytes_sent_in_total, 1200);

        let ack = AckEvent {
            time_now: now,
            adjusted_ack_time: now,
            largest_ack: 0,
            largest_sent_packet_number: 0,
            total_acked_bytes: 1200,
            acked_bytes: 1200,
            acked_packets: Vec::new(),
            min_rtt: None,
            has_loss: false,
            is_implicit: false,
            is_largest_acked_packet_app_limited: false,
        };
        d.on_data_acknowledged(&ack);
        assert_eq!(d.stats().bytes_in_flight, 0);
        assert_eq!(d.stats().bytes_acked_in_total, 1200);

        // Sent and lost a packet
        d.on_data_sent(1400);
        assert_eq!(d.stats().bytes_in_flight, 1400);
        assert_eq!(d.stats().bytes_sent_in_total, 2600);

        let loss = LossEvent {
            time_now: now,
            largest_packet_number_lost: 1,
            largest_sent_packet_number: 1,
            lost_bytes: 1400,
            persistent_congestion: false,
        };
        d.on_data_lost(&loss);
        assert_eq!(d.stats().bytes_in_flight, 0);
        assert_eq!(d.stats().bytes_lost_in_total, 1400);
        assert_eq!(d.stats().congestion_events, 1);
        assert_eq!(d.bytes_in_flight_max(), 1400);
    }

    #[test]
    fn dummy_blocked() {
        let mut d = Dummy::new(2400);
        assert_eq!(d.on_data_sent(1200), BlockedStateChange::Unchanged);
        assert_eq!(d.on_data_sent(1200), BlockedStateChange::Blocked);
        assert_eq!(d.send_allowance(Some(Duration::from_millis(1))), 0);

        d.set_exemption(1);
        assert!(d.can_send());
        assert_eq!(d.on_data_sent(1200), BlockedStateChange::Blocked);

        assert_eq!(d.on_data_invalidated(2400), BlockedStateChange::Unblocked);
        d.reset(true);
        assert_eq!(d.bytes_in_flight(), 0);
        assert_eq!(d.bytes_in_flight_max(), 0);
    }
}
