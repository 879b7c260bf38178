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

use std::time::Instant;

use crate::congestion_control::minmax::WindowedMaxFilter;
use crate::congestion_control::BW_UNIT;

const MICROS_PER_SEC: u128 = 1_000_000;

/// Tracks acks arriving faster than the estimated bandwidth allows, e.g.
/// because of delayed or stretched acks. The largest excess over the last
/// round trips is added to the congestion window so that the sender is not
/// starved while acks are held back.
#[derive(Debug)]
pub struct AckAggregation {
    /// Start of the current aggregation epoch.
    start_time: Option<Instant>,

    /// Bytes acked since the start of the epoch.
    aggregated_ack_bytes: u64,

    /// Max filter of the ack height keyed by packet-timed round trips.
    max_ack_height_filter: WindowedMaxFilter,
}

impl AckAggregation {
    pub fn new(window: u64) -> Self {
        Self {
            start_time: None,
            aggregated_ack_bytes: 0,
            max_ack_height_filter: WindowedMaxFilter::new(window),
        }
    }

    pub fn reset(&mut self) {
        self.start_time = None;
        self.aggregated_ack_bytes = 0;
        self.max_ack_height_filter.reset();
    }

    /// Largest ack height observed within the window, if any.
    pub fn max_ack_height(&self) -> Option<u64> {
        self.max_ack_height_filter.get().map(|s| s.value)
    }

    /// Account newly acked bytes and return the current ack height, i.e.
    /// the bytes acked beyond what the bandwidth (bits per second) explains.
    pub fn update(&mut self, now: Instant, acked_bytes: u64, bandwidth: u64, round: u64) -> u64 {
        let start_time = match self.start_time {
            Some(t) => t,
            None => {
                self.start_time = Some(now);
                return 0;
            }
        };

        let elapsed = now.saturating_duration_since(start_time).as_micros();
        let expected = bandwidth as u128 * elapsed / MICROS_PER_SEC / BW_UNIT as u128;
        let expected = u64::try_from(expected).unwrap_or(u64::MAX);

        // The ack rate fell back to the bandwidth: start a new epoch.
        if self.aggregated_ack_bytes <= expected {
            self.aggregated_ack_bytes = acked_bytes;
            self.start_time = Some(now);
            return 0;
        }

        self.aggregated_ack_bytes = self.aggregated_ack_bytes.saturating_add(acked_bytes);
        let ack_height = self.aggregated_ack_bytes - expected;
        self.max_ack_height_filter.update_max(ack_height, round);

        ack_height
    }
}
