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

//! Optional telemetry of the BBR engine.
//!
//! Events follow the naming of the qlog recovery events. The engine notifies
//! its observer synchronously, so implementations should be cheap.

use std::fmt;
use std::time::Instant;

use log::*;
use serde::Serialize;

/// A point-in-time view of the BBR model.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Clone, PartialEq, Eq, Debug, Default)]
pub struct BbrMetrics {
    /// Name of the BBR state.
    pub state: &'static str,

    /// Name of the recovery state.
    pub recovery_state: &'static str,

    /// Effective congestion window in bytes.
    pub congestion_window: u64,

    /// Bytes in flight.
    pub bytes_in_flight: u64,

    /// Maximum bytes in flight since the last reset.
    pub bytes_in_flight_max: u64,

    /// Minimal RTT in microseconds.
    pub min_rtt: Option<u64>,

    /// Estimated bottleneck bandwidth in bits per second.
    pub bandwidth: u64,

    /// Pacing rate in bits per second.
    pub pacing_rate: u64,

    /// Pacing gain in units of 1/256.
    pub pacing_gain: u64,

    /// Congestion window gain in units of 1/256.
    pub cwnd_gain: u64,

    /// Most recent delivery rate sample in bits per second.
    pub delivery_rate: Option<u64>,

    /// Count of packet-timed round trips.
    pub round_trip_count: u64,
}

/// Event emitted by the BBR engine.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Clone, PartialEq, Eq, Debug)]
#[serde(tag = "name", content = "data")]
pub enum BbrEvent {
    /// The BBR state machine moved to a new state.
    #[serde(rename = "recovery:congestion_state_updated")]
    CongestionStateUpdated {
        old: &'static str,
        new: &'static str,
    },

    /// The loss recovery sub-state changed.
    #[serde(rename = "recovery:recovery_state_updated")]
    RecoveryStateUpdated {
        old: &'static str,
        new: &'static str,
    },

    /// Packets were declared lost.
    #[serde(rename = "recovery:congestion_event")]
    CongestionEvent {
        largest_packet_number_lost: u64,
        lost_bytes: u64,
        persistent_congestion: Option<bool>,
    },

    /// The model was updated by an ack or a loss.
    #[serde(rename = "recovery:metrics_updated")]
    MetricsUpdated(BbrMetrics),
}

/// Receiver of BBR telemetry.
pub trait BbrObserver: fmt::Debug + Send {
    /// Whether the observer wants events at all. The engine skips building
    /// events for disabled observers.
    fn enabled(&self) -> bool {
        true
    }

    /// Callback for each event.
    fn on_event(&mut self, now: Instant, event: &BbrEvent);
}

/// An observer which drops every event.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl BbrObserver for NoopObserver {
    fn enabled(&self) -> bool {
        false
    }

    fn on_event(&mut self, _now: Instant, _event: &BbrEvent) {}
}

/// An observer which writes events as JSON lines to the `log` facade.
#[derive(Debug)]
pub struct LogObserver {
    /// Prefix of every line, e.g. the connection trace id.
    trace_id: String,

    /// Time of the first event, used for relative timestamps.
    start_time: Option<Instant>,
}

impl LogObserver {
    pub fn new(trace_id: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            start_time: None,
        }
    }
}

impl BbrObserver for LogObserver {
    fn enabled(&self) -> bool {
        log_enabled!(Level::Trace)
    }

    fn on_event(&mut self, now: Instant, event: &BbrEvent) {
        let start_time = *self.start_time.get_or_insert(now);
        let time = now.saturating_duration_since(start_time).as_secs_f64() * 1000.0;

        match serde_json::to_string(event) {
            Ok(data) => trace!("{} time={:.3} {}", self.trace_id, time, data),
            Err(e) => warn!("{} serialize event failed: {:?}", self.trace_id, e),
        }
    }
}
