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

//! BBR Congestion Control.
//!
//! BBR uses recent measurements of a transport connection's delivery rate
//! and round-trip time to build an explicit model that includes both the
//! maximum recent bandwidth available to that connection, and its
//! minimum recent round-trip delay.  BBR then uses this model to control
//! both how fast it sends data and the maximum amount of data it allows
//! in flight in the network at any time.
//!
//! All gains are fixed point numbers in units of `GAIN_UNIT` (256), and
//! bandwidths are expressed in bits per second.
//!
//! See <https://datatracker.ietf.org/doc/html/draft-cardwell-iccrg-bbr-congestion-control-00>.

extern crate rand;

use std::time::Duration;
use std::time::Instant;

use log::*;
use rand::Rng;
use strum_macros::EnumIter;
use strum_macros::IntoStaticStr;

use self::ack_aggregation::AckAggregation;
use self::bandwidth::BandwidthFilter;
use self::recovery::Recovery;
pub use self::recovery::RecoveryState;
use super::event::AckEvent;
use super::event::LossEvent;
use super::observer::BbrEvent;
use super::observer::BbrMetrics;
use super::observer::BbrObserver;
use super::observer::NoopObserver;
use super::pacing;
use super::pacing::Pacer;
use super::pacing::PacingState;
use super::BlockedStateChange;
use super::CongestionController;
use super::CongestionStats;
use super::BW_UNIT;
use super::GAIN_UNIT;
use crate::RecoveryConfig;

/// BBR configurable parameters.
#[derive(Debug, Clone)]
pub struct BbrConfig {
    /// Initial congestion window in packets.
    initial_cwnd_packets: u64,

    /// Minimal congestion window in packets.
    min_cwnd_packets: u64,

    /// Max datagram size in bytes.
    max_datagram_size: u64,

    /// Enable pacing.
    enable_pacing: bool,

    /// Minimal RTT for which pacing is applied.
    pacing_granularity: Duration,

    /// Time spent in ProbeRTT with a minimal window.
    probe_rtt_duration: Duration,

    /// Lifetime of a min RTT sample.
    min_rtt_expiration: Duration,
}

impl BbrConfig {
    pub fn new(initial_cwnd_packets: u64, min_cwnd_packets: u64, max_datagram_size: u64) -> Self {
        Self {
            initial_cwnd_packets,
            min_cwnd_packets: min_cwnd_packets.max(MIN_CWND_IN_MSS),
            max_datagram_size,
            ..Default::default()
        }
    }

    pub fn from_recovery_config(conf: &RecoveryConfig) -> Self {
        Self {
            initial_cwnd_packets: conf.initial_congestion_window,
            min_cwnd_packets: conf.min_congestion_window.max(MIN_CWND_IN_MSS),
            max_datagram_size: conf.max_datagram_size as u64,
            enable_pacing: conf.enable_pacing,
            pacing_granularity: conf.pacing_granularity,
            probe_rtt_duration: conf.bbr_probe_rtt_duration,
            min_rtt_expiration: conf.bbr_rtprop_filter_len,
        }
    }
}

impl Default for BbrConfig {
    fn default() -> Self {
        Self {
            initial_cwnd_packets: 10,
            min_cwnd_packets: MIN_CWND_IN_MSS,
            max_datagram_size: crate::DEFAULT_SEND_UDP_PAYLOAD_SIZE as u64,
            enable_pacing: true,
            pacing_granularity: Duration::from_millis(1),
            probe_rtt_duration: PROBE_RTT_DURATION,
            min_rtt_expiration: MIN_RTT_EXPIRATION,
        }
    }
}

/// BBRHighGain: the minimum gain value that will allow the sending rate to
/// double each round (`2/ln(2)` ~= `2.885`), used in Startup mode for both
/// pacing_gain and cwnd_gain.
const HIGH_GAIN: u64 = GAIN_UNIT * 2885 / 1000 + 1;

/// The inverse of HIGH_GAIN, used to drain the queue created in Startup.
const DRAIN_GAIN: u64 = GAIN_UNIT * 1000 / 2885;

/// The cwnd gain in ProbeBW state.
const CWND_GAIN: u64 = GAIN_UNIT * 2;

/// Bandwidth growth (1.25x) per round expected while the pipe is not full.
const STARTUP_GROWTH_TARGET: u64 = GAIN_UNIT * 5 / 4;

/// Max count of rounds without enough growth, before the pipe is supposed
/// to be filled.
const STARTUP_SLOW_GROW_ROUND_LIMIT: u64 = 3;

/// BBRGainCycleLen: the number of phases in the BBR ProbeBW gain cycle.
const GAIN_CYCLE_LEN: usize = 8;

/// Pacing Gain Cycles. Each phase normally lasts for roughly min RTT.
const PACING_GAIN_CYCLE: [u64; GAIN_CYCLE_LEN] = [
    GAIN_UNIT * 5 / 4,
    GAIN_UNIT * 3 / 4,
    GAIN_UNIT,
    GAIN_UNIT,
    GAIN_UNIT,
    GAIN_UNIT,
    GAIN_UNIT,
    GAIN_UNIT,
];

/// Length of the bandwidth max filter in packet-timed round trips.
const BANDWIDTH_FILTER_LEN: u64 = 10;

/// Length of the ack height max filter in packet-timed round trips.
const ACK_HEIGHT_FILTER_LEN: u64 = 10;

/// ProbeRTTDuration: the minimum duration for which ProbeRTT state holds
/// inflight to the minimal window: 200 ms.
const PROBE_RTT_DURATION: Duration = Duration::from_millis(200);

/// A min RTT sample older than this triggers ProbeRTT: 10 secs.
const MIN_RTT_EXPIRATION: Duration = Duration::from_secs(10);

/// Number of send quanta added to the target cwnd.
const QUANTA_FACTOR: u64 = 3;

/// The minimal congestion window in packets.
const MIN_CWND_IN_MSS: u64 = 4;

/// The recovery window in packets before any loss.
const DEFAULT_RECOVERY_CWND_IN_MSS: u64 = 2000;

const MICROS_PER_SEC: u128 = 1_000_000;

/// BBR State Machine.
///
/// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 3.4.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BbrState {
    /// Probe the bandwidth quickly, doubling the sending rate each round.
    #[default]
    Startup,

    /// Drain the queue created in Startup.
    Drain,

    /// Cycle the pacing gain to probe for more bandwidth.
    ProbeBw,

    /// Hold a minimal window to refresh the min RTT estimate.
    ProbeRtt,
}

/// BBR Congestion Control Algorithm.
///
/// See draft-cardwell-iccrg-bbr-congestion-control-00.
#[derive(Debug)]
pub struct Bbr {
    /// Configurable parameters.
    config: BbrConfig,

    /// Statistics. `stats.bytes_in_flight` is the bytes in flight.
    stats: CongestionStats,

    /// State.
    state: BbrState,

    /// Loss recovery.
    recovery: Recovery,

    /// Current max datagram size of the path.
    max_datagram_size: u64,

    /// Congestion window in bytes, without recovery or ProbeRTT bounds.
    congestion_window: u64,

    /// Initial congestion window in bytes.
    initial_congestion_window: u64,

    /// Max bytes in flight since the last reset.
    bytes_in_flight_max: u64,

    /// Packets allowed to bypass the congestion window.
    exemptions: u8,

    /// The dynamic gain factor used to scale the bandwidth estimate to
    /// produce the pacing rate.
    pacing_gain: u64,

    /// The dynamic gain factor used to scale the estimated BDP to produce a
    /// congestion window.
    cwnd_gain: u64,

    /// Current index of PACING_GAIN_CYCLE[]. Meaningful in ProbeBW only.
    pacing_cycle_index: usize,

    /// Last time when pacing_cycle_index was updated.
    cycle_start: Option<Instant>,

    /// The maximum size of a data aggregate scheduled and transmitted
    /// together.
    send_quantum: u64,

    /// Estimated two-way round-trip propagation delay of the path.
    min_rtt: Option<Duration>,

    /// The time at which the current min RTT sample was obtained.
    min_rtt_timestamp: Option<Instant>,

    /// Whether the min RTT sample is older than its lifetime.
    rtt_sample_expired: bool,

    /// Count of packet-timed round trips.
    round_trip_counter: u64,

    /// The round trip ends once a packet beyond this one is acked.
    end_of_round_trip: Option<u64>,

    /// Whether BBR estimates that it has ever fully utilized its available
    /// bandwidth ("filled the pipe").
    btlbw_found: bool,

    /// Consecutive rounds without enough bandwidth growth in Startup.
    slow_startup_round_counter: u64,

    /// Baseline bandwidth of the startup growth check.
    last_estimated_startup_bandwidth: u64,

    /// Bottleneck bandwidth estimator.
    bandwidth_filter: BandwidthFilter,

    /// Ack aggregation tracker.
    ack_aggregation: AckAggregation,

    /// Whether the sender is resuming from an app limited idle period.
    exiting_quiescence: bool,

    /// Timestamp when ProbeRTT state may end.
    probe_rtt_end_time: Option<Instant>,

    /// The round trip at which ProbeRTT holds its minimal window.
    probe_rtt_round: Option<u64>,

    /// Pacer of the send allowance.
    pacer: Pacer,

    /// Telemetry observer.
    observer: Box<dyn BbrObserver>,
}

impl Bbr {
    pub fn new(config: BbrConfig) -> Self {
        Self::with_observer(config, Box::new(NoopObserver))
    }

    pub fn with_observer(config: BbrConfig, observer: Box<dyn BbrObserver>) -> Self {
        let pacer = Pacer::new(config.enable_pacing, config.pacing_granularity);
        let max_datagram_size = config.max_datagram_size;

        let mut bbr = Self {
            config,
            stats: Default::default(),
            state: BbrState::Startup,
            recovery: Recovery::new(0),
            max_datagram_size,
            congestion_window: 0,
            initial_congestion_window: 0,
            bytes_in_flight_max: 0,
            exemptions: 0,
            pacing_gain: HIGH_GAIN,
            cwnd_gain: HIGH_GAIN,
            pacing_cycle_index: 0,
            cycle_start: None,
            send_quantum: 0,
            min_rtt: None,
            min_rtt_timestamp: None,
            rtt_sample_expired: true,
            round_trip_counter: 0,
            end_of_round_trip: None,
            btlbw_found: false,
            slow_startup_round_counter: 0,
            last_estimated_startup_bandwidth: 0,
            bandwidth_filter: BandwidthFilter::new(BANDWIDTH_FILTER_LEN),
            ack_aggregation: AckAggregation::new(ACK_HEIGHT_FILTER_LEN),
            exiting_quiescence: false,
            probe_rtt_end_time: None,
            probe_rtt_round: None,
            pacer,
            observer,
        };
        bbr.reset(true);

        bbr
    }

    /// Replace the telemetry observer.
    pub fn set_observer(&mut self, observer: Box<dyn BbrObserver>) {
        self.observer = observer;
    }

    /// Current state of the state machine.
    pub fn state(&self) -> BbrState {
        self.state
    }

    /// Current loss recovery sub-state.
    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery.state()
    }

    /// Upper bound of the congestion window while recovering.
    pub fn recovery_window(&self) -> u64 {
        self.recovery.window()
    }

    /// Pacing gain in units of 1/256.
    pub fn pacing_gain(&self) -> u64 {
        self.pacing_gain
    }

    /// Cwnd gain in units of 1/256.
    pub fn cwnd_gain(&self) -> u64 {
        self.cwnd_gain
    }

    /// Index into the ProbeBW pacing gain cycle.
    pub fn pacing_cycle_index(&self) -> usize {
        self.pacing_cycle_index
    }

    /// Whether the bottleneck bandwidth was found.
    pub fn is_btlbw_found(&self) -> bool {
        self.btlbw_found
    }

    /// Minimal RTT estimate, None if unknown.
    pub fn min_rtt(&self) -> Option<Duration> {
        self.min_rtt
    }

    /// Count of packet-timed round trips.
    pub fn round_trip_count(&self) -> u64 {
        self.round_trip_counter
    }

    /// Current send quantum in bytes.
    pub fn send_quantum(&self) -> u64 {
        self.send_quantum
    }

    /// Most recent delivery rate sample in bits per second.
    pub fn recent_delivery_rate(&self) -> Option<u64> {
        self.bandwidth_filter
            .recent_sample()
            .map(|s| s.delivery_rate)
    }

    /// Snapshot of the model for telemetry.
    pub fn metrics(&self) -> BbrMetrics {
        BbrMetrics {
            state: self.state.into(),
            recovery_state: self.recovery.state().into(),
            congestion_window: self.congestion_window(),
            bytes_in_flight: self.stats.bytes_in_flight,
            bytes_in_flight_max: self.bytes_in_flight_max,
            min_rtt: self.min_rtt.map(|r| r.as_micros() as u64),
            bandwidth: self.bandwidth(),
            pacing_rate: self.current_pacing_rate(),
            pacing_gain: self.pacing_gain,
            cwnd_gain: self.cwnd_gain,
            delivery_rate: self.recent_delivery_rate(),
            round_trip_count: self.round_trip_counter,
        }
    }

    fn min_cwnd(&self) -> u64 {
        self.config
            .min_cwnd_packets
            .saturating_mul(self.max_datagram_size)
    }

    fn current_pacing_rate(&self) -> u64 {
        self.bandwidth().saturating_mul(self.pacing_gain) / GAIN_UNIT
    }

    fn notify(&mut self, now: Instant, event: BbrEvent) {
        if self.observer.enabled() {
            self.observer.on_event(now, &event);
        }
    }

    fn notify_metrics(&mut self, now: Instant) {
        if self.observer.enabled() {
            let event = BbrEvent::MetricsUpdated(self.metrics());
            self.observer.on_event(now, &event);
        }
    }

    fn notify_recovery_state(&mut self, now: Instant, old: RecoveryState) {
        let new = self.recovery.state();
        if old != new {
            trace!("{}. recovery state {:?} -> {:?}", self.name(), old, new);
            self.notify(
                now,
                BbrEvent::RecoveryStateUpdated {
                    old: old.into(),
                    new: new.into(),
                },
            );
        }
    }

    fn set_state(&mut self, now: Instant, state: BbrState) {
        let old = self.state;
        self.state = state;
        trace!(
            "{}. state {:?} -> {:?}, pacing_gain={}, cwnd_gain={}, bw={}, min_rtt={:?}",
            self.name(),
            old,
            state,
            self.pacing_gain,
            self.cwnd_gain,
            self.bandwidth(),
            self.min_rtt
        );
        self.notify(
            now,
            BbrEvent::CongestionStateUpdated {
                old: old.into(),
                new: state.into(),
            },
        );
    }

    /// Remove bytes from flight. The caller must not remove more than it
    /// added.
    fn remove_from_flight(&mut self, bytes: u64) {
        debug_assert!(self.stats.bytes_in_flight >= bytes);
        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_sub(bytes);
    }

    /// The upper bound on the volume of data BBR allows in flight for the
    /// given gain.
    fn target_cwnd(&self, gain: u64) -> u64 {
        let bandwidth = self.bandwidth();
        let min_rtt = match self.min_rtt {
            Some(min_rtt) if bandwidth > 0 => min_rtt,
            _ => return gain.saturating_mul(self.initial_congestion_window) / GAIN_UNIT,
        };

        let bdp = bandwidth as u128 * min_rtt.as_micros() / MICROS_PER_SEC / BW_UNIT as u128;
        let target = bdp * gain as u128 / GAIN_UNIT as u128
            + QUANTA_FACTOR as u128 * self.send_quantum as u128;
        u64::try_from(target).unwrap_or(u64::MAX)
    }

    /// Refresh the min RTT estimate with the sample carried by an ack.
    fn update_min_rtt(&mut self, ack: &AckEvent) {
        let sample = match ack.min_rtt {
            Some(sample) => sample,
            None => return,
        };

        let expiration = self.config.min_rtt_expiration;
        self.rtt_sample_expired = self
            .min_rtt_timestamp
            .and_then(|t| t.checked_add(expiration))
            .map_or(false, |expiry| expiry <= ack.time_now);

        if self.rtt_sample_expired || self.min_rtt.map_or(true, |min_rtt| min_rtt > sample) {
            self.min_rtt = Some(sample);
            self.min_rtt_timestamp = Some(ack.time_now);
        }
    }

    /// Count packet-timed round trips. A round ends once a packet sent after
    /// the end of the previous round is acked.
    fn update_round(&mut self, ack: &AckEvent) -> bool {
        if self
            .end_of_round_trip
            .map_or(true, |end| end < ack.largest_ack)
        {
            self.round_trip_counter += 1;
            self.end_of_round_trip = Some(ack.largest_sent_packet_number);
            return true;
        }
        false
    }

    /// Advance the ProbeBW gain cycle if the current phase is over.
    fn update_gain_cycle(&mut self, ack: &AckEvent, prev_in_flight: u64) {
        // Each phase normally lasts for roughly min RTT.
        let mut should_advance = match (self.cycle_start, self.min_rtt) {
            (Some(start), Some(min_rtt)) => ack.time_now.saturating_duration_since(start) > min_rtt,
            _ => false,
        };

        // Keep probing until inflight reached the probing target or some
        // packets have been lost.
        if self.pacing_gain > GAIN_UNIT
            && !ack.has_loss
            && prev_in_flight < self.target_cwnd(self.pacing_gain)
        {
            should_advance = false;
        }

        // Stop draining once inflight dropped to the estimated BDP.
        if self.pacing_gain < GAIN_UNIT
            && self.stats.bytes_in_flight <= self.target_cwnd(GAIN_UNIT)
        {
            should_advance = true;
        }

        if should_advance {
            self.pacing_cycle_index = (self.pacing_cycle_index + 1) % GAIN_CYCLE_LEN;
            self.cycle_start = Some(ack.time_now);
            self.pacing_gain = PACING_GAIN_CYCLE[self.pacing_cycle_index];
        }
    }

    /// Estimate whether the pipe is full by looking for a plateau in the
    /// bandwidth estimate.
    fn check_startup_growth(&mut self, ack: &AckEvent, new_round: bool) {
        if self.btlbw_found || !new_round || ack.largest_acked_app_limited() {
            return;
        }

        let target = self
            .last_estimated_startup_bandwidth
            .saturating_mul(STARTUP_GROWTH_TARGET)
            / GAIN_UNIT;
        let bandwidth = self.bandwidth();

        // Bandwidth still growing?
        if bandwidth >= target {
            self.last_estimated_startup_bandwidth = bandwidth;
            self.slow_startup_round_counter = 0;
            return;
        }

        self.slow_startup_round_counter += 1;
        if self.slow_startup_round_counter >= STARTUP_SLOW_GROW_ROUND_LIMIT {
            self.btlbw_found = true;
        }
    }

    fn enter_startup(&mut self, now: Instant) {
        self.pacing_gain = HIGH_GAIN;
        self.cwnd_gain = HIGH_GAIN;
        self.set_state(now, BbrState::Startup);
    }

    fn enter_drain(&mut self, now: Instant) {
        self.pacing_gain = DRAIN_GAIN;
        self.cwnd_gain = HIGH_GAIN;
        self.set_state(now, BbrState::Drain);
    }

    fn enter_probe_bw(&mut self, now: Instant) {
        self.cwnd_gain = CWND_GAIN;

        // Pick a random initial phase among all but the draining one.
        self.pacing_cycle_index = rand::thread_rng().gen_range(2..GAIN_CYCLE_LEN);
        debug_assert_ne!(self.pacing_cycle_index, 1);
        self.pacing_gain = PACING_GAIN_CYCLE[self.pacing_cycle_index];
        self.cycle_start = Some(now);

        self.set_state(now, BbrState::ProbeBw);
    }

    fn enter_probe_rtt(&mut self, now: Instant, largest_sent_packet_number: u64) {
        self.pacing_gain = GAIN_UNIT;
        self.probe_rtt_end_time = None;
        self.probe_rtt_round = None;

        // Samples taken with a minimal window undercount the bandwidth.
        self.bandwidth_filter
            .set_app_limited(largest_sent_packet_number);

        self.set_state(now, BbrState::ProbeRtt);
    }

    /// Hold the minimal window for at least the probe duration and one
    /// round trip, then leave ProbeRTT.
    fn handle_probe_rtt(&mut self, now: Instant, new_round: bool, largest_sent_packet_number: u64) {
        self.bandwidth_filter
            .set_app_limited(largest_sent_packet_number);

        if self.probe_rtt_end_time.is_none()
            && self.stats.bytes_in_flight < self.congestion_window() + self.max_datagram_size
        {
            self.probe_rtt_end_time = now.checked_add(self.config.probe_rtt_duration);
            self.probe_rtt_round = None;
            return;
        }

        let end_time = match self.probe_rtt_end_time {
            Some(t) => t,
            None => return,
        };

        if self.probe_rtt_round.is_none() && new_round {
            self.probe_rtt_round = Some(self.round_trip_counter);
        }

        if self.probe_rtt_round.is_some() && end_time <= now {
            self.min_rtt_timestamp = Some(now);
            self.rtt_sample_expired = false;

            if self.btlbw_found {
                self.enter_probe_bw(now);
            } else {
                self.enter_startup(now);
            }
        }
    }

    fn update_send_quantum(&mut self) {
        self.send_quantum = pacing::send_quantum(self.current_pacing_rate(), self.max_datagram_size);
    }

    /// Grow the congestion window toward the target window.
    fn update_congestion_window(&mut self, total_acked_bytes: u64, acked_bytes: u64) {
        // The window is frozen at its floor while probing RTT.
        if self.state == BbrState::ProbeRtt {
            return;
        }

        self.update_send_quantum();

        let mut target_cwnd = self.target_cwnd(self.cwnd_gain);
        if self.btlbw_found {
            // Leave room for acks held back by the receiver.
            target_cwnd = target_cwnd.saturating_add(self.ack_aggregation.max_ack_height().unwrap_or(0));
        }

        let mut cwnd = self.congestion_window;
        if self.btlbw_found {
            cwnd = target_cwnd.min(cwnd.saturating_add(acked_bytes));
        } else if cwnd < target_cwnd || total_acked_bytes < self.initial_congestion_window {
            cwnd = cwnd.saturating_add(acked_bytes);
        }
        self.congestion_window = cwnd.max(self.min_cwnd());

        trace!(
            "{}. target_cwnd={}, cwnd={}, send_quantum={}, bytes_in_flight={}",
            self.name(),
            target_cwnd,
            self.congestion_window,
            self.send_quantum,
            self.stats.bytes_in_flight
        );
    }
}

impl CongestionController for Bbr {
    fn name(&self) -> &str {
        "BBR"
    }

    fn on_data_sent(&mut self, bytes_sent: u64) -> BlockedStateChange {
        let could_send = self.can_send();

        if self.stats.bytes_in_flight == 0 && self.bandwidth_filter.is_app_limited() {
            self.exiting_quiescence = true;
        }

        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_add(bytes_sent);
        self.bytes_in_flight_max = self.bytes_in_flight_max.max(self.stats.bytes_in_flight);
        self.stats.bytes_sent_in_total = self.stats.bytes_sent_in_total.saturating_add(bytes_sent);
        if self.in_slow_start() {
            self.stats.bytes_sent_in_slow_start = self
                .stats
                .bytes_sent_in_slow_start
                .saturating_add(bytes_sent);
        }

        self.exemptions = self.exemptions.saturating_sub(1);

        BlockedStateChange::new(could_send, self.can_send())
    }

    fn on_data_invalidated(&mut self, bytes_sent: u64) -> BlockedStateChange {
        let could_send = self.can_send();
        self.remove_from_flight(bytes_sent);
        BlockedStateChange::new(could_send, self.can_send())
    }

    fn on_data_acknowledged(&mut self, ack: &AckEvent) -> BlockedStateChange {
        let could_send = self.can_send();
        let now = ack.time_now;

        if ack.is_implicit {
            self.update_congestion_window(ack.total_acked_bytes, ack.acked_bytes);
            return BlockedStateChange::new(could_send, self.can_send());
        }

        let prev_in_flight = self.stats.bytes_in_flight;
        self.remove_from_flight(ack.acked_bytes);
        self.stats.bytes_acked_in_total = self
            .stats
            .bytes_acked_in_total
            .saturating_add(ack.acked_bytes);
        if self.in_slow_start() {
            self.stats.bytes_acked_in_slow_start = self
                .stats
                .bytes_acked_in_slow_start
                .saturating_add(ack.acked_bytes);
        }

        self.update_min_rtt(ack);
        let new_round = self.update_round(ack);
        self.bandwidth_filter
            .on_packet_acked(ack, self.round_trip_counter);

        let recovery_state = self.recovery.state();
        let min_cwnd = self.min_cwnd();
        self.recovery
            .on_ack(ack, new_round, self.stats.bytes_in_flight, min_cwnd);
        self.notify_recovery_state(now, recovery_state);

        let bandwidth = self.bandwidth();
        self.ack_aggregation
            .update(now, ack.acked_bytes, bandwidth, self.round_trip_counter);

        if self.state == BbrState::ProbeBw {
            self.update_gain_cycle(ack, prev_in_flight);
        }

        self.check_startup_growth(ack, new_round);

        if self.state == BbrState::Startup && self.btlbw_found {
            self.enter_drain(now);
        }

        if self.state == BbrState::Drain
            && self.stats.bytes_in_flight <= self.target_cwnd(GAIN_UNIT)
        {
            self.enter_probe_bw(now);
        }

        if self.state != BbrState::ProbeRtt && !self.exiting_quiescence && self.rtt_sample_expired
        {
            self.enter_probe_rtt(now, ack.largest_sent_packet_number);
        }
        self.exiting_quiescence = false;

        if self.state == BbrState::ProbeRtt {
            self.handle_probe_rtt(now, new_round, ack.largest_sent_packet_number);
        }

        self.update_congestion_window(ack.total_acked_bytes, ack.acked_bytes);
        self.notify_metrics(now);

        BlockedStateChange::new(could_send, self.can_send())
    }

    fn on_data_lost(&mut self, loss: &LossEvent) -> BlockedStateChange {
        let could_send = self.can_send();
        let now = loss.time_now;

        debug_assert!(loss.lost_bytes > 0);
        self.stats.congestion_events += 1;
        self.stats.bytes_lost_in_total = self.stats.bytes_lost_in_total.saturating_add(loss.lost_bytes);
        if self.in_slow_start() {
            self.stats.bytes_lost_in_slow_start = self
                .stats
                .bytes_lost_in_slow_start
                .saturating_add(loss.lost_bytes);
        }
        self.remove_from_flight(loss.lost_bytes);

        let recovery_state = self.recovery.state();
        let min_cwnd = self.min_cwnd();
        if self
            .recovery
            .on_congestion_event(loss, self.stats.bytes_in_flight, min_cwnd)
        {
            // The recovery lasts at least until the packets in flight are
            // acked.
            self.end_of_round_trip = Some(loss.largest_sent_packet_number);
        }
        if loss.persistent_congestion {
            self.stats.persistent_congestion_events += 1;
        }

        trace!(
            "{}. congestion event: lost={}, persistent={}, recovery_window={}, bytes_in_flight={}",
            self.name(),
            loss.lost_bytes,
            loss.persistent_congestion,
            self.recovery.window(),
            self.stats.bytes_in_flight
        );

        self.notify_recovery_state(now, recovery_state);
        self.notify(
            now,
            BbrEvent::CongestionEvent {
                largest_packet_number_lost: loss.largest_packet_number_lost,
                lost_bytes: loss.lost_bytes,
                persistent_congestion: loss.persistent_congestion.then_some(true),
            },
        );
        self.notify_metrics(now);

        BlockedStateChange::new(could_send, self.can_send())
    }

    fn on_spurious_congestion_event(&mut self) -> bool {
        // BBR does not reduce its window on loss, so there is nothing to undo.
        false
    }

    fn set_app_limited(&mut self, largest_sent_packet_number: u64) {
        if self.stats.bytes_in_flight > self.congestion_window() {
            return;
        }
        self.bandwidth_filter
            .set_app_limited(largest_sent_packet_number);
    }

    fn set_exemption(&mut self, num_packets: u8) {
        self.exemptions = num_packets;
    }

    fn exemptions(&self) -> u8 {
        self.exemptions
    }

    fn reset(&mut self, full_reset: bool) {
        let max_datagram_size = self.max_datagram_size;

        self.initial_congestion_window = self
            .config
            .initial_cwnd_packets
            .saturating_mul(max_datagram_size);
        self.congestion_window = self.initial_congestion_window.max(self.min_cwnd());
        self.recovery
            .reset(DEFAULT_RECOVERY_CWND_IN_MSS.saturating_mul(max_datagram_size));

        if full_reset {
            self.stats.bytes_in_flight = 0;
        }
        self.bytes_in_flight_max = (self.congestion_window / 2).max(self.stats.bytes_in_flight);
        self.exemptions = 0;

        self.state = BbrState::Startup;
        self.pacing_gain = HIGH_GAIN;
        self.cwnd_gain = HIGH_GAIN;
        self.round_trip_counter = 0;
        self.end_of_round_trip = None;
        self.btlbw_found = false;
        self.send_quantum = 0;
        self.slow_startup_round_counter = 0;
        self.last_estimated_startup_bandwidth = 0;
        self.pacing_cycle_index = 0;
        self.cycle_start = None;
        self.exiting_quiescence = false;
        self.probe_rtt_end_time = None;
        self.probe_rtt_round = None;
        self.rtt_sample_expired = true;
        self.min_rtt = None;
        self.min_rtt_timestamp = None;
        self.ack_aggregation.reset();
        self.bandwidth_filter.reset();

        trace!(
            "{}. reset: full={}, cwnd={}, bytes_in_flight={}",
            self.name(),
            full_reset,
            self.congestion_window,
            self.stats.bytes_in_flight
        );
    }

    fn set_max_datagram_size(&mut self, max_datagram_size: u64) {
        self.max_datagram_size = max_datagram_size;
        self.congestion_window = self.congestion_window.max(self.min_cwnd());
    }

    fn congestion_window(&self) -> u64 {
        if self.state == BbrState::ProbeRtt {
            return self.min_cwnd();
        }

        if self.recovery.in_recovery() {
            return self.congestion_window.min(self.recovery.window());
        }

        self.congestion_window
    }

    fn send_allowance(&self, time_since_last_send: Option<Duration>) -> u64 {
        let state = PacingState {
            congestion_window: self.congestion_window(),
            bytes_in_flight: self.stats.bytes_in_flight,
            bandwidth: self.bandwidth(),
            pacing_gain: self.pacing_gain,
            min_rtt: self.min_rtt,
            in_startup: self.state == BbrState::Startup,
        };
        self.pacer.send_allowance(&state, time_since_last_send)
    }

    fn bandwidth(&self) -> u64 {
        self.bandwidth_filter.bandwidth()
    }

    fn is_app_limited(&self) -> bool {
        self.bandwidth_filter.is_app_limited()
    }

    fn bytes_in_flight(&self) -> u64 {
        self.stats.bytes_in_flight
    }

    fn bytes_in_flight_max(&self) -> u64 {
        self.bytes_in_flight_max
    }

    fn in_slow_start(&self) -> bool {
        self.state == BbrState::Startup
    }

    fn in_recovery(&self) -> bool {
        self.recovery.in_recovery()
    }

    fn pacing_rate(&self) -> Option<u64> {
        Some(self.current_pacing_rate())
    }

    fn initial_window(&self) -> u64 {
        self.initial_congestion_window
    }

    fn minimal_window(&self) -> u64 {
        self.min_cwnd()
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}


mod ack_aggregation;
mod bandwidth;
mod recovery;
