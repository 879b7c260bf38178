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

//! A BBR congestion control engine for QUIC transports.
//!
//! The engine decides how many bytes a single connection may keep in flight
//! and how fast it should pace them, using a model of the path built from
//! delivery rate samples and minimum round-trip time observations.
//!
//! ## Features
//!
//! * **Deterministic**: the engine never reads the clock. Every event carries
//!   the caller's notion of `now`, which makes the controller trivially
//!   testable with a simulated clock.
//! * **Transport agnostic**: packets and acknowledgements are described by
//!   plain records ([`AckEvent`], [`LossEvent`]) produced by the surrounding
//!   loss detection logic.
//! * **Observable**: state transitions and metrics can be exported through an
//!   optional [`BbrObserver`].
//!
//! ## Get started
//!
//! ```
//! use quic_bbr::{build_congestion_controller, RecoveryConfig};
//!
//! let conf = RecoveryConfig::default();
//! let mut cc = build_congestion_controller(&conf)?;
//! assert!(cc.can_send());
//! cc.on_data_sent(1200);
//! assert_eq!(cc.bytes_in_flight(), 1200);
//! # Ok::<(), quic_bbr::Error>(())
//! ```

use std::time::Duration;

/// The default size of UDP payloads.
pub const DEFAULT_SEND_UDP_PAYLOAD_SIZE: usize = 1200;

/// The minimum size of UDP payloads a QUIC endpoint must support.
const MIN_UDP_PAYLOAD_SIZE: usize = 1200;

/// The default initial congestion window in packets.
const DEFAULT_INITIAL_CONGESTION_WINDOW: u64 = 10;

/// The default minimal congestion window in packets.
const DEFAULT_MIN_CONGESTION_WINDOW: u64 = 4;

/// The default pacing granularity.
const DEFAULT_PACING_GRANULARITY: Duration = Duration::from_millis(1);

/// A specialized [`Result`] type for congestion control operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about congestion control and pacing.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// The maximum size of outgoing UDP payloads.
    pub max_datagram_size: usize,

    /// The congestion control algorithm used for a path.
    pub congestion_control_algorithm: CongestionControlAlgorithm,

    /// The minimal congestion window in packets.
    pub min_congestion_window: u64,

    /// The initial congestion window in packets.
    /// Endpoints SHOULD use an initial congestion window of ten times the
    /// maximum datagram size (max_datagram_size).
    /// See RFC 9002 Section 7.2
    pub initial_congestion_window: u64,

    /// Enable pacing to smooth the flow of packets sent onto the network.
    pub enable_pacing: bool,

    /// Minimal RTT for which pacing is applied. Below it the full window
    /// may be sent at once.
    pub pacing_granularity: Duration,

    /// The minimum duration for BBR ProbeRTT state.
    pub bbr_probe_rtt_duration: Duration,

    /// The lifetime of a min RTT sample before it has to be refreshed.
    pub bbr_rtprop_filter_len: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> RecoveryConfig {
        RecoveryConfig {
            max_datagram_size: DEFAULT_SEND_UDP_PAYLOAD_SIZE,
            congestion_control_algorithm: CongestionControlAlgorithm::Bbr,
            min_congestion_window: DEFAULT_MIN_CONGESTION_WINDOW,
            initial_congestion_window: DEFAULT_INITIAL_CONGESTION_WINDOW,
            enable_pacing: true,
            pacing_granularity: DEFAULT_PACING_GRANULARITY,
            bbr_probe_rtt_duration: Duration::from_millis(200),
            bbr_rtprop_filter_len: Duration::from_secs(10),
        }
    }
}

impl RecoveryConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `max_datagram_size` transport parameter.
    ///
    /// The value is clamped to the minimal UDP payload size of QUIC.
    pub fn set_max_datagram_size(&mut self, v: usize) {
        self.max_datagram_size = v.max(MIN_UDP_PAYLOAD_SIZE);
    }

    /// Set the congestion control algorithm.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.congestion_control_algorithm = cca;
    }

    /// Set the initial congestion window in packets.
    /// The default value is 10.
    pub fn set_initial_congestion_window(&mut self, packets: u64) {
        self.initial_congestion_window = packets;
    }

    /// Set the minimal congestion window in packets.
    ///
    /// The value is clamped to at least 4 packets. The default value is 4.
    pub fn set_min_congestion_window(&mut self, packets: u64) {
        self.min_congestion_window = packets.max(DEFAULT_MIN_CONGESTION_WINDOW);
    }

    /// Enable pacing to smooth the flow of packets sent onto the network.
    /// The default value is true.
    pub fn enable_pacing(&mut self, v: bool) {
        self.enable_pacing = v;
    }

    /// Set the pacing granularity in milliseconds.
    /// The default value is 1.
    pub fn set_pacing_granularity(&mut self, millis: u64) {
        self.pacing_granularity = Duration::from_millis(millis);
    }

    /// Set the minimum duration for BBR ProbeRTT state in milliseconds.
    /// The default value is 200.
    pub fn set_bbr_probe_rtt_duration(&mut self, millis: u64) {
        self.bbr_probe_rtt_duration = Duration::from_millis(millis);
    }

    /// Set the lifetime of a BBR min RTT sample in milliseconds.
    /// The default value is 10000.
    pub fn set_bbr_rtprop_filter_len(&mut self, millis: u64) {
        self.bbr_rtprop_filter_len = Duration::from_millis(millis);
    }

    /// Check that the configuration can drive a congestion controller.
    pub fn validate(&self) -> Result<()> {
        if self.max_datagram_size == 0 {
            return Err(Error::InvalidConfig("zero max datagram size".into()));
        }
        if self.initial_congestion_window == 0 {
            return Err(Error::InvalidConfig(
                "zero initial congestion window".into(),
            ));
        }
        if self.min_congestion_window < DEFAULT_MIN_CONGESTION_WINDOW {
            return Err(Error::InvalidConfig(format!(
                "min congestion window below {} packets",
                DEFAULT_MIN_CONGESTION_WINDOW
            )));
        }
        Ok(())
    }
}


pub use crate::congestion_control::build_congestion_controller;
pub use crate::congestion_control::AckEvent;
pub use crate::congestion_control::AckedPacket;
pub use crate::congestion_control::Bbr;
pub use crate::congestion_control::BbrConfig;
pub use crate::congestion_control::BbrEvent;
pub use crate::congestion_control::BbrMetrics;
pub use crate::congestion_control::BbrObserver;
pub use crate::congestion_control::BbrState;
pub use crate::congestion_control::BlockedStateChange;
pub use crate::congestion_control::CongestionControlAlgorithm;
pub use crate::congestion_control::CongestionController;
pub use crate::congestion_control::CongestionStats;
pub use crate::congestion_control::LastAckedPacketInfo;
pub use crate::congestion_control::LogObserver;
pub use crate::congestion_control::LossEvent;
pub use crate::congestion_control::NoopObserver;
pub use crate::congestion_control::RecoveryState;
pub use crate::error::Error;

#[path = "congestion_control/congestion_control.rs"]
pub mod congestion_control;

pub mod error;
