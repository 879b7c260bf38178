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

//! Loss recovery of the BBR engine.
//!
//! On loss the engine caps its congestion window with a recovery window.
//! The recovery window starts from the bytes in flight (packet conservation)
//! and may grow again after one round trip, until an ack without loss
//! covers every packet sent before the last loss.

use strum_macros::EnumIter;
use strum_macros::IntoStaticStr;

use crate::congestion_control::event::AckEvent;
use crate::congestion_control::event::LossEvent;

/// Loss recovery sub-state, orthogonal to the BBR state machine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryState {
    /// Not in loss recovery.
    #[default]
    NotRecovery,

    /// The recovery window is held at the bytes in flight.
    Conservative,

    /// The recovery window grows with every acked byte.
    Growth,
}

#[derive(Debug)]
pub struct Recovery {
    /// Current sub-state.
    state: RecoveryState,

    /// Upper bound of the congestion window while recovering.
    window: u64,

    /// Largest packet number sent when the last loss was detected.
    end_of_recovery: Option<u64>,
}

impl Recovery {
    pub fn new(window: u64) -> Self {
        Self {
            state: RecoveryState::NotRecovery,
            window,
            end_of_recovery: None,
        }
    }

    pub fn reset(&mut self, window: u64) {
        self.state = RecoveryState::NotRecovery;
        self.window = window;
        self.end_of_recovery = None;
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    pub fn in_recovery(&self) -> bool {
        self.state != RecoveryState::NotRecovery
    }

    /// Shrink the recovery window after a loss, given the bytes in flight
    /// once the lost bytes were removed. Return true if recovery was entered.
    pub fn on_congestion_event(
        &mut self,
        loss: &LossEvent,
        bytes_in_flight: u64,
        min_cwnd: u64,
    ) -> bool {
        self.end_of_recovery = Some(loss.largest_sent_packet_number);

        let entered = !self.in_recovery();
        let mut window = self.window;
        if entered {
            self.state = RecoveryState::Conservative;
            window = bytes_in_flight.max(min_cwnd);
        }

        self.window = if loss.persistent_congestion {
            min_cwnd
        } else if window > loss.lost_bytes.saturating_add(min_cwnd) {
            window - loss.lost_bytes
        } else {
            min_cwnd
        };

        entered
    }

    /// Update the recovery state on an ack, given the bytes in flight once
    /// the acked bytes were removed.
    pub fn on_ack(&mut self, ack: &AckEvent, new_round: bool, bytes_in_flight: u64, min_cwnd: u64) {
        if !self.in_recovery() {
            return;
        }
        debug_assert!(self.end_of_recovery.is_some());

        if new_round {
            self.state = RecoveryState::Growth;
        }

        let recovered = self
            .end_of_recovery
            .map_or(true, |end| end < ack.largest_ack);
        if !ack.has_loss && recovered {
            self.state = RecoveryState::NotRecovery;
            return;
        }

        if self.state == RecoveryState::Growth {
            self.window = self.window.saturating_add(ack.acked_bytes);
        }
        self.window = self
            .window
            .max(bytes_in_flight.saturating_add(ack.acked_bytes))
            .max(min_cwnd);
    }
}
