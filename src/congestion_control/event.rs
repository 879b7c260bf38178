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

//! Records produced by loss detection and consumed by congestion control.

use std::time::Duration;
use std::time::Instant;

/// Snapshot of the connection taken when the most recent packet before a
/// given packet was acknowledged. It is the reference point of delivery rate
/// samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastAckedPacketInfo {
    /// Time when the last acked packet was sent.
    pub sent_time: Instant,

    /// Total bytes sent when the last acked packet was sent.
    pub total_bytes_sent: u64,

    /// Total bytes acked when the last acked packet was acked.
    pub total_bytes_acked: u64,

    /// Time when the last acked packet was acked.
    pub ack_time: Instant,

    /// Ack time adjusted by the peer's ack delay.
    pub adjusted_ack_time: Instant,
}

/// A packet newly acknowledged by an ack frame.
#[derive(Debug, Clone)]
pub struct AckedPacket {
    /// Packet number.
    pub packet_number: u64,

    /// Retransmittable bytes in the packet. Zero for pure ack packets.
    pub packet_length: u64,

    /// Time when the packet was sent.
    pub sent_time: Instant,

    /// Total bytes sent on the connection, including this packet.
    pub total_bytes_sent: u64,

    /// Delivery state at the time the packet was sent, if any packet had
    /// already been acked.
    pub last_acked_packet_info: Option<LastAckedPacketInfo>,

    /// Whether the sender was application limited when sending the packet.
    pub is_app_limited: bool,
}

/// Everything congestion control needs to know about a processed ack frame.
#[derive(Debug, Clone)]
pub struct AckEvent {
    /// Time when the ack frame was processed.
    pub time_now: Instant,

    /// Ack time minus the ack delay reported by the peer.
    pub adjusted_ack_time: Instant,

    /// Largest packet number acknowledged by the frame.
    pub largest_ack: u64,

    /// Largest packet number sent so far.
    pub largest_sent_packet_number: u64,

    /// Total retransmittable bytes acked on the connection so far, including
    /// this event.
    pub total_acked_bytes: u64,

    /// Retransmittable bytes newly acked by this event.
    pub acked_bytes: u64,

    /// Packets newly acked by this event.
    pub acked_packets: Vec<AckedPacket>,

    /// Min RTT sample observed by this event, if any.
    pub min_rtt: Option<Duration>,

    /// Whether loss was detected while processing this event.
    pub has_loss: bool,

    /// Implicit acks only credit bytes, e.g. on handshake key discard.
    pub is_implicit: bool,

    /// Whether the largest newly acked packet was sent while app limited.
    pub is_largest_acked_packet_app_limited: bool,
}

impl AckEvent {
    /// Whether the largest newly acked packet was app limited. An event
    /// without acked packets is never app limited.
    pub fn largest_acked_app_limited(&self) -> bool {
        !self.acked_packets.is_empty() && self.is_largest_acked_packet_app_limited
    }
}

/// A batch of packets declared lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LossEvent {
    /// Time when the loss was detected.
    pub time_now: Instant,

    /// Largest packet number declared lost.
    pub largest_packet_number_lost: u64,

    /// Largest packet number sent so far.
    pub largest_sent_packet_number: u64,

    /// Retransmittable bytes declared lost. Must be non-zero.
    pub lost_bytes: u64,

    /// Whether the loss establishes persistent congestion.
    /// See RFC 9002 Section 7.6
    pub persistent_congestion: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_event_app_limited() {
        let now = Instant::now();
        let mut ack = AckEvent {
            time_now: now,
            adjusted_ack_time: now,
            largest_ack: 0,
            largest_sent_packet_number: 0,
            total_acked_bytes: 0,
            acked_bytes: 0,
            acked_packets: Vec::new(),
            min_rtt: None,
            has_loss: false,
            is_implicit: false,
            is_largest_acked_packet_app_limited: true,
        };
        assert!(!ack.largest_acked_app_limited());

        ack.acked_packets.push(AckedPacket {
            packet_number: 0,
            packet_length: 1200,
            sent_time: now,
            total_bytes_sent: 1200,
            last_acked_packet_info: None,
            is_app_limited: true,
        });
        assert!(ack.largest_acked_app_limited());

        ack.is_largest_acked_packet_app_limited = false;
        assert!(!ack.largest_acked_app_limited());
    }
}
