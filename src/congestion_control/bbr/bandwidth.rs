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

//! Bottleneck bandwidth estimation.
//!
//! Every acked packet yields a delivery rate sample: the smaller of the rate
//! at which data was sent and the rate at which it was acked, measured
//! against the packet acked just before it was sent. The estimate is the
//! windowed maximum of the samples over the last round trips.

use std::time::Duration;

use crate::congestion_control::event::AckEvent;
use crate::congestion_control::event::AckedPacket;
use crate::congestion_control::minmax::WindowedMaxFilter;
use crate::congestion_control::BW_UNIT;

const MICROS_PER_SEC: u128 = 1_000_000;

/// A delivery rate sample. Rates are in bits per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryRateSample {
    /// Rate at which the data was sent, if measurable.
    pub send_rate: Option<u64>,

    /// Rate at which the data was acked, if measurable.
    pub ack_rate: Option<u64>,

    /// The smaller of the two rates.
    pub delivery_rate: u64,

    /// Interval used for the send rate.
    pub send_elapsed: Option<Duration>,

    /// Interval used for the ack rate.
    pub ack_elapsed: Option<Duration>,
}

/// Convert a byte count over an interval to bits per second.
fn rate(bytes: u64, elapsed: Duration) -> Option<u64> {
    let micros = elapsed.as_micros();
    if micros == 0 {
        return None;
    }

    let rate = MICROS_PER_SEC * BW_UNIT as u128 * bytes as u128 / micros;
    Some(u64::try_from(rate).unwrap_or(u64::MAX))
}

/// Compute the delivery rate sample of an acked packet.
fn delivery_rate_sample(ack: &AckEvent, packet: &AckedPacket) -> Option<DeliveryRateSample> {
    let mut sample = DeliveryRateSample::default();

    if let Some(last) = &packet.last_acked_packet_info {
        debug_assert!(packet.total_bytes_sent >= last.total_bytes_sent);
        debug_assert!(last.sent_time <= packet.sent_time);
        debug_assert!(ack.total_acked_bytes >= last.total_bytes_acked);

        let send_elapsed = packet.sent_time.saturating_duration_since(last.sent_time);
        let sent_bytes = packet.total_bytes_sent.saturating_sub(last.total_bytes_sent);
        sample.send_rate = rate(sent_bytes, send_elapsed);
        if sample.send_rate.is_some() {
            sample.send_elapsed = Some(send_elapsed);
        }

        let ack_elapsed = if ack.adjusted_ack_time > last.adjusted_ack_time {
            ack.adjusted_ack_time - last.adjusted_ack_time
        } else {
            ack.time_now.saturating_duration_since(last.ack_time)
        };
        let acked_bytes = ack.total_acked_bytes.saturating_sub(last.total_bytes_acked);
        sample.ack_rate = rate(acked_bytes, ack_elapsed);
        if sample.ack_rate.is_some() {
            sample.ack_elapsed = Some(ack_elapsed);
        }
    } else if ack.time_now > packet.sent_time {
        let elapsed = ack.time_now - packet.sent_time;
        sample.send_rate = rate(ack.total_acked_bytes, elapsed);
        sample.send_elapsed = Some(elapsed);
        sample.ack_elapsed = Some(elapsed);
    }

    sample.delivery_rate = match (sample.send_rate, sample.ack_rate) {
        (Some(s), Some(a)) => s.min(a),
        (Some(s), None) => s,
        (None, Some(a)) => a,
        (None, None) => return None,
    };
    Some(sample)
}

/// Windowed max filter of delivery rate samples with app limited tracking.
#[derive(Debug)]
pub struct BandwidthFilter {
    /// Max filter keyed by packet-timed round trips.
    filter: WindowedMaxFilter,

    /// Whether the sender is application limited.
    app_limited: bool,

    /// The app limited period ends once a packet beyond it is acked.
    app_limited_exit_target: u64,

    /// The most recent valid sample.
    recent: Option<DeliveryRateSample>,
}

impl BandwidthFilter {
    pub fn new(window: u64) -> Self {
        Self {
            filter: WindowedMaxFilter::new(window),
            app_limited: false,
            app_limited_exit_target: 0,
            recent: None,
        }
    }

    pub fn reset(&mut self) {
        self.filter.reset();
        self.app_limited = false;
        self.app_limited_exit_target = 0;
        self.recent = None;
    }

    /// Estimated bandwidth in bits per second, 0 if no sample exists.
    pub fn bandwidth(&self) -> u64 {
        self.filter.get_value()
    }

    pub fn is_app_limited(&self) -> bool {
        self.app_limited
    }

    /// Mark the sender as app limited until a packet beyond `exit_target`
    /// is acked.
    pub fn set_app_limited(&mut self, exit_target: u64) {
        self.app_limited = true;
        self.app_limited_exit_target = exit_target;
    }

    /// The most recent delivery rate sample.
    pub fn recent_sample(&self) -> Option<DeliveryRateSample> {
        self.recent
    }

    /// Feed the acked packets of an ack event into the filter.
    pub fn on_packet_acked(&mut self, ack: &AckEvent, round_trip_count: u64) {
        if self.app_limited && self.app_limited_exit_target < ack.largest_ack {
            self.app_limited = false;
        }

        let mut recent = None;
        for packet in ack.acked_packets.iter() {
            if packet.packet_length == 0 {
                continue;
            }

            let sample = match delivery_rate_sample(ack, packet) {
                Some(s) => s,
                None => continue,
            };
            recent.get_or_insert(sample);

            // App limited samples may only raise the estimate.
            if sample.delivery_rate >= self.bandwidth() || !packet.is_app_limited {
                self.filter.update_max(sample.delivery_rate, round_trip_count);
            }
        }

        if recent.is_some() {
            self.recent = recent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion_control::event::LastAckedPacketInfo;
    use std::time::Instant;

    fn ack_event(now: Instant, largest_ack: u64, total_acked_bytes: u64) -> AckEvent {
        AckEvent {
            time_now: now,
            adjusted_ack_time: now,
            largest_ack,
            largest_sent_packet_number: largest_ack,
            total_acked_bytes,
            acked_bytes: 0,
            acked_packets: Vec::new(),
            min_rtt: None,
            has_loss: false,
            is_implicit: false,
            is_largest_acked_packet_app_limited: false,
        }
    }

    fn acked_packet(pn: u64, len: u64, sent_time: Instant, total_bytes_sent: u64) -> AckedPacket {
        AckedPacket {
            packet_number: pn,
            packet_length: len,
            sent_time,
            total_bytes_sent,
            last_acked_packet_info: None,
            is_app_limited: false,
        }
    }

    #[test]
    fn rate_conversion() {
        assert_eq!(rate(1000, Duration::ZERO), None);
        assert_eq!(rate(1000, Duration::from_millis(1)), Some(8_000_000));
        assert_eq!(rate(0, Duration::from_secs(1)), Some(0));
        assert_eq!(rate(u64::MAX, Duration::from_micros(1)), Some(u64::MAX));
    }

    #[test]
    fn first_ack_without_reference() {
        let sent = Instant::now();
        let now = sent + Duration::from_millis(100);
        let mut filter = BandwidthFilter::new(10);
        assert_eq!(filter.bandwidth(), 0);
        assert_eq!(filter.recent_sample(), None);

        // 12000 bytes over 100ms: 120KB/s.
        let mut ack = ack_event(now, 9, 12000);
        ack.acked_packets.push(acked_packet(9, 1200, sent, 12000));
        filter.on_packet_acked(&ack, 1);
        assert_eq!(filter.bandwidth(), 960_000);

        let sample = filter.recent_sample().unwrap();
        assert_eq!(sample.send_rate, Some(960_000));
        assert_eq!(sample.ack_rate, None);
        assert_eq!(sample.send_elapsed, Some(Duration::from_millis(100)));
    }

    #[test]
    fn delivery_rate_is_min_of_send_and_ack_rate() {
        let start = Instant::now();
        let mut filter = BandwidthFilter::new(10);

        let last = LastAckedPacketInfo {
            sent_time: start,
            total_bytes_sent: 0,
            total_bytes_acked: 0,
            ack_time: start + Duration::from_millis(50),
            adjusted_ack_time: start + Duration::from_millis(50),
        };

        // Sent 10000 bytes in 10ms, acked 10000 bytes in 20ms.
        let now = start + Duration::from_millis(70);
        let mut ack = ack_event(now, 5, 10000);
        let mut packet = acked_packet(5, 1000, start + Duration::from_millis(10), 10000);
        packet.last_acked_packet_info = Some(last);
        ack.acked_packets.push(packet);

        filter.on_packet_acked(&ack, 1);
        let sample = filter.recent_sample().unwrap();
        assert_eq!(sample.send_rate, Some(8_000_000));
        assert_eq!(sample.ack_rate, Some(4_000_000));
        assert_eq!(sample.delivery_rate, 4_000_000);
        assert_eq!(filter.bandwidth(), 4_000_000);
    }

    #[test]
    fn ack_elapsed_falls_back_to_ack_time() {
        let start = Instant::now();
        let mut filter = BandwidthFilter::new(10);

        // The adjusted ack time went backwards: use the raw ack times.
        let last = LastAckedPacketInfo {
            sent_time: start,
            total_bytes_sent: 0,
            total_bytes_acked: 0,
            ack_time: start + Duration::from_millis(10),
            adjusted_ack_time: start + Duration::from_millis(60),
        };
        let now = start + Duration::from_millis(20);
        let mut ack = ack_event(now, 1, 1000);
        ack.adjusted_ack_time = start + Duration::from_millis(15);

        // Zero send interval: no send rate.
        let mut packet = acked_packet(1, 1000, start, 1000);
        packet.last_acked_packet_info = Some(last);
        ack.acked_packets.push(packet);

        filter.on_packet_acked(&ack, 1);
        let sample = filter.recent_sample().unwrap();
        assert_eq!(sample.send_rate, None);
        assert_eq!(sample.ack_elapsed, Some(Duration::from_millis(10)));
        assert_eq!(sample.delivery_rate, 800_000);
    }

    #[test]
    fn skip_unmeasurable_packets() {
        let now = Instant::now();
        let mut filter = BandwidthFilter::new(10);

        let mut ack = ack_event(now, 2, 1200);
        // Zero length.
        ack.acked_packets.push(acked_packet(1, 0, now, 0));
        // Acked at the instant it was sent.
        ack.acked_packets.push(acked_packet(2, 1200, now, 1200));

        filter.on_packet_acked(&ack, 1);
        assert_eq!(filter.bandwidth(), 0);
        assert_eq!(filter.recent_sample(), None);
    }

    #[test]
    fn app_limited_samples() {
        let sent = Instant::now();
        let mut filter = BandwidthFilter::new(10);

        let mut ack = ack_event(sent + Duration::from_millis(100), 1, 12000);
        ack.acked_packets.push(acked_packet(1, 1200, sent, 12000));
        filter.on_packet_acked(&ack, 1);
        assert_eq!(filter.bandwidth(), 960_000);

        // A lower app limited sample does not depress the estimate.
        filter.set_app_limited(10);
        assert!(filter.is_app_limited());
        let mut ack = ack_event(sent + Duration::from_millis(200), 5, 12000);
        let mut packet = acked_packet(5, 1200, sent, 12000);
        packet.is_app_limited = true;
        ack.acked_packets.push(packet);
        filter.on_packet_acked(&ack, 2);
        assert_eq!(filter.bandwidth(), 960_000);
        assert!(filter.is_app_limited());

        // A higher app limited sample is admitted.
        let mut ack = ack_event(sent + Duration::from_millis(50), 8, 12000);
        let mut packet = acked_packet(8, 1200, sent, 12000);
        packet.is_app_limited = true;
        ack.acked_packets.push(packet);
        filter.on_packet_acked(&ack, 2);
        assert_eq!(filter.bandwidth(), 1_920_000);

        // Acking beyond the exit target ends the app limited period.
        let ack = ack_event(sent + Duration::from_millis(300), 11, 12000);
        filter.on_packet_acked(&ack, 3);
        assert!(!filter.is_app_limited());

        filter.reset();
        assert_eq!(filter.bandwidth(), 0);
        assert!(!filter.is_app_limited());
        assert_eq!(filter.recent_sample(), None);
    }
}
