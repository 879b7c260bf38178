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

//! A sliding window maximum estimator over a logical time axis.
//!
//! The filter keeps a short monotonic queue of candidates: values strictly
//! decrease from head to tail while their timestamps increase. The head is
//! always the maximum observed within the window. A new sample evicts every
//! tail candidate it dominates, and candidates whose age exceeds the window
//! length fall off the head.
//!
//! The time axis is whatever the caller chooses (BBR uses packet-timed round
//! trips). It should be monotonically non-decreasing; out-of-order samples
//! are accepted and yield a best-effort maximum.

/// Default number of candidates kept by the filter.
pub const DEFAULT_FILTER_CAPACITY: usize = 3;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct WindowedSample {
    /// Sample value.
    pub value: u64,

    /// Logical time (e.g. round trip count) of the sample.
    pub time: u64,
}

#[derive(Debug)]
pub struct WindowedMaxFilter {
    /// The max lasting time window to pick up the best sample.
    window: u64,

    /// Ring buffer of candidates.
    samples: [WindowedSample; DEFAULT_FILTER_CAPACITY],

    /// Index of the oldest (and largest) candidate.
    head: usize,

    /// Number of valid candidates.
    len: usize,
}

impl WindowedMaxFilter {
    pub fn new(window: u64) -> Self {
        Self {
            window,
            samples: [Default::default(); DEFAULT_FILTER_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    /// Forget all samples.
    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Drop candidates that are older than the window.
    fn expire(&mut self, time: u64) {
        while self.len > 0 {
            let oldest = self.samples[self.head];
            if time.saturating_sub(oldest.time) <= self.window {
                break;
            }
            self.head = (self.head + 1) % DEFAULT_FILTER_CAPACITY;
            self.len -= 1;
        }
    }

    /// Insert a new measurement.
    pub fn update_max(&mut self, value: u64, time: u64) {
        self.expire(time);

        // The new sample is more recent than every candidate it dominates.
        while self.len > 0 {
            let tail = (self.head + self.len - 1) % DEFAULT_FILTER_CAPACITY;
            if self.samples[tail].value > value {
                break;
            }
            self.len -= 1;
        }

        // Full: the new sample replaces the smallest candidate. The head
        // stays, it is the maximum within the window.
        if self.len == DEFAULT_FILTER_CAPACITY {
            self.len -= 1;
        }

        let slot = (self.head + self.len) % DEFAULT_FILTER_CAPACITY;
        self.samples[slot] = WindowedSample { value, time };
        self.len += 1;
    }

    /// Get the current maximum, or None if no sample is retained.
    pub fn get(&self) -> Option<WindowedSample> {
        if self.len == 0 {
            return None;
        }
        Some(self.samples[self.head])
    }

    /// Get the current maximum value, or zero if no sample is retained.
    pub fn get_value(&self) -> u64 {
        self.get().map_or(0, |s| s.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windowed_max_empty() {
        let mut filter = WindowedMaxFilter::new(10);
        assert_eq!(filter.window, 10);
        assert_eq!(filter.len, 0);
        assert_eq!(filter.get(), None);
        assert_eq!(filter.get_value(), 0);

        filter.update_max(100, 1);
        assert_eq!(filter.get(), Some(WindowedSample { value: 100, time: 1 }));

        filter.reset();
        assert_eq!(filter.len, 0);
        assert_eq!(filter.get(), None);
    }

    #[test]
    fn windowed_max_new_max_replaces() {
        let mut filter = WindowedMaxFilter::new(10);
        filter.update_max(100, 1);
        filter.update_max(80, 2);
        filter.update_max(60, 3);
        assert_eq!(filter.len, 3);
        assert_eq!(filter.get_value(), 100);

        // Equal value dominates the older candidates.
        filter.update_max(100, 4);
        assert_eq!(filter.len, 1);
        assert_eq!(filter.get(), Some(WindowedSample { value: 100, time: 4 }));

        filter.update_max(150, 5);
        assert_eq!(filter.len, 1);
        assert_eq!(filter.get_value(), 150);
    }

    #[test]
    fn windowed_max_expire() {
        let mut filter = WindowedMaxFilter::new(10);
        filter.update_max(200, 0);
        filter.update_max(120, 4);
        filter.update_max(110, 8);

        // Still inside the window.
        filter.update_max(50, 10);
        assert_eq!(filter.get_value(), 200);

        // The head is 11 rounds old: fall back to the second best.
        filter.update_max(40, 11);
        assert_eq!(filter.get(), Some(WindowedSample { value: 120, time: 4 }));

        // Nothing left in window except the new sample.
        filter.update_max(10, 40);
        assert_eq!(filter.len, 1);
        assert_eq!(filter.get(), Some(WindowedSample { value: 10, time: 40 }));
    }

    #[test]
    fn windowed_max_keeps_head_when_full() {
        let mut filter = WindowedMaxFilter::new(10);
        filter.update_max(100, 1);
        filter.update_max(90, 2);
        filter.update_max(80, 3);

        // Falling samples replace the smallest candidate, never the max.
        for (i, value) in [70, 60, 50, 40, 30, 20].iter().enumerate() {
            filter.update_max(*value, 4 + i as u64);
            assert_eq!(filter.len, DEFAULT_FILTER_CAPACITY);
            assert_eq!(filter.get(), Some(WindowedSample { value: 100, time: 1 }));
        }

        // A larger sample evicts the dominated tail only.
        filter.update_max(85, 10);
        assert_eq!(filter.len, 3);
        assert_eq!(filter.get_value(), 100);

        // The max expires after the window, the second best takes over.
        filter.update_max(10, 12);
        assert_eq!(filter.get(), Some(WindowedSample { value: 90, time: 2 }));
    }

    #[test]
    fn windowed_max_out_of_order() {
        let mut filter = WindowedMaxFilter::new(10);
        filter.update_max(100, 20);

        // Time went backwards, nothing panics and the max is kept.
        filter.update_max(50, 5);
        assert_eq!(filter.get_value(), 100);

        filter.update_max(150, 3);
        assert_eq!(filter.get(), Some(WindowedSample { value: 150, time: 3 }));
    }
}
