//! bounded micro-batch of samples between flush ticks

use std::collections::VecDeque;

/// sliding window over the most recent samples
///
/// pushing past `max_len` drops the oldest sample. `flush` hands the whole
/// window over and leaves an empty one in its place.
#[derive(Debug)]
pub struct SampleBatcher {
    samples: VecDeque<f64>,
    max_len: usize,
}

impl SampleBatcher {
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self { samples: VecDeque::with_capacity(max_len), max_len }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.max_len {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// swap out the current window; `None` when nothing arrived since the last flush
    pub fn flush(&mut self) -> Option<Vec<f64>> {
        if self.is_empty() {
            return None;
        }
        let taken = std::mem::replace(&mut self.samples, VecDeque::with_capacity(self.max_len));
        Some(taken.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_keeps_arrival_order() {
        let mut batcher = SampleBatcher::new(200);
        batcher.push(119.98);
        batcher.push(120.02);
        assert_eq!(batcher.flush(), Some(vec![119.98, 120.02]));
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_empty_flush_sends_nothing() {
        let mut batcher = SampleBatcher::new(4);
        assert_eq!(batcher.flush(), None);
        batcher.push(1.0);
        assert!(batcher.flush().is_some());
        assert_eq!(batcher.flush(), None);
    }

    #[test]
    fn test_keeps_trailing_window() {
        for count in [0usize, 1, 3, 5, 6, 17] {
            let max = 5;
            let mut batcher = SampleBatcher::new(max);
            for i in 0..count {
                batcher.push(i as f64);
            }
            let expected: Vec<f64> = (count.saturating_sub(max)..count).map(|i| i as f64).collect();
            assert_eq!(batcher.flush().unwrap_or_default(), expected, "count = {}", count);
        }
    }

    #[test]
    fn test_zero_capacity_still_keeps_latest() {
        let mut batcher = SampleBatcher::new(0);
        batcher.push(1.0);
        batcher.push(2.0);
        assert_eq!(batcher.flush(), Some(vec![2.0]));
    }
}
