//! Sliding-window statistics over an order-statistic multiset.

use crate::clock::{Clock, SystemClock};
use crate::multiset::SortedMultiset;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Measurement {
    at: Duration,
    value: i64,
}

#[derive(Debug, Default)]
struct Inner {
    values: SortedMultiset,
    /// Insertion-ordered, so timestamps are non-decreasing front to back.
    window: VecDeque<Measurement>,
    sum: i64,
}

/// Tracks `i64` samples over a sliding time window and serves count, mean
/// and arbitrary percentiles.
///
/// All public methods serialise on one internal mutex, so a shared
/// reference can be fed from the produce-ack path and read from the
/// quantile publisher concurrently.
pub struct WindowedStats {
    window_size: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl WindowedStats {
    /// Tracker over `window_size` using the wall clock.
    pub fn new(window_size: Duration) -> Self {
        Self::with_clock(window_size, Arc::new(SystemClock))
    }

    /// Tracker with an injected clock; tests pass a manually-advanced mock.
    pub fn with_clock(window_size: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window_size,
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Records a sample at the current clock reading and expires anything
    /// that has fallen out of the window.
    pub fn add(&self, value: i64) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.values.insert(value);
        inner.window.push_back(Measurement { at: now, value });
        inner.sum += value;
        Self::expire(&mut inner, self.window_size, now);
    }

    /// Samples currently inside the window.
    pub fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mean of the current window, or `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        let inner = self.inner.lock();
        let count = inner.values.len();
        if count == 0 {
            return None;
        }
        Some(inner.sum as f64 / count as f64)
    }

    /// Nearest-rank percentiles: index `floor((len - 1) * p / 100)` per
    /// requested `p`. `None` when the window is empty, no percentiles were
    /// requested, or any `p` falls outside `[0, 100]`.
    pub fn percentiles(&self, percentiles: &[f64]) -> Option<Vec<i64>> {
        if percentiles.is_empty() || percentiles.iter().any(|p| !(0.0..=100.0).contains(p)) {
            return None;
        }
        let inner = self.inner.lock();
        let count = inner.values.len();
        if count == 0 {
            return None;
        }
        let mut out = Vec::with_capacity(percentiles.len());
        for p in percentiles {
            let index = ((count - 1) as f64 * (p / 100.0)) as usize;
            out.push(inner.values.select(index)?);
        }
        Some(out)
    }

    /// In-order copy of the window's samples, duplicates included.
    pub fn values_ascending(&self) -> Vec<i64> {
        self.inner.lock().values.keys_ascending()
    }

    /// Absorbs `other`'s window into this tracker, leaving `other`
    /// untouched, then expires against the current clock.
    ///
    /// Both locks are taken in address order so two concurrent merges in
    /// opposite directions cannot deadlock. Merging a tracker into itself
    /// is a no-op.
    pub fn merge(&self, other: &WindowedStats) {
        if std::ptr::eq(self, other) {
            return;
        }
        let (mut ours, theirs) = if (self as *const Self as usize) < (other as *const Self as usize)
        {
            let ours = self.inner.lock();
            let theirs = other.inner.lock();
            (ours, theirs)
        } else {
            let theirs = other.inner.lock();
            let ours = self.inner.lock();
            (ours, theirs)
        };

        ours.values.merge_from(&theirs.values);
        ours.sum += theirs.sum;

        // Stable merge of two timestamp-sorted queues; existing entries win
        // ties so relative order within each side is preserved.
        let mut merged = VecDeque::with_capacity(ours.window.len() + theirs.window.len());
        let mut incoming = theirs.window.iter().copied().peekable();
        for existing in ours.window.drain(..) {
            while let Some(next) = incoming.peek().copied() {
                if next.at < existing.at {
                    merged.push_back(next);
                    incoming.next();
                } else {
                    break;
                }
            }
            merged.push_back(existing);
        }
        merged.extend(incoming);
        ours.window = merged;

        let now = self.clock.now();
        Self::expire(&mut ours, self.window_size, now);
    }

    fn expire(inner: &mut Inner, window_size: Duration, now: Duration) {
        while let Some(front) = inner.window.front().copied() {
            if now.saturating_sub(front.at) > window_size {
                inner.window.pop_front();
                inner.values.delete_one(front.value);
                inner.sum -= front.value;
            } else {
                // Timestamps are non-decreasing, nothing further is stale.
                break;
            }
        }
    }
}
