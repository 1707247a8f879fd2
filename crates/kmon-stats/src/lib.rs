//! Sliding-window order-statistic trackers for kmon.
//!
//! The probe pipeline records per-partition latency samples into
//! [`WindowedStats`] instances and reads arbitrary percentiles back out;
//! both operations stay O(log N) via the rank-augmented [`SortedMultiset`].

pub mod clock;
pub mod multiset;
pub mod window;

pub use clock::{Clock, MockClock, SystemClock};
pub use multiset::SortedMultiset;
pub use window::WindowedStats;
