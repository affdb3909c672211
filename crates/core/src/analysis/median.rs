use std::{
    cmp::Ordering,
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Median over the observations of the last `window`.
///
/// Even-sized windows report the lower of the two middle values, so the
/// result is always one of the observed values.
#[derive(Debug, Clone)]
pub struct TimeWindowedMedian<T> {
    window: Duration,
    entries: VecDeque<(T, Instant)>,
    sorted: Vec<T>,
}

impl<T: Copy + PartialOrd> TimeWindowedMedian<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
            sorted: Vec::new(),
        }
    }

    /// Records `value` at `timestamp`, expires everything older than
    /// `timestamp - window`, and returns the median of what remains.
    ///
    /// Values that do not compare equal to themselves (NaN) are not recorded;
    /// if nothing else is retained, `value` itself is returned.
    pub fn offer(&mut self, value: T, timestamp: Instant) -> T {
        if value.partial_cmp(&value).is_some() {
            self.entries.push_back((value, timestamp));
        }
        let window = self.window;
        self.entries
            .retain(|(_, at)| timestamp.saturating_duration_since(*at) <= window);
        self.median().unwrap_or(value)
    }

    /// Median of the retained observations without recording a new one.
    pub fn median(&mut self) -> Option<T> {
        if self.entries.is_empty() {
            return None;
        }

        self.sorted.clear();
        self.sorted.extend(self.entries.iter().map(|(value, _)| *value));
        self.sorted
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        Some(self.sorted[(self.sorted.len() - 1) / 2])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
