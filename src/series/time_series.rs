use crate::core::{EnforceError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Timestamp-ordered sequence of values. Not synchronized; the owner serializes access.
#[derive(Debug, Clone)]
pub struct TimeSeries<V> {
    points: VecDeque<(DateTime<Utc>, V)>,
}

impl<V> Default for TimeSeries<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TimeSeries<V> {
    pub fn new() -> Self {
        Self {
            points: VecDeque::new(),
        }
    }

    /// Appends a point. Timestamps must be strictly increasing.
    pub fn add(&mut self, timestamp: DateTime<Utc>, value: V) -> Result<()> {
        if let Some((last, _)) = self.points.back() {
            if timestamp <= *last {
                return Err(EnforceError::NonMonotonicTimestamp {
                    last: *last,
                    attempted: timestamp,
                });
            }
        }
        self.points.push_back((timestamp, value));
        Ok(())
    }

    /// Drops every point at or before `min_timestamp`.
    pub fn retain_after(&mut self, min_timestamp: DateTime<Utc>) {
        while let Some((ts, _)) = self.points.front() {
            if *ts > min_timestamp {
                break;
            }
            self.points.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<(DateTime<Utc>, &V)> {
        self.points.get(index).map(|(ts, v)| (*ts, v))
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.front().map(|(ts, _)| *ts)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.back().map(|(ts, _)| *ts)
    }

    /// Time covered between the oldest retained point and `now`.
    pub fn span_until(&self, now: DateTime<Utc>) -> Duration {
        match self.first_timestamp() {
            Some(first) => now - first,
            None => Duration::zero(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateTime<Utc>, &V)> {
        self.points.iter().map(|(ts, v)| (*ts, v))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.points.iter().map(|(_, v)| v)
    }
}

impl TimeSeries<f64> {
    pub fn mean(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.values().sum::<f64>() / self.points.len() as f64
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .values()
            .map(|v| {
                let d = v - mean;
                d * d
            })
            .sum::<f64>()
            / self.points.len() as f64;
        variance.sqrt()
    }

    pub fn to_values(&self) -> Vec<f64> {
        self.values().copied().collect()
    }
}
