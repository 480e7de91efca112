//! In-process metric store
//!
//! Keeps a bounded, time-ordered window of points per metric so rules can be
//! evaluated locally with the same aggregations the Datadog queries use.
//! Counter increments are rolled up into one-second buckets per tag set, so a
//! counter's size depends on retention and tag cardinality, not on traffic.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Default retention: the 7 day SLO timeframe plus one day of slack
pub const DEFAULT_RETENTION_MS: i64 = 8 * 24 * 60 * 60 * 1000;

/// Default cap on points kept per gauge series
pub const DEFAULT_MAX_POINTS: usize = 500_000;

/// Width of a counter rollup bucket
pub const COUNTER_BUCKET_MS: i64 = 1_000;

/// How a series is interpreted when aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    /// Increments; an empty window sums to zero
    Counter,
    /// Samples; an empty window has no value
    Gauge,
}

impl SeriesKind {
    /// Datadog series `type` for this kind
    pub fn datadog_type(&self) -> &'static str {
        match self {
            SeriesKind::Counter => "count",
            SeriesKind::Gauge => "gauge",
        }
    }
}

/// Aggregation applied over a time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sum" => Some(Aggregation::Sum),
            "avg" => Some(Aggregation::Avg),
            "min" => Some(Aggregation::Min),
            "max" => Some(Aggregation::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }
}

/// A single recorded point
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub timestamp_ms: i64,
    pub value: f64,
    pub tags: Vec<String>,
}

impl Point {
    /// True if every scope tag is present on this point
    fn matches(&self, scope: &[String]) -> bool {
        scope.iter().all(|tag| self.tags.iter().any(|t| t == tag))
    }
}

#[derive(Debug)]
struct Series {
    kind: SeriesKind,
    /// Registration time, or the first write for unregistered series
    since_ms: i64,
    points: VecDeque<Point>,
}

/// Thread-safe store of metric series
pub struct MetricStore {
    series: DashMap<String, Series>,
    retention_ms: i64,
    max_points: usize,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RETENTION_MS, DEFAULT_MAX_POINTS)
    }

    pub fn with_limits(retention_ms: i64, max_points: usize) -> Self {
        Self {
            series: DashMap::new(),
            retention_ms,
            max_points: max_points.max(1),
        }
    }

    /// Declare a counter as of now so that empty windows evaluate to zero
    pub fn register_counter(&self, name: &str) {
        self.register_counter_at(name, chrono::Utc::now().timestamp_millis());
    }

    /// Declare a counter that has been tracked since `since_ms`.
    ///
    /// Empty windows that start at or after `since_ms` sum to zero. Windows
    /// reaching back before it have no data.
    pub fn register_counter_at(&self, name: &str, since_ms: i64) {
        self.series.entry(name.to_string()).or_insert_with(|| Series {
            kind: SeriesKind::Counter,
            since_ms,
            points: VecDeque::new(),
        });
    }

    /// Record a point. The series kind is fixed by the first write.
    pub fn record(
        &self,
        name: &str,
        kind: SeriesKind,
        timestamp_ms: i64,
        value: f64,
        tags: &[String],
    ) {
        let mut series = self.series.entry(name.to_string()).or_insert_with(|| Series {
            kind,
            since_ms: timestamp_ms,
            points: VecDeque::new(),
        });

        let timestamp_ms = match series.kind {
            SeriesKind::Counter => timestamp_ms - timestamp_ms.rem_euclid(COUNTER_BUCKET_MS),
            SeriesKind::Gauge => timestamp_ms,
        };

        if series.kind == SeriesKind::Counter {
            let start = series.points.partition_point(|p| p.timestamp_ms < timestamp_ms);
            let bucket = series
                .points
                .range_mut(start..)
                .take_while(|p| p.timestamp_ms == timestamp_ms)
                .find(|p| p.tags == tags);
            if let Some(bucket) = bucket {
                bucket.value += value;
                return;
            }
        }

        let point = Point {
            timestamp_ms,
            value,
            tags: tags.to_vec(),
        };

        // Points normally arrive in order; keep the deque sorted when they don't
        let out_of_order = series
            .points
            .back()
            .map_or(false, |last| last.timestamp_ms > timestamp_ms);
        if out_of_order {
            let idx = series
                .points
                .partition_point(|p| p.timestamp_ms <= timestamp_ms);
            series.points.insert(idx, point);
        } else {
            series.points.push_back(point);
        }

        let newest = series.points.back().map(|p| p.timestamp_ms).unwrap_or(timestamp_ms);
        let cutoff = newest - self.retention_ms;
        let capped = series.kind == SeriesKind::Gauge;
        while (capped && series.points.len() > self.max_points)
            || series.points.front().map_or(false, |p| p.timestamp_ms < cutoff)
        {
            series.points.pop_front();
        }
    }

    /// Add one to a counter
    pub fn increment(&self, name: &str, timestamp_ms: i64, tags: &[String]) {
        self.record(name, SeriesKind::Counter, timestamp_ms, 1.0, tags);
    }

    pub fn series_kind(&self, name: &str) -> Option<SeriesKind> {
        self.series.get(name).map(|s| s.kind)
    }

    /// Number of points currently held for a series
    pub fn point_count(&self, name: &str) -> usize {
        self.series.get(name).map(|s| s.points.len()).unwrap_or(0)
    }

    /// Aggregate points in `(from_ms, to_ms]` whose tags include all of `scope`.
    ///
    /// Returns `None` when there is no data: an unknown series, an empty
    /// window on anything other than a summed counter, or an empty counter
    /// window that starts before the counter was tracked.
    pub fn aggregate(
        &self,
        name: &str,
        scope: &[String],
        aggregation: Aggregation,
        from_ms: i64,
        to_ms: i64,
    ) -> Option<f64> {
        let series = self.series.get(name)?;

        let values: Vec<f64> = series
            .points
            .iter()
            .filter(|p| p.timestamp_ms > from_ms && p.timestamp_ms <= to_ms && p.matches(scope))
            .map(|p| p.value)
            .collect();

        if values.is_empty() {
            return match (series.kind, aggregation) {
                (SeriesKind::Counter, Aggregation::Sum) if from_ms >= series.since_ms => Some(0.0),
                _ => None,
            };
        }

        Some(match aggregation {
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// Drop points older than the retention window; returns points removed
    pub fn prune(&self, now_ms: i64) -> usize {
        let cutoff = now_ms - self.retention_ms;
        let mut removed = 0;
        for mut entry in self.series.iter_mut() {
            while entry.points.front().map_or(false, |p| p.timestamp_ms < cutoff) {
                entry.points.pop_front();
                removed += 1;
            }
        }
        removed
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_counter_sum_over_window() {
        let store = MetricStore::new();
        let t = tags(&["service:app"]);
        store.increment("requests", 1_000, &t);
        store.increment("requests", 2_000, &t);
        store.increment("requests", 10_000, &t);

        assert_eq!(store.aggregate("requests", &[], Aggregation::Sum, 0, 5_000), Some(2.0));
        assert_eq!(store.aggregate("requests", &[], Aggregation::Sum, 1_000, 10_000), Some(2.0));
    }

    #[test]
    fn test_empty_window_semantics() {
        let store = MetricStore::new();
        store.register_counter_at("errors", 0);
        store.record("latency", SeriesKind::Gauge, 1_000, 120.0, &[]);

        // Registered counter with no points is zero, not missing
        assert_eq!(store.aggregate("errors", &[], Aggregation::Sum, 0, 60_000), Some(0.0));
        assert_eq!(store.aggregate("errors", &[], Aggregation::Avg, 0, 60_000), None);
        assert_eq!(store.aggregate("errors", &[], Aggregation::Sum, -60_000, 0), None);
        // Gauge outside the window is missing
        assert_eq!(store.aggregate("latency", &[], Aggregation::Avg, 5_000, 60_000), None);
        // Unknown series is missing
        assert_eq!(store.aggregate("nope", &[], Aggregation::Sum, 0, 60_000), None);
    }

    #[test]
    fn test_gauge_aggregations() {
        let store = MetricStore::new();
        for (ts, v) in [(1_000, 100.0), (2_000, 300.0), (3_000, 200.0)] {
            store.record("latency", SeriesKind::Gauge, ts, v, &[]);
        }

        assert_eq!(store.aggregate("latency", &[], Aggregation::Avg, 0, 3_000), Some(200.0));
        assert_eq!(store.aggregate("latency", &[], Aggregation::Min, 0, 3_000), Some(100.0));
        assert_eq!(store.aggregate("latency", &[], Aggregation::Max, 0, 3_000), Some(300.0));
    }

    #[test]
    fn test_scope_filter() {
        let store = MetricStore::new();
        store.increment("errors", 1_000, &tags(&["service:app", "code:500"]));
        store.increment("errors", 1_000, &tags(&["service:app", "code:429"]));
        store.increment("errors", 1_000, &tags(&["service:other", "code:500"]));

        let scope = tags(&["service:app"]);
        assert_eq!(store.aggregate("errors", &scope, Aggregation::Sum, 0, 2_000), Some(2.0));

        let scope = tags(&["service:app", "code:500"]);
        assert_eq!(store.aggregate("errors", &scope, Aggregation::Sum, 0, 2_000), Some(1.0));
    }

    #[test]
    fn test_out_of_order_points_stay_sorted() {
        let store = MetricStore::new();
        store.increment("requests", 5_000, &[]);
        store.increment("requests", 1_000, &[]);
        store.increment("requests", 3_000, &[]);

        assert_eq!(store.aggregate("requests", &[], Aggregation::Sum, 0, 2_000), Some(1.0));
        assert_eq!(store.aggregate("requests", &[], Aggregation::Sum, 2_000, 5_000), Some(2.0));
    }

    #[test]
    fn test_window_before_registration_has_no_data() {
        let store = MetricStore::new();
        let since = 1_000 * 60_000;
        store.register_counter_at("requests", since);

        let sum = |from: i64, to: i64| store.aggregate("requests", &[], Aggregation::Sum, from, to);

        // Five minute window straddling startup
        assert_eq!(sum(since - 240_000, since + 60_000), None);
        assert_eq!(sum(since, since + 300_000), Some(0.0));

        // Data inside the window is summed regardless of registration time
        store.increment("requests", since + 1_000, &[]);
        assert_eq!(sum(since - 240_000, since + 60_000), Some(1.0));
    }

    #[test]
    fn test_register_counter_uses_wall_clock() {
        let store = MetricStore::new();
        let before = chrono::Utc::now().timestamp_millis();
        store.register_counter("requests");
        let sum = |from: i64, to: i64| store.aggregate("requests", &[], Aggregation::Sum, from, to);

        assert_eq!(sum(before - 300_000, before), None);
        let after = chrono::Utc::now().timestamp_millis();
        assert_eq!(sum(after, after + 300_000), Some(0.0));
    }

    #[test]
    fn test_counter_rollup_per_second_and_tag_set() {
        let store = MetricStore::new();
        let ok = tags(&["service:app"]);
        let failed = tags(&["service:app", "code:500"]);
        for offset in 0..1_000 {
            store.increment("requests", 5_000 + offset, &ok);
        }
        store.increment("requests", 5_500, &failed);
        store.increment("requests", 6_000, &ok);

        assert_eq!(store.point_count("requests"), 3);
        assert_eq!(store.aggregate("requests", &[], Aggregation::Sum, 0, 10_000), Some(1_002.0));
        assert_eq!(store.aggregate("requests", &failed, Aggregation::Sum, 0, 10_000), Some(1.0));
    }

    #[test]
    fn test_counters_are_not_capped() {
        let store = MetricStore::with_limits(DEFAULT_RETENTION_MS, 10);
        let day = 24 * 60 * 60 * 1000;
        // One request a second for a day, far beyond the point cap
        for second in 0..86_400 {
            store.increment("requests", second * 1_000, &[]);
        }

        assert_eq!(store.point_count("requests"), 86_400);
        assert_eq!(store.aggregate("requests", &[], Aggregation::Sum, -1, day), Some(86_400.0));
    }

    #[test]
    fn test_retention_and_cap() {
        let store = MetricStore::with_limits(10_000, 3);
        for ts in [1_000, 2_000, 3_000, 4_000] {
            store.record("latency", SeriesKind::Gauge, ts, 1.0, &[]);
        }
        assert_eq!(store.point_count("latency"), 3);

        for ts in [1_000, 2_000, 3_000, 4_000] {
            store.increment("requests", ts, &[]);
        }
        assert_eq!(store.point_count("requests"), 4);

        store.increment("requests", 20_000, &[]);
        // Everything before 10_000 has aged out
        assert_eq!(store.point_count("requests"), 1);

        store.increment("requests", 21_000, &[]);
        assert_eq!(store.prune(40_000), 2);
        assert_eq!(store.series_kind("requests"), Some(SeriesKind::Counter));
    }
}
