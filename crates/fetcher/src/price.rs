//! Price reduction primitives
//!
//! Pure functions over observation sets: staleness filtering, quartile
//! outlier rejection, median, VWAP and the VWAP/median blend.

use chrono::{DateTime, Utc};
use common::FeedData;
use ordered_float::OrderedFloat;
use std::cmp::Reverse;

/// Drop observations older than `freshness_ms`.
///
/// Disabled for a missing or non-positive threshold. Observations without a
/// timestamp always pass, and the filter never empties a non-empty set: if
/// every observation is stale, all of them are kept.
pub fn filter_stale(
    feeds: Vec<FeedData>,
    freshness_ms: Option<i32>,
    now: DateTime<Utc>,
) -> Vec<FeedData> {
    let Some(threshold) = freshness_ms.filter(|t| *t > 0).map(i64::from) else {
        return feeds;
    };
    if feeds.len() <= 1 {
        return feeds;
    }

    let fresh: Vec<FeedData> = feeds
        .iter()
        .filter(|f| match f.timestamp {
            Some(ts) => (now - ts).num_milliseconds() <= threshold,
            None => true,
        })
        .cloned()
        .collect();

    if fresh.is_empty() {
        feeds
    } else {
        fresh
    }
}

/// Median of `values`, 0 when empty
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by_key(|v| OrderedFloat(*v));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Volume weighted average price, 0 when there is no volume
pub fn vwap(feeds: &[FeedData]) -> f64 {
    let (notional, volume) = feeds.iter().fold((0.0, 0.0), |(n, v), f| {
        (n + f.value * f.volume, v + f.volume)
    });
    if volume == 0.0 {
        0.0
    } else {
        notional / volume
    }
}

/// `vwap·(1−ratio) + median·ratio`, or whichever side is nonzero
pub fn blend(vwap: f64, median: f64, ratio: f64) -> f64 {
    if vwap == 0.0 {
        median
    } else if median == 0.0 {
        vwap
    } else {
        vwap * (1.0 - ratio) + median * ratio
    }
}

/// Split into (volume > 0, volume ≤ 0)
pub fn partition_by_volume(feeds: Vec<FeedData>) -> (Vec<FeedData>, Vec<FeedData>) {
    feeds.into_iter().partition(|f| f.volume > 0.0)
}

/// Tukey fences over the sorted sample
struct Quartiles {
    q1: f64,
    q3: f64,
}

impl Quartiles {
    /// Q1 and Q3 as medians of the lower and upper halves, excluding the
    /// middle element for odd lengths
    fn of(sorted: &[f64]) -> Self {
        let n = sorted.len();
        let (lower_end, upper_start) = if n % 2 == 0 { (n / 2, n / 2) } else { (n / 2, n / 2 + 1) };
        Self {
            q1: median(&sorted[..lower_end]),
            q3: median(&sorted[upper_start..]),
        }
    }

    fn is_extreme(&self, v: f64) -> bool {
        let iqr = self.q3 - self.q1;
        v < self.q1 - 3.0 * iqr || v > self.q3 + 3.0 * iqr
    }

    /// Strictly between the inner and outer fences. A value sitting exactly
    /// on an outer fence is in neither class.
    fn is_mild(&self, v: f64) -> bool {
        let iqr = self.q3 - self.q1;
        let (lower_outer, upper_outer) = (self.q1 - 3.0 * iqr, self.q3 + 3.0 * iqr);
        let (lower_inner, upper_inner) = (self.q1 - 1.5 * iqr, self.q3 + 1.5 * iqr);
        (v < lower_inner && v > lower_outer) || (v > upper_inner && v < upper_outer)
    }
}

/// Minimum sample size before outliers are considered
pub const MIN_OUTLIER_SAMPLE: usize = 5;

/// Remove quartile outliers from samples of at least five observations.
///
/// At most `floor(n · max_ratio)` distinct values are removed, extreme
/// outliers before mild ones and within each class the values farthest from
/// the median first. Every observation carrying a removed value goes.
pub fn filter_outliers(feeds: Vec<FeedData>, max_ratio: f64) -> Vec<FeedData> {
    if feeds.len() < MIN_OUTLIER_SAMPLE {
        return feeds;
    }

    let mut sorted: Vec<f64> = feeds.iter().map(|f| f.value).collect();
    sorted.sort_by_key(|v| OrderedFloat(*v));

    let quartiles = Quartiles::of(&sorted);
    let mid = median(&sorted);
    let farthest_first = |values: &mut Vec<f64>| {
        values.sort_by_key(|v| Reverse(OrderedFloat((mid - v).abs())));
    };

    let mut extremes: Vec<f64> = sorted.iter().copied().filter(|v| quartiles.is_extreme(*v)).collect();
    let mut milds: Vec<f64> = sorted.iter().copied().filter(|v| quartiles.is_mild(*v)).collect();
    if extremes.is_empty() && milds.is_empty() {
        return feeds;
    }

    let cap = (feeds.len() as f64 * max_ratio).floor() as usize;
    farthest_first(&mut extremes);
    extremes.truncate(cap);
    farthest_first(&mut milds);
    milds.truncate(cap.saturating_sub(extremes.len()));

    let removed: Vec<OrderedFloat<f64>> = extremes
        .iter()
        .chain(milds.iter())
        .map(|v| OrderedFloat(*v))
        .collect();

    feeds
        .into_iter()
        .filter(|f| !removed.contains(&OrderedFloat(f.value)))
        .collect()
}
