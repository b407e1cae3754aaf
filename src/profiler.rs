//! Profiler - descriptive statistics and histograms under a RowMask
//!
//! - Numeric: single-pass count/sum/sum-of-squares, population variance,
//!   quartiles by linear interpolation over the sorted filtered values
//!   (the `QuartileMethod::Linear` default; `NearestRank` is available)
//! - Histogram: sqrt-rule bin count capped at `max_bins`, half-open bins
//!   with the last one closed on the right
//! - Text: exact distinct count and top-k, ties broken by first appearance
//! - Nulls are skipped everywhere and reported separately

use crate::column_store::{Column, ColumnData, Dataset, SemanticType};
use crate::filter::RowMask;
use crate::{InsightError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of frequent values reported for text columns
pub const DEFAULT_TOP_K: usize = 10;

/// Default upper bound on histogram bins
pub const DEFAULT_MAX_BINS: usize = 50;

/// Quantile estimation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuartileMethod {
    /// Linear interpolation between closest ranks (position p * (n - 1))
    #[default]
    Linear,
    /// Smallest value whose rank covers p * n
    NearestRank,
}

/// Profiler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub top_k: usize,
    pub max_bins: usize,
    pub quartile_method: QuartileMethod,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_bins: DEFAULT_MAX_BINS,
            quartile_method: QuartileMethod::Linear,
        }
    }
}

/// Integer/Float statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub mean: f64,
    /// Population variance
    pub variance: f64,
    pub std_dev: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

/// Value with its occurrence count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextStats {
    pub distinct_count: usize,
    /// Most frequent values, descending
    pub top_values: Vec<ValueCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BooleanStats {
    pub true_count: usize,
    pub false_count: usize,
}

/// Epoch-millisecond range of a timestamp column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimestampStats {
    pub min: i64,
    pub max: i64,
    /// `max - min`, saturating at `i64::MAX`
    pub span_ms: i64,
}

/// Type-specific part of a profile; `None` when no non-null value is selected
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "stats", rename_all = "snake_case")]
pub enum ProfileStats {
    Numeric(Option<NumericStats>),
    Text(TextStats),
    Boolean(BooleanStats),
    Timestamp(Option<TimestampStats>),
}

/// Descriptive statistics for one column under one mask
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub column: String,
    pub semantic_type: SemanticType,
    /// Non-null values among selected rows
    pub count: usize,
    /// Null values among selected rows
    pub null_count: usize,
    pub stats: ProfileStats,
}

impl ColumnProfile {
    pub fn numeric(&self) -> Option<&NumericStats> {
        match &self.stats {
            ProfileStats::Numeric(stats) => stats.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Binned distribution of one numeric/timestamp column under one mask
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub column: String,
    pub semantic_type: SemanticType,
    pub bins: Vec<HistogramBin>,
    /// Sum of bin counts (non-null selected values)
    pub total: usize,
}

/// Invocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfilerCounters {
    pub profiles: u64,
    pub histograms: u64,
}

/// Stateless statistics engine with instrumented invocation counts
#[derive(Debug, Default)]
pub struct Profiler {
    config: ProfilerConfig,
    profiles: AtomicU64,
    histograms: AtomicU64,
}

impl Profiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            config,
            profiles: AtomicU64::new(0),
            histograms: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn counters(&self) -> ProfilerCounters {
        ProfilerCounters {
            profiles: self.profiles.load(Ordering::Relaxed),
            histograms: self.histograms.load(Ordering::Relaxed),
        }
    }

    /// Profile `column` restricted to the rows selected by `mask`
    pub fn profile(&self, column: &Column, mask: &RowMask) -> ColumnProfile {
        debug_assert_eq!(column.len(), mask.len());
        self.profiles.fetch_add(1, Ordering::Relaxed);

        let (count, stats) = match column.data() {
            ColumnData::Integer(v) => {
                let values: Vec<f64> = selected(v, mask).map(|&x| x as f64).collect();
                (values.len(), ProfileStats::Numeric(self.numeric_stats(values)))
            }
            ColumnData::Float(v) => {
                let values: Vec<f64> = selected(v, mask).copied().collect();
                (values.len(), ProfileStats::Numeric(self.numeric_stats(values)))
            }
            ColumnData::Text(v) => {
                let (count, stats) = text_stats(selected(v, mask), self.config.top_k);
                (count, ProfileStats::Text(stats))
            }
            ColumnData::Boolean(v) => {
                let mut stats = BooleanStats {
                    true_count: 0,
                    false_count: 0,
                };
                for &b in selected(v, mask) {
                    if b {
                        stats.true_count += 1;
                    } else {
                        stats.false_count += 1;
                    }
                }
                (
                    stats.true_count + stats.false_count,
                    ProfileStats::Boolean(stats),
                )
            }
            ColumnData::Timestamp(v) => {
                let mut count = 0;
                let mut range: Option<(i64, i64)> = None;
                for &ts in selected(v, mask) {
                    count += 1;
                    range = Some(match range {
                        Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
                        None => (ts, ts),
                    });
                }
                let stats = range.map(|(min, max)| TimestampStats {
                    min,
                    max,
                    span_ms: max.saturating_sub(min),
                });
                (count, ProfileStats::Timestamp(stats))
            }
        };

        ColumnProfile {
            column: column.name().to_string(),
            semantic_type: column.semantic_type(),
            count,
            null_count: mask.selected_count() - count,
            stats,
        }
    }

    /// Histogram of a numeric or timestamp column under `mask`.
    ///
    /// Text and boolean columns fail with `TypeMismatchError`.
    pub fn histogram(&self, column: &Column, mask: &RowMask) -> Result<Histogram> {
        debug_assert_eq!(column.len(), mask.len());
        self.histograms.fetch_add(1, Ordering::Relaxed);

        let values: Vec<f64> = match column.data() {
            ColumnData::Integer(v) | ColumnData::Timestamp(v) => {
                selected(v, mask).map(|&x| x as f64).collect()
            }
            ColumnData::Float(v) => selected(v, mask).copied().collect(),
            _ => {
                return Err(InsightError::TypeMismatchError {
                    column: column.name().to_string(),
                    operator: "histogram",
                    column_type: column.semantic_type(),
                    reason: "histograms require an integer, float or timestamp column".to_string(),
                })
            }
        };

        Ok(Histogram {
            column: column.name().to_string(),
            semantic_type: column.semantic_type(),
            total: values.len(),
            bins: bin_values(&values, self.config.max_bins),
        })
    }

    /// Profile several columns under one mask in parallel.
    ///
    /// Each column's result is independent; an unknown name does not abort
    /// its siblings.
    pub fn profile_many(
        &self,
        dataset: &Dataset,
        mask: &RowMask,
        columns: &[&str],
    ) -> Vec<(String, Result<ColumnProfile>)> {
        columns
            .par_iter()
            .map(|&name| {
                let result = dataset.get_column(name).map(|c| self.profile(c, mask));
                (name.to_string(), result)
            })
            .collect()
    }

    fn numeric_stats(&self, mut values: Vec<f64>) -> Option<NumericStats> {
        if values.is_empty() {
            return None;
        }

        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in &values {
            sum += v;
            sum_sq += v * v;
            min = min.min(v);
            max = max.max(v);
        }

        let n = values.len() as f64;
        let mean = sum / n;
        let variance = if values.len() <= 1 {
            0.0
        } else {
            // Cancellation can push this slightly negative
            (sum_sq / n - mean * mean).max(0.0)
        };

        values.sort_unstable_by(f64::total_cmp);
        let method = self.config.quartile_method;
        Some(NumericStats {
            min,
            max,
            sum,
            mean,
            variance,
            std_dev: variance.sqrt(),
            q1: quantile(&values, 0.25, method),
            median: quantile(&values, 0.5, method),
            q3: quantile(&values, 0.75, method),
        })
    }
}

/// Non-null values of rows selected by `mask`, in row order
fn selected<'a, T>(values: &'a [Option<T>], mask: &'a RowMask) -> impl Iterator<Item = &'a T> + 'a {
    values
        .iter()
        .zip(mask.as_slice())
        .filter_map(|(value, &keep)| if keep { value.as_ref() } else { None })
}

/// Quantile of sorted, non-empty values
fn quantile(sorted: &[f64], p: f64, method: QuartileMethod) -> f64 {
    let n = sorted.len();
    match method {
        QuartileMethod::Linear => {
            let pos = p * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
        QuartileMethod::NearestRank => {
            let rank = ((p * n as f64).ceil() as usize).clamp(1, n);
            sorted[rank - 1]
        }
    }
}

fn text_stats<'a>(values: impl Iterator<Item = &'a String>, top_k: usize) -> (usize, TextStats) {
    // value -> (count, first-seen position)
    let mut freq: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut count = 0;
    for value in values {
        let entry = freq.entry(value.as_str()).or_insert((0, count));
        entry.0 += 1;
        count += 1;
    }

    let distinct_count = freq.len();
    let mut ranked: Vec<(&str, usize, usize)> = freq
        .into_iter()
        .map(|(value, (n, first))| (value, n, first))
        .collect();
    ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.truncate(top_k);

    let top_values = ranked
        .into_iter()
        .map(|(value, count, _)| ValueCount {
            value: value.to_string(),
            count,
        })
        .collect();

    (
        count,
        TextStats {
            distinct_count,
            top_values,
        },
    )
}

/// Sqrt-rule binning over finite values
fn bin_values(values: &[f64], max_bins: usize) -> Vec<HistogramBin> {
    if values.is_empty() {
        return Vec::new();
    }

    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if max == min {
        return vec![HistogramBin {
            lower: min,
            upper: min + 1.0,
            count: values.len(),
        }];
    }

    let bin_count = ((values.len() as f64).sqrt().ceil() as usize)
        .max(1)
        .min(max_bins.max(1));
    let width = (max - min) / bin_count as f64;

    let mut counts = vec![0usize; bin_count];
    for &v in values {
        // The maximum lands exactly on the upper edge; keep it in the last bin
        let idx = (((v - min) / width) as usize).min(bin_count - 1);
        counts[idx] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: min + i as f64 * width,
            upper: if i + 1 == bin_count {
                max
            } else {
                min + (i + 1) as f64 * width
            },
            count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_store::RawValue;
    use crate::filter::{FilterClause, FilterEngine, FilterSet};

    fn single(name: &str, values: Vec<RawValue>) -> Dataset {
        Dataset::from_records(
            vec![name.to_string()],
            values.into_iter().map(|v| vec![v]).collect(),
            &HashMap::new(),
        )
        .unwrap()
    }

    fn one_to_ten() -> Dataset {
        single("n", (1..=10).map(RawValue::Int).collect())
    }

    #[test]
    fn test_numeric_profile_one_to_ten() {
        let ds = one_to_ten();
        let col = ds.get_column("n").unwrap();
        let profile = Profiler::default().profile(col, &RowMask::all(10));

        assert_eq!(profile.count, 10);
        assert_eq!(profile.null_count, 0);
        let stats = profile.numeric().unwrap();
        assert_eq!(stats.q1, 3.25);
        assert_eq!(stats.median, 5.5);
        assert_eq!(stats.q3, 7.75);
        assert_eq!(stats.mean, 5.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 10.0);
        assert!((stats.std_dev - 2.8723).abs() < 1e-4);
    }

    #[test]
    fn test_nearest_rank_quartiles() {
        let ds = one_to_ten();
        let profiler = Profiler::new(ProfilerConfig {
            quartile_method: QuartileMethod::NearestRank,
            ..ProfilerConfig::default()
        });
        let profile = profiler.profile(ds.get_column("n").unwrap(), &RowMask::all(10));
        let stats = profile.numeric().unwrap();
        assert_eq!((stats.q1, stats.median, stats.q3), (3.0, 5.0, 8.0));
    }

    #[test]
    fn test_single_value_has_zero_std_dev() {
        let ds = single("x", vec![RawValue::Float(4.0), RawValue::Null]);
        let profile = Profiler::default().profile(ds.get_column("x").unwrap(), &RowMask::all(2));
        assert_eq!(profile.count, 1);
        assert_eq!(profile.null_count, 1);
        let stats = profile.numeric().unwrap();
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.median, 4.0);
    }

    #[test]
    fn test_filtered_profile_counts_selected_rows() {
        let ds = single("age", [20, 30, 35, 40, 50].into_iter().map(RawValue::Int).collect());
        let filters = FilterSet::new().with_clause(FilterClause::range("age", 30, 40));
        let mask = FilterEngine::default().mask(&ds, &filters).unwrap();
        assert_eq!(mask.as_slice(), &[false, true, true, true, false]);

        let profile = Profiler::default().profile(ds.get_column("age").unwrap(), &mask);
        assert_eq!(profile.count, 3);
        assert_eq!(profile.numeric().unwrap().mean, 35.0);
    }

    #[test]
    fn test_empty_selection_has_no_stats() {
        let ds = one_to_ten();
        let mask = RowMask::from_bits(vec![false; 10]);
        let profiler = Profiler::default();
        let col = ds.get_column("n").unwrap();
        let profile = profiler.profile(col, &mask);
        assert_eq!(profile.count, 0);
        assert_eq!(profile.stats, ProfileStats::Numeric(None));
        let hist = profiler.histogram(col, &mask).unwrap();
        assert!(hist.bins.is_empty());
        assert_eq!(hist.total, 0);
    }

    #[test]
    fn test_text_top_k_ties_by_first_seen() {
        let values = ["b", "a", "c", "a", "b", "d"]
            .into_iter()
            .map(RawValue::from)
            .chain([RawValue::Null])
            .collect();
        let ds = single("s", values);
        let profiler = Profiler::new(ProfilerConfig {
            top_k: 3,
            ..ProfilerConfig::default()
        });
        let profile = profiler.profile(ds.get_column("s").unwrap(), &RowMask::all(7));

        assert_eq!(profile.count, 6);
        assert_eq!(profile.null_count, 1);
        match profile.stats {
            ProfileStats::Text(stats) => {
                assert_eq!(stats.distinct_count, 4);
                let top: Vec<(&str, usize)> = stats
                    .top_values
                    .iter()
                    .map(|v| (v.value.as_str(), v.count))
                    .collect();
                assert_eq!(top, vec![("b", 2), ("a", 2), ("c", 1)]);
            }
            other => panic!("unexpected stats {:?}", other),
        }
    }

    #[test]
    fn test_boolean_and_timestamp_profiles() {
        let ds = Dataset::from_records(
            vec!["ok".into(), "at".into()],
            vec![
                vec![true.into(), "2024-01-01".into()],
                vec![false.into(), "2024-01-03".into()],
                vec![true.into(), RawValue::Null],
            ],
            &HashMap::new(),
        )
        .unwrap();
        let profiler = Profiler::default();
        let mask = RowMask::all(3);

        let ok = profiler.profile(ds.get_column("ok").unwrap(), &mask);
        assert_eq!(
            ok.stats,
            ProfileStats::Boolean(BooleanStats {
                true_count: 2,
                false_count: 1
            })
        );

        let at = profiler.profile(ds.get_column("at").unwrap(), &mask);
        assert_eq!(at.null_count, 1);
        match at.stats {
            ProfileStats::Timestamp(Some(stats)) => assert_eq!(stats.span_ms, 2 * 86_400_000),
            other => panic!("unexpected stats {:?}", other),
        }
    }

    #[test]
    fn test_histogram_bins_sum_to_non_null_count() {
        let mut values: Vec<RawValue> = (0..37).map(|i| RawValue::Float(i as f64 * 0.7)).collect();
        values.push(RawValue::Null);
        let ds = single("x", values);
        let hist = Profiler::default()
            .histogram(ds.get_column("x").unwrap(), &RowMask::all(38))
            .unwrap();

        // ceil(sqrt(37)) = 7
        assert_eq!(hist.bins.len(), 7);
        assert_eq!(hist.total, 37);
        assert_eq!(hist.bins.iter().map(|b| b.count).sum::<usize>(), 37);
        assert_eq!(hist.bins[0].lower, 0.0);
        assert_eq!(hist.bins[6].upper, 36.0 * 0.7);
        assert!(hist.bins[6].count >= 1);
    }

    #[test]
    fn test_histogram_under_filtered_mask_skips_nulls() {
        let values = vec![
            RawValue::Int(4),
            RawValue::Null,
            RawValue::Int(9),
            RawValue::Int(1),
            RawValue::Null,
            RawValue::Int(6),
            RawValue::Int(2),
            RawValue::Int(8),
        ];
        let ds = single("n", values);
        let col = ds.get_column("n").unwrap();
        let mask = RowMask::from_bits(vec![true, true, false, true, true, true, false, true]);
        let profiler = Profiler::default();

        let hist = profiler.histogram(col, &mask).unwrap();
        let profile = profiler.profile(col, &mask);
        assert_eq!(profile.count, 4);
        assert_eq!(profile.null_count, 2);
        assert_eq!(hist.total, profile.count);
        assert_eq!(hist.bins.iter().map(|b| b.count).sum::<usize>(), 4);
        // ceil(sqrt(4)) = 2 bins over the selected range 1..=8
        assert_eq!(hist.bins.len(), 2);
        assert_eq!(hist.bins[0].lower, 1.0);
        assert_eq!(hist.bins[1].upper, 8.0);
    }

    #[test]
    fn test_timestamp_span_saturates_on_extreme_range() {
        let types = HashMap::from([("at".to_string(), SemanticType::Timestamp)]);
        let ds = Dataset::from_records(
            vec!["at".into()],
            vec![vec![RawValue::Int(i64::MIN)], vec![RawValue::Int(i64::MAX)]],
            &types,
        )
        .unwrap();
        let profile = Profiler::default().profile(ds.get_column("at").unwrap(), &RowMask::all(2));
        match profile.stats {
            ProfileStats::Timestamp(Some(stats)) => {
                assert_eq!((stats.min, stats.max), (i64::MIN, i64::MAX));
                assert_eq!(stats.span_ms, i64::MAX);
            }
            other => panic!("unexpected stats {:?}", other),
        }
    }

    #[test]
    fn test_histogram_caps_bins_and_keeps_max_in_last_bin() {
        let ds = single("n", (0..10_000).map(RawValue::Int).collect());
        let hist = Profiler::default()
            .histogram(ds.get_column("n").unwrap(), &RowMask::all(10_000))
            .unwrap();
        assert_eq!(hist.bins.len(), DEFAULT_MAX_BINS);
        assert_eq!(hist.bins.iter().map(|b| b.count).sum::<usize>(), 10_000);
        assert_eq!(hist.bins.last().unwrap().count, 200);
    }

    #[test]
    fn test_histogram_degenerate_range() {
        let ds = single("n", vec![RawValue::Int(7); 5]);
        let hist = Profiler::default()
            .histogram(ds.get_column("n").unwrap(), &RowMask::all(5))
            .unwrap();
        assert_eq!(
            hist.bins,
            vec![HistogramBin {
                lower: 7.0,
                upper: 8.0,
                count: 5
            }]
        );
    }

    #[test]
    fn test_histogram_on_text_is_type_mismatch() {
        let ds = single("s", vec![RawValue::from("a")]);
        let result = Profiler::default().histogram(ds.get_column("s").unwrap(), &RowMask::all(1));
        assert!(matches!(result, Err(InsightError::TypeMismatchError { .. })));
    }

    #[test]
    fn test_profile_many_reports_each_column() {
        let ds = one_to_ten();
        let profiler = Profiler::default();
        let results = profiler.profile_many(&ds, &RowMask::all(10), &["n", "missing"]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "n");
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(InsightError::NotFoundError(_))));
        assert_eq!(profiler.counters().profiles, 1);
    }
}
