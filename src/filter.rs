//! Filter Engine - FilterSet to RowMask
//!
//! Optimizations:
//! - **Typed Predicates**: operands are coerced to the column type once, at
//!   clause-add time, so the scan compares raw primitives
//! - **Short-Circuit AND**: clauses refine a shared mask; rows already
//!   rejected are never tested again
//! - **Cost Ordering**: null and equality checks run before set, range and
//!   substring scans
//! - **Parallel Refinement**: large datasets refine the mask with Rayon
//!
//! ## Example
//!
//! ```rust,ignore
//! use alice_insight::{FilterClause, FilterEngine, FilterSet};
//!
//! let filters = FilterSet::new()
//!     .with_clause(FilterClause::range("age", 30, 40))
//!     .with_clause("city in Recife|Natal".parse()?);
//! let mask = FilterEngine::default().mask(&dataset, &filters)?;
//! ```

use crate::column_store::{parse_timestamp, ColumnData, Dataset, RawValue, SemanticType};
use crate::{InsightError, Result};
use log::debug;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::OnceLock;

/// Rows at or above this count are refined in parallel
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 64 * 1024;

// ── FNV-1a ─────────────────────────────────────────────────────
#[inline(always)]
fn fnv1a(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in data {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

// ── Row Mask ───────────────────────────────────────────────────

/// Boolean row selection; `true` = row passes every active filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMask {
    bits: Vec<bool>,
    selected: usize,
}

impl RowMask {
    pub fn all(len: usize) -> Self {
        Self {
            bits: vec![true; len],
            selected: len,
        }
    }

    pub fn from_bits(bits: Vec<bool>) -> Self {
        let selected = bits.iter().filter(|&&b| b).count();
        Self { bits, selected }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, row: usize) -> bool {
        self.bits[row]
    }

    /// Number of rows passing the mask
    pub fn selected_count(&self) -> usize {
        self.selected
    }

    pub fn is_all(&self) -> bool {
        self.selected == self.bits.len()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    /// Indices of selected rows, increasing
    pub fn iter_selected(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, &keep)| keep)
            .map(|(i, _)| i)
    }
}

// ── Clauses ────────────────────────────────────────────────────

/// Filter operator with its operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterOp {
    Equals { value: RawValue },
    /// Inclusive on both ends
    Range { min: RawValue, max: RawValue },
    OneOf { values: Vec<RawValue> },
    Contains { substring: String },
    IsNull,
    IsNotNull,
}

impl FilterOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Equals { .. } => "equals",
            Self::Range { .. } => "range",
            Self::OneOf { .. } => "one_of",
            Self::Contains { .. } => "contains",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
        }
    }
}

/// Single predicate over one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub column: String,
    #[serde(flatten)]
    pub op: FilterOp,
}

impl FilterClause {
    pub fn new(column: impl Into<String>, op: FilterOp) -> Self {
        Self {
            column: column.into(),
            op,
        }
    }

    pub fn equals(column: impl Into<String>, value: impl Into<RawValue>) -> Self {
        Self::new(column, FilterOp::Equals { value: value.into() })
    }

    pub fn range(
        column: impl Into<String>,
        min: impl Into<RawValue>,
        max: impl Into<RawValue>,
    ) -> Self {
        Self::new(
            column,
            FilterOp::Range {
                min: min.into(),
                max: max.into(),
            },
        )
    }

    pub fn one_of<V: Into<RawValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::new(
            column,
            FilterOp::OneOf {
                values: values.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn contains(column: impl Into<String>, substring: impl Into<String>) -> Self {
        Self::new(
            column,
            FilterOp::Contains {
                substring: substring.into(),
            },
        )
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::new(column, FilterOp::IsNull)
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::new(column, FilterOp::IsNotNull)
    }

    /// Stable hash of the clause, independent of process and platform
    pub fn stable_hash(&self) -> u64 {
        let mut buf = Vec::with_capacity(self.column.len() + 24);
        buf.extend_from_slice(self.column.as_bytes());
        buf.push(0);
        match &self.op {
            FilterOp::Equals { value } => {
                buf.push(1);
                encode_value(&mut buf, value);
            }
            FilterOp::Range { min, max } => {
                buf.push(2);
                encode_value(&mut buf, min);
                encode_value(&mut buf, max);
            }
            FilterOp::OneOf { values } => {
                buf.push(3);
                buf.extend_from_slice(&(values.len() as u64).to_le_bytes());
                for value in values {
                    encode_value(&mut buf, value);
                }
            }
            FilterOp::Contains { substring } => {
                buf.push(4);
                buf.extend_from_slice(substring.as_bytes());
            }
            FilterOp::IsNull => buf.push(5),
            FilterOp::IsNotNull => buf.push(6),
        }
        fnv1a(&buf)
    }
}

fn encode_value(buf: &mut Vec<u8>, value: &RawValue) {
    match value {
        RawValue::Null => buf.push(0),
        RawValue::Bool(b) => {
            buf.push(1);
            buf.push(*b as u8);
        }
        RawValue::Int(i) => {
            buf.push(2);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        RawValue::Float(f) => {
            buf.push(3);
            buf.extend_from_slice(&f.to_bits().to_le_bytes());
        }
        RawValue::Text(s) => {
            buf.push(4);
            buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
    }
}

/// AND-combined clause group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet {
    clauses: Vec<FilterClause>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clause(mut self, clause: FilterClause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn push(&mut self, clause: FilterClause) {
        self.clauses.push(clause);
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Order-independent hash over the clause multiset
    pub fn fingerprint(&self) -> u64 {
        let mut hashes: Vec<u64> = self.clauses.iter().map(FilterClause::stable_hash).collect();
        hashes.sort_unstable();
        let mut buf = Vec::with_capacity(8 + hashes.len() * 8);
        buf.extend_from_slice(&(hashes.len() as u64).to_le_bytes());
        for h in hashes {
            buf.extend_from_slice(&h.to_le_bytes());
        }
        fnv1a(&buf)
    }
}

impl FromIterator<FilterClause> for FilterSet {
    fn from_iter<I: IntoIterator<Item = FilterClause>>(iter: I) -> Self {
        Self {
            clauses: iter.into_iter().collect(),
        }
    }
}

// ── Textual clause syntax ──────────────────────────────────────

fn clause_patterns() -> &'static [(Regex, fn(&regex::Captures<'_>) -> FilterOp)] {
    static PATTERNS: OnceLock<Vec<(Regex, fn(&regex::Captures<'_>) -> FilterOp)>> =
        OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: [(&str, fn(&regex::Captures<'_>) -> FilterOp); 6] = [
            (r"(?i)^\s*(?P<col>.+?)\s+is\s+not\s+null\s*$", |_| FilterOp::IsNotNull),
            (r"(?i)^\s*(?P<col>.+?)\s+is\s+null\s*$", |_| FilterOp::IsNull),
            (r"^\s*(?P<col>[^=~]+?)\s*=\s*(?P<arg>.*)$", |c| FilterOp::Equals {
                value: RawValue::parse_literal(&c["arg"]),
            }),
            (r"^\s*(?P<col>[^=~]+?)\s*~\s*(?P<arg>.*)$", |c| FilterOp::Contains {
                substring: c["arg"].trim().to_string(),
            }),
            (
                r"(?i)^\s*(?P<col>.+?)\s+between\s+(?P<min>.+?)\.\.(?P<max>.+)$",
                |c| FilterOp::Range {
                    min: RawValue::parse_literal(&c["min"]),
                    max: RawValue::parse_literal(&c["max"]),
                },
            ),
            (r"(?i)^\s*(?P<col>.+?)\s+in\s+(?P<arg>.+)$", |c| FilterOp::OneOf {
                values: c["arg"].split('|').map(RawValue::parse_literal).collect(),
            }),
        ];
        table
            .into_iter()
            .map(|(pattern, build)| (Regex::new(pattern).expect("static clause pattern"), build))
            .collect()
    })
}

impl FromStr for FilterClause {
    type Err = InsightError;

    /// Parse `col = v`, `col ~ sub`, `col in a|b`, `col between lo..hi`,
    /// `col is null` or `col is not null`.
    fn from_str(s: &str) -> Result<Self> {
        for (re, build) in clause_patterns() {
            if let Some(caps) = re.captures(s) {
                let column = caps["col"].trim().to_string();
                if column.is_empty() {
                    break;
                }
                return Ok(Self::new(column, build(&caps)));
            }
        }
        Err(InsightError::ParseError(format!("unrecognised filter clause: {}", s)))
    }
}

// ── Compilation ────────────────────────────────────────────────

/// Predicate with its operand already coerced to the column type
#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Null { expect_null: bool },
    /// Integer and timestamp columns
    EqInt(i64),
    EqFloat(f64),
    EqText(String),
    EqBool(bool),
    InInt(HashSet<i64>),
    InFloat(Vec<f64>),
    InText(HashSet<String>),
    InBool { accept_true: bool, accept_false: bool },
    RangeNum { min: f64, max: f64 },
    RangeTime { min: i64, max: i64 },
    Contains(String),
}

impl Predicate {
    /// Relative scan cost, cheapest first
    fn cost(&self) -> u8 {
        match self {
            Self::Null { .. } => 0,
            Self::EqInt(_) | Self::EqFloat(_) | Self::EqBool(_) | Self::InBool { .. } => 1,
            Self::EqText(_) => 2,
            Self::InInt(_) | Self::InFloat(_) | Self::RangeNum { .. } | Self::RangeTime { .. } => 3,
            Self::InText(_) => 4,
            Self::Contains(_) => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CompiledClause {
    column: usize,
    predicate: Predicate,
}

/// FilterSet validated and bound to one dataset's column layout
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    clauses: SmallVec<[CompiledClause; 4]>,
    fingerprint: u64,
    row_count: usize,
    parallel_threshold: usize,
}

impl CompiledFilter {
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate against the dataset this filter was compiled for
    pub fn evaluate(&self, dataset: &Dataset) -> RowMask {
        debug_assert_eq!(dataset.row_count(), self.row_count);
        let n = dataset.row_count();
        if self.clauses.is_empty() {
            return RowMask::all(n);
        }

        let parallel = n >= self.parallel_threshold;
        let mut bits = vec![true; n];
        for clause in &self.clauses {
            let column = &dataset.columns()[clause.column];
            apply(&clause.predicate, column.data(), &mut bits, parallel);
        }
        let mask = RowMask::from_bits(bits);
        debug!(
            "mask {:016x}: {} of {} rows selected",
            self.fingerprint,
            mask.selected_count(),
            n
        );
        mask
    }
}

/// Compiles FilterSets against a dataset and evaluates them into masks
#[derive(Debug, Clone, Copy)]
pub struct FilterEngine {
    parallel_threshold: usize,
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLEL_THRESHOLD)
    }
}

impl FilterEngine {
    pub fn new(parallel_threshold: usize) -> Self {
        Self { parallel_threshold }
    }

    /// Check a clause against the dataset schema without building a mask
    pub fn validate_clause(&self, dataset: &Dataset, clause: &FilterClause) -> Result<()> {
        compile_clause(dataset, clause).map(|_| ())
    }

    /// Validate every clause and bind them to column positions.
    ///
    /// Fails on the first unknown column or operator/type mismatch.
    pub fn compile(&self, dataset: &Dataset, filters: &FilterSet) -> Result<CompiledFilter> {
        let mut clauses = filters
            .clauses()
            .iter()
            .map(|c| compile_clause(dataset, c))
            .collect::<Result<SmallVec<[CompiledClause; 4]>>>()?;
        // Stable: equal-cost clauses keep their given order
        clauses.sort_by_key(|c| c.predicate.cost());

        Ok(CompiledFilter {
            clauses,
            fingerprint: filters.fingerprint(),
            row_count: dataset.row_count(),
            parallel_threshold: self.parallel_threshold,
        })
    }

    /// Compile and evaluate in one step
    pub fn mask(&self, dataset: &Dataset, filters: &FilterSet) -> Result<RowMask> {
        Ok(self.compile(dataset, filters)?.evaluate(dataset))
    }
}

fn coerce_int(ty: SemanticType, value: &RawValue) -> Option<i64> {
    match ty {
        SemanticType::Timestamp => match value {
            RawValue::Text(s) => parse_timestamp(s),
            RawValue::Int(i) => Some(*i),
            _ => None,
        },
        _ => match value {
            RawValue::Int(i) => Some(*i),
            RawValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            RawValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        },
    }
}

fn coerce_float(value: &RawValue) -> Option<f64> {
    match value {
        RawValue::Int(i) => Some(*i as f64),
        RawValue::Float(f) if f.is_finite() => Some(*f),
        RawValue::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn coerce_text(value: &RawValue) -> Option<String> {
    match value {
        RawValue::Null => None,
        other => Some(other.to_string()),
    }
}

fn coerce_bool(value: &RawValue) -> Option<bool> {
    match value {
        RawValue::Bool(b) => Some(*b),
        RawValue::Text(s) if s.trim().eq_ignore_ascii_case("true") => Some(true),
        RawValue::Text(s) if s.trim().eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn compile_clause(dataset: &Dataset, clause: &FilterClause) -> Result<CompiledClause> {
    let column = dataset.column_index(&clause.column)?;
    let ty = dataset.columns()[column].semantic_type();
    let mismatch = |reason: String| InsightError::TypeMismatchError {
        column: clause.column.clone(),
        operator: clause.op.name(),
        column_type: ty,
        reason,
    };
    let bad_operand =
        |value: &RawValue| mismatch(format!("operand '{}' is not a valid {} value", value, ty));

    let predicate = match &clause.op {
        FilterOp::IsNull => Predicate::Null { expect_null: true },
        FilterOp::IsNotNull => Predicate::Null { expect_null: false },
        FilterOp::Equals { value } => match ty {
            SemanticType::Integer | SemanticType::Timestamp => {
                Predicate::EqInt(coerce_int(ty, value).ok_or_else(|| bad_operand(value))?)
            }
            SemanticType::Float => {
                Predicate::EqFloat(coerce_float(value).ok_or_else(|| bad_operand(value))?)
            }
            SemanticType::Text => {
                Predicate::EqText(coerce_text(value).ok_or_else(|| bad_operand(value))?)
            }
            SemanticType::Boolean => {
                Predicate::EqBool(coerce_bool(value).ok_or_else(|| bad_operand(value))?)
            }
        },
        FilterOp::OneOf { values } => match ty {
            SemanticType::Integer | SemanticType::Timestamp => Predicate::InInt(
                values
                    .iter()
                    .map(|v| coerce_int(ty, v).ok_or_else(|| bad_operand(v)))
                    .collect::<Result<_>>()?,
            ),
            SemanticType::Float => Predicate::InFloat(
                values
                    .iter()
                    .map(|v| coerce_float(v).ok_or_else(|| bad_operand(v)))
                    .collect::<Result<_>>()?,
            ),
            SemanticType::Text => Predicate::InText(
                values
                    .iter()
                    .map(|v| coerce_text(v).ok_or_else(|| bad_operand(v)))
                    .collect::<Result<_>>()?,
            ),
            SemanticType::Boolean => {
                let mut accept_true = false;
                let mut accept_false = false;
                for v in values {
                    match coerce_bool(v).ok_or_else(|| bad_operand(v))? {
                        true => accept_true = true,
                        false => accept_false = true,
                    }
                }
                Predicate::InBool {
                    accept_true,
                    accept_false,
                }
            }
        },
        FilterOp::Range { min, max } => match ty {
            SemanticType::Integer | SemanticType::Float => Predicate::RangeNum {
                min: coerce_float(min).ok_or_else(|| bad_operand(min))?,
                max: coerce_float(max).ok_or_else(|| bad_operand(max))?,
            },
            SemanticType::Timestamp => Predicate::RangeTime {
                min: coerce_int(ty, min).ok_or_else(|| bad_operand(min))?,
                max: coerce_int(ty, max).ok_or_else(|| bad_operand(max))?,
            },
            _ => {
                return Err(mismatch(
                    "range requires an integer, float or timestamp column".to_string(),
                ))
            }
        },
        FilterOp::Contains { substring } => match ty {
            SemanticType::Text => Predicate::Contains(substring.clone()),
            _ => return Err(mismatch("contains requires a text column".to_string())),
        },
    };

    Ok(CompiledClause { column, predicate })
}

// ── Scanning ───────────────────────────────────────────────────

/// Equality within one machine epsilon, relative to the larger magnitude
/// (absolute below 1.0).
fn float_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// Clear `keep` for rows whose value fails `test`; nulls always fail.
fn refine<T, F>(bits: &mut [bool], values: &[Option<T>], parallel: bool, test: F)
where
    T: Sync,
    F: Fn(&T) -> bool + Sync,
{
    let step = |(keep, value): (&mut bool, &Option<T>)| {
        if *keep {
            *keep = value.as_ref().map_or(false, &test);
        }
    };
    if parallel {
        bits.par_iter_mut().zip(values.par_iter()).for_each(step);
    } else {
        bits.iter_mut().zip(values.iter()).for_each(step);
    }
}

fn refine_nulls(bits: &mut [bool], data: &ColumnData, expect_null: bool, parallel: bool) {
    let step = |(row, keep): (usize, &mut bool)| {
        if *keep {
            *keep = data.is_null(row) == expect_null;
        }
    };
    if parallel {
        bits.par_iter_mut().enumerate().for_each(step);
    } else {
        bits.iter_mut().enumerate().for_each(step);
    }
}

fn apply(predicate: &Predicate, data: &ColumnData, bits: &mut [bool], parallel: bool) {
    match (predicate, data) {
        (Predicate::Null { expect_null }, _) => refine_nulls(bits, data, *expect_null, parallel),
        (Predicate::EqInt(t), ColumnData::Integer(v) | ColumnData::Timestamp(v)) => {
            refine(bits, v, parallel, |x| x == t)
        }
        (Predicate::EqFloat(t), ColumnData::Float(v)) => {
            refine(bits, v, parallel, |&x| float_eq(x, *t))
        }
        (Predicate::EqText(t), ColumnData::Text(v)) => refine(bits, v, parallel, |x| x == t),
        (Predicate::EqBool(t), ColumnData::Boolean(v)) => refine(bits, v, parallel, |x| x == t),
        (Predicate::InInt(set), ColumnData::Integer(v) | ColumnData::Timestamp(v)) => {
            refine(bits, v, parallel, |x| set.contains(x))
        }
        (Predicate::InFloat(set), ColumnData::Float(v)) => refine(bits, v, parallel, |x| {
            set.iter().any(|&t| float_eq(*x, t))
        }),
        (Predicate::InText(set), ColumnData::Text(v)) => {
            refine(bits, v, parallel, |x| set.contains(x))
        }
        (
            Predicate::InBool {
                accept_true,
                accept_false,
            },
            ColumnData::Boolean(v),
        ) => refine(bits, v, parallel, |&x| if x { *accept_true } else { *accept_false }),
        (Predicate::RangeNum { min, max }, ColumnData::Integer(v)) => {
            refine(bits, v, parallel, |&x| (x as f64) >= *min && (x as f64) <= *max)
        }
        (Predicate::RangeNum { min, max }, ColumnData::Float(v)) => {
            refine(bits, v, parallel, |x| x >= min && x <= max)
        }
        (Predicate::RangeTime { min, max }, ColumnData::Timestamp(v)) => {
            refine(bits, v, parallel, |x| x >= min && x <= max)
        }
        (Predicate::Contains(sub), ColumnData::Text(v)) => {
            refine(bits, v, parallel, |x| x.contains(sub.as_str()))
        }
        // compile_clause pairs every predicate with a matching column type
        _ => bits.iter_mut().for_each(|keep| *keep = false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn people() -> Dataset {
        Dataset::from_records(
            vec!["age".into(), "city".into(), "score".into(), "active".into(), "joined".into()],
            vec![
                vec![20.into(), "Recife".into(), 1.5.into(), true.into(), "2024-01-01".into()],
                vec![30.into(), "Natal".into(), 2.5.into(), false.into(), "2024-02-01".into()],
                vec![35.into(), RawValue::Null, 3.5.into(), true.into(), "2024-03-01".into()],
                vec![40.into(), "Recife Antigo".into(), RawValue::Null, RawValue::Null, "2024-04-01".into()],
                vec![50.into(), "Salvador".into(), 5.5.into(), false.into(), RawValue::Null],
            ],
            &HashMap::new(),
        )
        .unwrap()
    }

    fn mask_of(ds: &Dataset, filters: FilterSet) -> Vec<bool> {
        FilterEngine::default()
            .mask(ds, &filters)
            .unwrap()
            .as_slice()
            .to_vec()
    }

    #[test]
    fn test_range_on_integer_is_inclusive() {
        let ds = people();
        let mask = mask_of(&ds, FilterSet::new().with_clause(FilterClause::range("age", 30, 40)));
        assert_eq!(mask, vec![false, true, true, true, false]);
    }

    #[test]
    fn test_empty_filter_set_is_all_true() {
        let ds = people();
        let mask = FilterEngine::default().mask(&ds, &FilterSet::new()).unwrap();
        assert!(mask.is_all());
        assert_eq!(mask.len(), ds.row_count());
    }

    #[test]
    fn test_clauses_combine_with_and() {
        let ds = people();
        let filters = FilterSet::new()
            .with_clause(FilterClause::contains("city", "Recife"))
            .with_clause(FilterClause::equals("active", true));
        assert_eq!(mask_of(&ds, filters), vec![true, false, false, false, false]);
    }

    #[test]
    fn test_clause_order_does_not_change_mask() {
        let ds = people();
        let a = FilterClause::range("score", 2.0, 6.0);
        let b = FilterClause::is_not_null("city");
        let c = FilterClause::one_of("age", [30, 50]);
        let forward: FilterSet = vec![a.clone(), b.clone(), c.clone()].into_iter().collect();
        let backward: FilterSet = vec![c, b, a].into_iter().collect();
        assert_eq!(mask_of(&ds, forward.clone()), mask_of(&ds, backward.clone()));
        assert_eq!(mask_of(&ds, forward.clone()), vec![false, true, false, false, true]);
        assert_eq!(forward.fingerprint(), backward.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_multiset_sensitive() {
        let a = FilterClause::equals("city", "Natal");
        let once = FilterSet::new().with_clause(a.clone());
        let twice = FilterSet::new().with_clause(a.clone()).with_clause(a);
        assert_ne!(once.fingerprint(), twice.fingerprint());
        assert_ne!(once.fingerprint(), FilterSet::new().fingerprint());
        assert_ne!(
            FilterSet::new().with_clause(FilterClause::equals("age", 30)).fingerprint(),
            FilterSet::new().with_clause(FilterClause::equals("age", 31)).fingerprint()
        );
    }

    #[test]
    fn test_null_operators() {
        let ds = people();
        assert_eq!(
            mask_of(&ds, FilterSet::new().with_clause(FilterClause::is_null("active"))),
            vec![false, false, false, true, false]
        );
        assert_eq!(
            mask_of(&ds, FilterSet::new().with_clause(FilterClause::is_not_null("joined"))),
            vec![true, true, true, true, false]
        );
    }

    #[test]
    fn test_nulls_never_match_value_predicates() {
        let ds = people();
        let mask = mask_of(
            &ds,
            FilterSet::new().with_clause(FilterClause::one_of("active", [true, false])),
        );
        assert_eq!(mask, vec![true, true, true, false, true]);
    }

    #[test]
    fn test_float_equality_is_relative() {
        let ds = Dataset::from_records(
            vec!["x".into()],
            vec![vec![(0.1 + 0.2).into()], vec![1.0e6.into()], vec![(1.0e17 + 16.0).into()]],
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(
            mask_of(&ds, FilterSet::new().with_clause(FilterClause::equals("x", 0.3))),
            vec![true, false, false]
        );
        assert_eq!(
            mask_of(&ds, FilterSet::new().with_clause(FilterClause::equals("x", 1.0e6 + 0.5))),
            vec![false, false, false]
        );
        // One ulp apart at 1e17
        assert_eq!(
            mask_of(&ds, FilterSet::new().with_clause(FilterClause::one_of("x", [1.0e17, 0.3]))),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_timestamp_range() {
        let ds = people();
        let filters = FilterSet::new().with_clause(FilterClause::range(
            "joined",
            "2024-01-15",
            "2024-03-01 00:00:00",
        ));
        assert_eq!(mask_of(&ds, filters), vec![false, true, true, false, false]);
    }

    #[test]
    fn test_contains_on_integer_is_type_mismatch() {
        let ds = people();
        let err = FilterEngine::default()
            .validate_clause(&ds, &FilterClause::contains("age", "a"))
            .unwrap_err();
        assert!(matches!(
            err,
            InsightError::TypeMismatchError { column_type: SemanticType::Integer, .. }
        ));
    }

    #[test]
    fn test_range_on_text_is_type_mismatch() {
        let ds = people();
        let filters = FilterSet::new().with_clause(FilterClause::range("city", "a", "z"));
        assert!(matches!(
            FilterEngine::default().compile(&ds, &filters),
            Err(InsightError::TypeMismatchError { .. })
        ));
    }

    #[test]
    fn test_uncoercible_operand_is_type_mismatch() {
        let ds = people();
        let filters = FilterSet::new().with_clause(FilterClause::equals("age", "forty"));
        assert!(matches!(
            FilterEngine::default().compile(&ds, &filters),
            Err(InsightError::TypeMismatchError { .. })
        ));
    }

    #[test]
    fn test_unknown_column_is_not_found() {
        let ds = people();
        let filters = FilterSet::new().with_clause(FilterClause::is_null("height"));
        assert!(matches!(
            FilterEngine::default().compile(&ds, &filters),
            Err(InsightError::NotFoundError(_))
        ));
    }

    #[test]
    fn test_parallel_refinement_matches_sequential() {
        let ds = people();
        let filters = FilterSet::new()
            .with_clause(FilterClause::range("age", 25, 60))
            .with_clause(FilterClause::is_not_null("score"));
        let sequential = FilterEngine::new(usize::MAX).mask(&ds, &filters).unwrap();
        let parallel = FilterEngine::new(0).mask(&ds, &filters).unwrap();
        assert_eq!(sequential, parallel);
        assert_eq!(parallel.iter_selected().collect::<Vec<_>>(), vec![1, 2, 4]);
    }

    #[test]
    fn test_parse_clause_syntax() {
        let parsed: FilterClause = "age between 30..40".parse().unwrap();
        assert_eq!(parsed, FilterClause::range("age", 30, 40));

        let parsed: FilterClause = "city = Recife".parse().unwrap();
        assert_eq!(parsed, FilterClause::equals("city", "Recife"));

        let parsed: FilterClause = "city ~ Rec".parse().unwrap();
        assert_eq!(parsed, FilterClause::contains("city", "Rec"));

        let parsed: FilterClause = "age in 20|50".parse().unwrap();
        assert_eq!(parsed, FilterClause::one_of("age", [20, 50]));

        let parsed: FilterClause = "active IS NOT NULL".parse().unwrap();
        assert_eq!(parsed, FilterClause::is_not_null("active"));

        let parsed: FilterClause = "active is null".parse().unwrap();
        assert_eq!(parsed, FilterClause::is_null("active"));

        assert!(matches!(
            "just words".parse::<FilterClause>(),
            Err(InsightError::ParseError(_))
        ));
    }

    #[test]
    fn test_filter_set_json_shape() {
        let json = r#"[
            {"column": "age", "op": "range", "min": 30, "max": 40},
            {"column": "city", "op": "one_of", "values": ["Natal", "Recife"]},
            {"column": "active", "op": "is_null"}
        ]"#;
        let filters: FilterSet = serde_json::from_str(json).unwrap();
        assert_eq!(filters.len(), 3);
        assert_eq!(filters.clauses()[0], FilterClause::range("age", 30, 40));
        assert_eq!(filters.clauses()[2], FilterClause::is_null("active"));
    }
}
