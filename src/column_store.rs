//! Column Store - typed, immutable columnar container
//!
//! Built once per ingested file in a single pass over the raw rows:
//! - Type inference per column (Integer > Float > Boolean > Timestamp > Text)
//! - Declared types coerce unparseable values to null
//! - O(1) column lookup by name, O(N) scans by value

use crate::{InsightError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Raw scalar as handed over by the upload/parsing layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            // NaN/inf never survive ingestion
            Self::Float(f) => !f.is_finite(),
            _ => false,
        }
    }

    /// Parse a loosely typed literal (CLI input, filter operands).
    pub fn parse_literal(s: &str) -> Self {
        let s = s.trim();
        if s.eq_ignore_ascii_case("null") {
            return Self::Null;
        }
        if let Some(quoted) = s
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
        {
            return Self::Text(quoted.to_string());
        }
        if let Some(b) = parse_bool_text(s) {
            return Self::Bool(b);
        }
        if let Ok(i) = s.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            if f.is_finite() {
                return Self::Float(f);
            }
        }
        Self::Text(s.to_string())
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for RawValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One ingested row: ordered (column name, value) pairs
pub type RawRow = Vec<(String, RawValue)>;

/// Semantic column type, fixed at ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
}

impl SemanticType {
    /// Inference order, strictest first
    pub const INFERENCE_ORDER: [SemanticType; 5] = [
        Self::Integer,
        Self::Float,
        Self::Boolean,
        Self::Timestamp,
        Self::Text,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    /// Types that support range filters and histograms
    pub fn is_ordered(self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::Timestamp)
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Naive timestamp formats (a trailing Z already means UTC)
const TIMESTAMP_FORMATS_NAIVE: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
];

/// Timestamp formats carrying an offset (+09:00)
const TIMESTAMP_FORMATS_TZ: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%:z"];

/// Compact layout written by the spreadsheet converter (20250115103045).
/// Only honoured for declared timestamp columns, otherwise it reads as an integer.
/// Ingest declares `object` columns holding nothing else.
const TIMESTAMP_FORMAT_COMPACT: &str = "%Y%m%d%H%M%S";

/// True for fourteen-digit text that is a valid compact timestamp
pub fn is_compact_timestamp(s: &str) -> bool {
    let s = s.trim();
    s.len() == 14
        && s.bytes().all(|b| b.is_ascii_digit())
        && NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT_COMPACT).is_ok()
}

/// Parse timestamp text into epoch milliseconds (naive values are UTC)
pub fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    for fmt in TIMESTAMP_FORMATS_TZ {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.timestamp_millis());
        }
    }
    for fmt in TIMESTAMP_FORMATS_NAIVE {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Render epoch milliseconds as ISO-8601 (UTC)
pub fn format_timestamp(ms: i64) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => ms.to_string(),
    }
}

fn parse_bool_text(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn to_integer(v: &RawValue) -> Option<i64> {
    match v {
        RawValue::Int(i) => Some(*i),
        RawValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_float(v: &RawValue) -> Option<f64> {
    match v {
        RawValue::Int(i) => Some(*i as f64),
        RawValue::Float(f) if f.is_finite() => Some(*f),
        RawValue::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn to_boolean(v: &RawValue) -> Option<bool> {
    match v {
        RawValue::Bool(b) => Some(*b),
        RawValue::Text(s) => parse_bool_text(s.trim()),
        _ => None,
    }
}

fn to_timestamp(v: &RawValue, declared: bool) -> Option<i64> {
    match v {
        RawValue::Text(s) => parse_timestamp(s).or_else(|| {
            if declared {
                NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT_COMPACT)
                    .ok()
                    .map(|dt| dt.and_utc().timestamp_millis())
            } else {
                None
            }
        }),
        // Declared timestamp columns accept epoch milliseconds as-is
        RawValue::Int(i) if declared => Some(*i),
        _ => None,
    }
}

fn to_text(v: &RawValue) -> Option<String> {
    if v.is_null() {
        None
    } else {
        Some(v.to_string())
    }
}

fn parses_as(ty: SemanticType, v: &RawValue) -> bool {
    match ty {
        SemanticType::Integer => to_integer(v).is_some(),
        SemanticType::Float => to_float(v).is_some(),
        SemanticType::Boolean => to_boolean(v).is_some(),
        SemanticType::Timestamp => to_timestamp(v, false).is_some(),
        SemanticType::Text => true,
    }
}

/// Typed value storage
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Boolean(Vec<Option<bool>>),
    /// Epoch milliseconds
    Timestamp(Vec<Option<i64>>),
}

impl ColumnData {
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            Self::Integer(_) => SemanticType::Integer,
            Self::Float(_) => SemanticType::Float,
            Self::Text(_) => SemanticType::Text,
            Self::Boolean(_) => SemanticType::Boolean,
            Self::Timestamp(_) => SemanticType::Timestamp,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Integer(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Text(v) => v.len(),
            Self::Boolean(v) => v.len(),
            Self::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self, row: usize) -> bool {
        match self {
            Self::Integer(v) => v[row].is_none(),
            Self::Float(v) => v[row].is_none(),
            Self::Text(v) => v[row].is_none(),
            Self::Boolean(v) => v[row].is_none(),
            Self::Timestamp(v) => v[row].is_none(),
        }
    }

    /// Build typed storage from raw values, returning the number of values
    /// that failed to parse and were stored as null.
    fn build(ty: SemanticType, raw: &[RawValue], declared: bool) -> (Self, usize) {
        fn collect<T>(raw: &[RawValue], f: impl Fn(&RawValue) -> Option<T>) -> (Vec<Option<T>>, usize) {
            let mut coerced = 0;
            let values = raw
                .iter()
                .map(|v| {
                    if v.is_null() {
                        return None;
                    }
                    let parsed = f(v);
                    if parsed.is_none() {
                        coerced += 1;
                    }
                    parsed
                })
                .collect();
            (values, coerced)
        }

        match ty {
            SemanticType::Integer => {
                let (v, c) = collect(raw, to_integer);
                (Self::Integer(v), c)
            }
            SemanticType::Float => {
                let (v, c) = collect(raw, to_float);
                (Self::Float(v), c)
            }
            SemanticType::Boolean => {
                let (v, c) = collect(raw, to_boolean);
                (Self::Boolean(v), c)
            }
            SemanticType::Timestamp => {
                let (v, c) = collect(raw, |v| to_timestamp(v, declared));
                (Self::Timestamp(v), c)
            }
            SemanticType::Text => {
                let (v, c) = collect(raw, to_text);
                (Self::Text(v), c)
            }
        }
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
    null_count: usize,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        let null_count = (0..data.len()).filter(|&i| data.is_null(i)).count();
        Self {
            name: name.into(),
            data,
            null_count,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn semantic_type(&self) -> SemanticType {
        self.data.semantic_type()
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    /// Render-facing value at `row` (timestamps become ISO-8601 text)
    pub fn value(&self, row: usize) -> RawValue {
        match &self.data {
            ColumnData::Integer(v) => v[row].map_or(RawValue::Null, RawValue::Int),
            ColumnData::Float(v) => v[row].map_or(RawValue::Null, RawValue::Float),
            ColumnData::Text(v) => v[row]
                .as_ref()
                .map_or(RawValue::Null, |s| RawValue::Text(s.clone())),
            ColumnData::Boolean(v) => v[row].map_or(RawValue::Null, RawValue::Bool),
            ColumnData::Timestamp(v) => v[row]
                .map_or(RawValue::Null, |ms| RawValue::Text(format_timestamp(ms))),
        }
    }
}

/// Per-column entry of a dataset summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub semantic_type: SemanticType,
    pub null_count: usize,
}

/// Shape of a loaded dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub row_count: usize,
    pub columns: Vec<ColumnInfo>,
}

/// Immutable columnar snapshot of one ingested file
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    row_count: usize,
}

impl Dataset {
    /// Build a dataset from name-keyed rows.
    ///
    /// Column order and names come from the first row; every other row must
    /// carry the same names in the same order.
    pub fn load(rows: &[RawRow], declared: &HashMap<String, SemanticType>) -> Result<Self> {
        let columns: Vec<String> = match rows.first() {
            Some(first) => first.iter().map(|(name, _)| name.clone()).collect(),
            None => Vec::new(),
        };

        let mut records = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(InsightError::SchemaError(format!(
                    "row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    columns.len()
                )));
            }
            let mut record = Vec::with_capacity(row.len());
            for ((name, value), expected) in row.iter().zip(&columns) {
                if name != expected {
                    return Err(InsightError::SchemaError(format!(
                        "row {} has column '{}' where '{}' was expected",
                        i, name, expected
                    )));
                }
                record.push(value.clone());
            }
            records.push(record);
        }

        Self::from_records(columns, records, declared)
    }

    /// Build a dataset from a header and positional records.
    pub fn from_records(
        columns: Vec<String>,
        records: Vec<Vec<RawValue>>,
        declared: &HashMap<String, SemanticType>,
    ) -> Result<Self> {
        let mut index = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(InsightError::SchemaError(format!(
                    "duplicate column name '{}'",
                    name
                )));
            }
        }
        for name in declared.keys() {
            if !index.contains_key(name) {
                debug!("declared type for absent column '{}' ignored", name);
            }
        }

        // Transpose rows into raw column buffers
        let row_count = records.len();
        let mut raw: Vec<Vec<RawValue>> = (0..columns.len())
            .map(|_| Vec::with_capacity(row_count))
            .collect();
        for (i, record) in records.into_iter().enumerate() {
            if record.len() != columns.len() {
                return Err(InsightError::SchemaError(format!(
                    "row {} has {} columns, expected {}",
                    i,
                    record.len(),
                    columns.len()
                )));
            }
            for (buf, value) in raw.iter_mut().zip(record) {
                buf.push(value);
            }
        }

        let mut built = Vec::with_capacity(columns.len());
        for (name, values) in columns.into_iter().zip(raw) {
            let (ty, is_declared) = match declared.get(&name) {
                Some(&ty) => (ty, true),
                None => (infer_type(&values), false),
            };
            let (data, coerced) = ColumnData::build(ty, &values, is_declared);
            if coerced > 0 {
                warn!(
                    "column '{}': {} value(s) not parseable as {} stored as null",
                    name, coerced, ty
                );
            }
            built.push(Column::new(name, data));
        }

        Ok(Self {
            columns: built,
            index,
            row_count,
        })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    pub fn get_column(&self, name: &str) -> Result<&Column> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| InsightError::NotFoundError(name.to_string()))
    }

    /// All cells of one row, in column order
    pub fn row(&self, row: usize) -> Vec<RawValue> {
        self.columns.iter().map(|c| c.value(row)).collect()
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            row_count: self.row_count,
            columns: self
                .columns
                .iter()
                .map(|c| ColumnInfo {
                    name: c.name().to_string(),
                    semantic_type: c.semantic_type(),
                    null_count: c.null_count(),
                })
                .collect(),
        }
    }
}

/// Strictest type every non-null value parses as; all-null columns are Text.
fn infer_type(values: &[RawValue]) -> SemanticType {
    if values.iter().all(RawValue::is_null) {
        return SemanticType::Text;
    }
    SemanticType::INFERENCE_ORDER
        .into_iter()
        .find(|&ty| values.iter().filter(|v| !v.is_null()).all(|v| parses_as(ty, v)))
        .unwrap_or(SemanticType::Text)
}
