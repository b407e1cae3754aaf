//! # ALICE-Insight
//!
//! Interactive data-profiling engine.
//!
//! Load a table once, then ask for per-column statistics and histograms
//! under any combination of filters. Results are memoized per filter state,
//! so toggling back to a previously seen combination costs a lookup.
//!
//! ## Pipeline
//!
//! ```text
//! JSON table / rows
//!     ↓
//! Column Store (typed columns, inferred once)
//!     ↓
//! Filter Engine (clauses → RowMask, order-independent fingerprint)
//!     ↓
//! Aggregation Cache (fingerprint, generation, column, kind)
//!     ↓ miss
//! Profiler (stats / histogram over the masked rows)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use alice_insight::{FilterClause, RawValue, Session};
//!
//! let rows: Vec<_> = [(23, "Oslo"), (31, "Lima"), (45, "Oslo")]
//!     .into_iter()
//!     .map(|(age, city)| {
//!         vec![
//!             ("age".to_string(), RawValue::from(age)),
//!             ("city".to_string(), RawValue::from(city)),
//!         ]
//!     })
//!     .collect();
//!
//! let mut session = Session::default();
//! session.load_dataset(&rows).unwrap();
//! session.add_filter(FilterClause::equals("city", "Oslo")).unwrap();
//!
//! let profile = session.get_profile("age").unwrap();
//! assert_eq!(profile.count, 2);
//! assert_eq!(profile.numeric().unwrap().mean, 34.0);
//! ```

// --- Global Allocator: mimalloc (Microsoft's high-performance allocator) ---
#[cfg(not(target_env = "msvc"))]
use mimalloc::MiMalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod column_store;
pub mod filter;
pub mod profiler;

// Memoization and session state
pub mod cache;
pub mod session;

// Input and settings
pub mod config;
pub mod ingest;

pub use column_store::{
    format_timestamp, parse_timestamp, Column, ColumnData, ColumnInfo, Dataset, DatasetSummary,
    RawRow, RawValue, SemanticType,
};
pub use filter::{
    CompiledFilter, FilterClause, FilterEngine, FilterOp, FilterSet, RowMask,
    DEFAULT_PARALLEL_THRESHOLD,
};
pub use profiler::{
    BooleanStats, ColumnProfile, Histogram, HistogramBin, NumericStats, ProfileStats, Profiler,
    ProfilerConfig, ProfilerCounters, QuartileMethod, TextStats, TimestampStats, ValueCount,
};

pub use cache::{AggregationCache, Artifact, ArtifactKind, CacheConfig, CacheKey, CacheStats};
pub use session::{QueryContext, Session, SessionState};

pub use config::EngineConfig;
pub use ingest::{dtype_to_semantic, read_dataset, RawTable};

use thiserror::Error;

/// ALICE-Insight version
pub const ALICE_INSIGHT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for ALICE-Insight operations
#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Column not found: {0}")]
    NotFoundError(String),

    #[error("Type mismatch: '{operator}' on {column_type} column '{column}': {reason}")]
    TypeMismatchError {
        column: String,
        operator: &'static str,
        column_type: SemanticType,
        reason: String,
    },

    #[error("No dataset loaded")]
    NotReadyError,

    #[error("Result superseded by a newer dataset or filter state")]
    StaleResultError,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, InsightError>;
