//! Session Controller
//!
//! Owns the active dataset and filter state, and routes profile/histogram
//! requests through the aggregation cache.
//!
//! ```text
//! Empty ──load──▶ Loaded ──set_filters──▶ Filtered ─┐
//!   ▲               │                        ▲      │ set_filters
//!   └──reset/load───┴────────────────────────┴──────┘
//! ```
//!
//! Every load or reset starts a new generation, which invalidates all cached
//! artifacts. Every mutation also advances an epoch; a [`QueryContext`]
//! taken before the mutation reports its results as stale.

use crate::cache::{AggregationCache, CacheStats};
use crate::column_store::{Dataset, DatasetSummary, RawRow, RawValue, SemanticType};
use crate::config::EngineConfig;
use crate::filter::{CompiledFilter, FilterClause, FilterEngine, FilterSet, RowMask};
use crate::ingest::RawTable;
use crate::profiler::{ColumnProfile, Histogram, Profiler, ProfilerCounters};
use crate::{InsightError, Result};
use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// No dataset
    Empty,
    /// Dataset present, no filters applied yet
    Loaded,
    /// Dataset present, filters set at least once
    Filtered,
}

/// Immutable snapshot of the session for (possibly background) queries.
///
/// Cheap to clone and `Send + Sync`. Results computed after the session has
/// moved on are returned as [`InsightError::StaleResultError`] and never
/// cached.
#[derive(Clone)]
pub struct QueryContext {
    dataset: Arc<Dataset>,
    filter: Arc<CompiledFilter>,
    mask: Arc<OnceLock<Arc<RowMask>>>,
    generation: u64,
    epoch: u64,
    current_epoch: Arc<AtomicU64>,
    profiler: Arc<Profiler>,
    cache: Arc<AggregationCache>,
}

impl QueryContext {
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fingerprint(&self) -> u64 {
        self.filter.fingerprint()
    }

    /// Whether the session's dataset or filters changed since this snapshot
    pub fn is_stale(&self) -> bool {
        self.current_epoch.load(Ordering::Acquire) != self.epoch
    }

    fn ensure_current(&self) -> Result<()> {
        if self.is_stale() {
            debug!(
                "discarding result for filter {:016x} (generation {})",
                self.fingerprint(),
                self.generation
            );
            Err(InsightError::StaleResultError)
        } else {
            Ok(())
        }
    }

    /// Row mask of this filter state, evaluated on first use
    pub fn mask(&self) -> Arc<RowMask> {
        Arc::clone(
            self.mask
                .get_or_init(|| Arc::new(self.filter.evaluate(&self.dataset))),
        )
    }

    pub fn profile(&self, column: &str) -> Result<Arc<ColumnProfile>> {
        self.ensure_current()?;
        let col = self.dataset.get_column(column)?;
        self.cache
            .profile(self.fingerprint(), self.generation, column, || {
                let profile = self.profiler.profile(col, &self.mask());
                self.ensure_current()?;
                Ok(profile)
            })
    }

    pub fn histogram(&self, column: &str) -> Result<Arc<Histogram>> {
        self.ensure_current()?;
        let col = self.dataset.get_column(column)?;
        self.cache
            .histogram(self.fingerprint(), self.generation, column, || {
                let histogram = self.profiler.histogram(col, &self.mask())?;
                self.ensure_current()?;
                Ok(histogram)
            })
    }

    /// Profile several columns in parallel; failures are per column
    pub fn profiles(&self, columns: &[&str]) -> Vec<(String, Result<Arc<ColumnProfile>>)> {
        // Evaluate the shared mask once, up front
        let _ = self.mask();
        columns
            .par_iter()
            .map(|&name| (name.to_string(), self.profile(name)))
            .collect()
    }
}

/// Active dataset plus the current filter state over it
struct View {
    dataset: Arc<Dataset>,
    filter: Arc<CompiledFilter>,
    mask: Arc<OnceLock<Arc<RowMask>>>,
}

impl View {
    fn new(dataset: Arc<Dataset>, filter: CompiledFilter) -> Self {
        Self {
            dataset,
            filter: Arc::new(filter),
            mask: Arc::new(OnceLock::new()),
        }
    }
}

/// Stateful facade over one uploaded dataset
pub struct Session {
    config: EngineConfig,
    engine: FilterEngine,
    profiler: Arc<Profiler>,
    cache: Arc<AggregationCache>,
    state: SessionState,
    view: Option<View>,
    filters: FilterSet,
    generation: u64,
    epoch: Arc<AtomicU64>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: FilterEngine::new(config.parallel_threshold),
            profiler: Arc::new(Profiler::new(config.profiler.clone())),
            cache: Arc::new(AggregationCache::new(&config.cache)),
            config,
            state: SessionState::Empty,
            view: None,
            filters: FilterSet::new(),
            generation: 0,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.view.as_ref().map(|v| v.dataset.as_ref())
    }

    /// Load name-keyed rows, inferring every column type
    pub fn load_dataset(&mut self, rows: &[RawRow]) -> Result<()> {
        self.load_dataset_with_types(rows, &HashMap::new())
    }

    pub fn load_dataset_with_types(
        &mut self,
        rows: &[RawRow],
        declared: &HashMap<String, SemanticType>,
    ) -> Result<()> {
        self.reset();
        let dataset = Dataset::load(rows, declared)?;
        self.install(dataset)
    }

    pub fn load_table(&mut self, table: RawTable) -> Result<()> {
        self.reset();
        let dataset = table.into_dataset()?;
        self.install(dataset)
    }

    fn install(&mut self, dataset: Dataset) -> Result<()> {
        let dataset = Arc::new(dataset);
        let filter = self.engine.compile(&dataset, &FilterSet::new())?;
        info!(
            "dataset loaded: {} rows x {} columns (generation {})",
            dataset.row_count(),
            dataset.column_count(),
            self.generation
        );
        self.view = Some(View::new(dataset, filter));
        self.state = SessionState::Loaded;
        self.advance_epoch();
        if self.config.warm_on_load {
            self.warm_profiles()?;
        }
        Ok(())
    }

    /// Profile every column under the current mask, populating the cache
    fn warm_profiles(&self) -> Result<()> {
        let context = self.context()?;
        let names = context.dataset().column_names();
        for (name, result) in context.profiles(&names) {
            if let Err(e) = result {
                debug!("warm-up profile for '{}' failed: {}", name, e);
            }
        }
        Ok(())
    }

    /// Drop the dataset and filters and start a new generation
    pub fn reset(&mut self) {
        self.view = None;
        self.filters = FilterSet::new();
        self.state = SessionState::Empty;
        self.generation += 1;
        self.cache.begin_generation(self.generation);
        self.advance_epoch();
        info!("session reset (generation {})", self.generation);
    }

    /// Replace the filter set.
    ///
    /// Every clause is validated first; on error the previous filters stay
    /// in effect.
    pub fn set_filters(&mut self, filters: FilterSet) -> Result<()> {
        let view = self.view.as_mut().ok_or(InsightError::NotReadyError)?;
        let compiled = self.engine.compile(&view.dataset, &filters)?;
        info!(
            "filters set: {} clause(s), fingerprint {:016x}",
            filters.len(),
            compiled.fingerprint()
        );
        *view = View::new(Arc::clone(&view.dataset), compiled);
        self.filters = filters;
        self.state = SessionState::Filtered;
        self.advance_epoch();
        Ok(())
    }

    /// Validate `clause` and append it to the current filters
    pub fn add_filter(&mut self, clause: FilterClause) -> Result<()> {
        let filters = self.filters.clone().with_clause(clause);
        self.set_filters(filters)
    }

    pub fn clear_filters(&mut self) -> Result<()> {
        self.set_filters(FilterSet::new())
    }

    fn advance_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Snapshot of the current state for background work
    pub fn context(&self) -> Result<QueryContext> {
        let view = self.view.as_ref().ok_or(InsightError::NotReadyError)?;
        Ok(QueryContext {
            dataset: Arc::clone(&view.dataset),
            filter: Arc::clone(&view.filter),
            mask: Arc::clone(&view.mask),
            generation: self.generation,
            epoch: self.epoch.load(Ordering::Acquire),
            current_epoch: Arc::clone(&self.epoch),
            profiler: Arc::clone(&self.profiler),
            cache: Arc::clone(&self.cache),
        })
    }

    pub fn mask(&self) -> Result<Arc<RowMask>> {
        Ok(self.context()?.mask())
    }

    pub fn get_profile(&self, column: &str) -> Result<Arc<ColumnProfile>> {
        self.context()?.profile(column)
    }

    pub fn get_histogram(&self, column: &str) -> Result<Arc<Histogram>> {
        self.context()?.histogram(column)
    }

    pub fn get_profiles(
        &self,
        columns: &[&str],
    ) -> Result<Vec<(String, Result<Arc<ColumnProfile>>)>> {
        Ok(self.context()?.profiles(columns))
    }

    pub fn summary(&self) -> Result<DatasetSummary> {
        self.dataset()
            .map(Dataset::summary)
            .ok_or(InsightError::NotReadyError)
    }

    /// First rows passing the current filters, in dataset order
    pub fn preview(&self, limit: Option<usize>) -> Result<Vec<Vec<RawValue>>> {
        let context = self.context()?;
        let limit = limit.unwrap_or(self.config.preview_limit);
        let mask = context.mask();
        Ok(mask
            .iter_selected()
            .take(limit)
            .map(|row| context.dataset().row(row))
            .collect())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn profiler_counters(&self) -> ProfilerCounters {
        self.profiler.counters()
    }
}
