//! Medication reference set: validation and autocomplete.
//!
//! The reference list is fetched lazily from an opaque source the first time
//! a filterable term is seen, and ingested in chunks with cooperative yields
//! so a large list never blocks the UI thread.

mod suggest;

pub use suggest::{Suggestions, SUGGESTION_LIMIT};

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Entries ingested per batch.
const INGEST_BATCH: usize = 100;

/// Yield to the runtime after this many batches.
const BATCHES_PER_YIELD: usize = 10;

/// Length of each cooperative yield.
const INGEST_YIELD: Duration = Duration::from_millis(10);

/// Minimum term length before filtering (and lazy loading) kicks in.
pub const MIN_TERM_LEN: usize = 2;

/// One medication reference entry, with English and Spanish names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationEntry {
    pub name: String,
    #[serde(default)]
    pub name_es: String,
}

impl MedicationEntry {
    pub fn new(name: impl Into<String>, name_es: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            name_es: name_es.into(),
        }
    }

    /// Exact case-insensitive match against either language field.
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.name_es.eq_ignore_ascii_case(name)
    }
}

/// Errors from an external lookup source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("lookup failed: {0}")]
    Lookup(String),
}

/// Opaque provider of the full medication reference list.
pub trait MedicationSource: Send + Sync {
    fn fetch_all(&self) -> Result<Vec<MedicationEntry>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadPhase {
    NotLoaded,
    Loading,
    Ready,
}

struct IndexState {
    phase: LoadPhase,
    entries: Vec<MedicationEntry>,
}

/// Lazily loaded, shareable medication reference index.
pub struct ReferenceIndex {
    source: Arc<dyn MedicationSource>,
    state: Arc<RwLock<IndexState>>,
}

impl ReferenceIndex {
    pub fn new(source: Arc<dyn MedicationSource>) -> Self {
        Self {
            source,
            state: Arc::new(RwLock::new(IndexState {
                phase: LoadPhase::NotLoaded,
                entries: Vec::new(),
            })),
        }
    }

    /// An index that starts out ready with the given entries, skipping the
    /// lazy fetch. Useful when the list is already on hand.
    pub fn preloaded(entries: Vec<MedicationEntry>) -> Self {
        struct Empty;
        impl MedicationSource for Empty {
            fn fetch_all(&self) -> Result<Vec<MedicationEntry>, SourceError> {
                Ok(Vec::new())
            }
        }
        Self {
            source: Arc::new(Empty),
            state: Arc::new(RwLock::new(IndexState {
                phase: LoadPhase::Ready,
                entries,
            })),
        }
    }

    /// Validate a medication name against the reference set.
    ///
    /// Empty or whitespace input is never valid. When the set is empty or
    /// not yet loaded, validation fails open and accepts anything.
    pub fn is_valid(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let state = match self.state.read() {
            Ok(state) => state,
            Err(_) => return true,
        };
        if state.phase != LoadPhase::Ready || state.entries.is_empty() {
            return true;
        }
        state.entries.iter().any(|entry| entry.matches(name))
    }

    /// Autocomplete against the reference set.
    ///
    /// Terms under [`MIN_TERM_LEN`] characters yield nothing. The first
    /// filterable term triggers the background load; until it completes the
    /// caller gets [`Suggestions::Loading`] to render a placeholder row.
    ///
    /// Must be called from within a tokio runtime (the load task is spawned
    /// on it).
    pub fn filter(&self, term: &str) -> Suggestions {
        let term = term.trim();
        if term.chars().count() < MIN_TERM_LEN {
            return Suggestions::Ready(Vec::new());
        }

        {
            let state = match self.state.read() {
                Ok(state) => state,
                Err(_) => return Suggestions::Ready(Vec::new()),
            };
            match state.phase {
                LoadPhase::Ready => {
                    return Suggestions::Ready(suggest::rank_matches(&state.entries, term))
                }
                LoadPhase::Loading => return Suggestions::Loading,
                LoadPhase::NotLoaded => {}
            }
        }

        self.trigger_load();
        Suggestions::Loading
    }

    /// Whether the reference set has finished loading.
    pub fn is_ready(&self) -> bool {
        self.state
            .read()
            .map(|state| state.phase == LoadPhase::Ready)
            .unwrap_or(false)
    }

    /// Kick off the background fetch + chunked ingest, once.
    fn trigger_load(&self) {
        {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return,
            };
            if state.phase != LoadPhase::NotLoaded {
                return;
            }
            state.phase = LoadPhase::Loading;
        }

        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.state);
        tokio::spawn(async move {
            let fetched = tokio::task::spawn_blocking(move || source.fetch_all()).await;
            match fetched {
                Ok(Ok(rows)) => {
                    tracing::info!(count = rows.len(), "medication reference fetched");
                    ingest(&shared, rows).await;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "medication reference fetch failed");
                    reset_phase(&shared);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "medication reference fetch task failed");
                    reset_phase(&shared);
                }
            }
        });
    }
}

/// Ingest fetched rows in batches, yielding periodically so the runtime's
/// UI-facing tasks keep getting scheduled.
async fn ingest(shared: &Arc<RwLock<IndexState>>, rows: Vec<MedicationEntry>) {
    for (batch_index, batch) in rows.chunks(INGEST_BATCH).enumerate() {
        if let Ok(mut state) = shared.write() {
            state.entries.extend_from_slice(batch);
        }
        if (batch_index + 1) % BATCHES_PER_YIELD == 0 {
            tokio::time::sleep(INGEST_YIELD).await;
        }
    }
    if let Ok(mut state) = shared.write() {
        state.phase = LoadPhase::Ready;
    }
}

fn reset_phase(shared: &Arc<RwLock<IndexState>>) {
    if let Ok(mut state) = shared.write() {
        state.phase = LoadPhase::NotLoaded;
    }
}
