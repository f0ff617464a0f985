//! Storage for finished scripts, keyed by result id.
//!
//! [`ResultStore`] is the seam: the pipeline only calls `put` and `get`.
//! [`InMemoryResultStore`] keeps everything for the life of the process;
//! a store with expiry can be dropped in without touching the pipeline.

use crate::error::ScriptError;
use crate::output::GenerationResult;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Concurrent id → result map.
pub trait ResultStore: Send + Sync {
    /// Store a result under its own id and return that id.
    fn put(&self, result: Arc<GenerationResult>) -> Uuid;

    /// Look a result up by id.
    fn get(&self, id: &Uuid) -> Result<Arc<GenerationResult>, ScriptError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-lifetime store behind a `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: RwLock<HashMap<Uuid, Arc<GenerationResult>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for InMemoryResultStore {
    fn put(&self, result: Arc<GenerationResult>) -> Uuid {
        let id = result.id;
        // Single insert per write guard: a poisoned map is still consistent.
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, result);
        id
    }

    fn get(&self, id: &Uuid) -> Result<Arc<GenerationResult>, ScriptError> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| ScriptError::ResultNotFound { id: id.to_string() })
    }

    fn len(&self) -> usize {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
