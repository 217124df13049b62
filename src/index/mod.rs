//! Vector/keyword index abstraction.
//!
//! The [`IndexClient`] trait is the only way the synchronizer and the query
//! engine reach the index. Each client is bound to one collection at
//! construction. Points carry a dense vector, the unit's weighted keyword
//! terms and its [`UnitPayload`].
//!
//! Backends:
//! - [`QdrantIndex`]: Qdrant REST API, named dense vector `dense` plus
//!   sparse vector `text`
//! - [`MemoryIndex`]: in-process brute force, for tests and local runs
//!
//! # Operations
//!
//! | Method | Mutates | Purpose |
//! |--------|---------|---------|
//! | [`ensure_collection`](IndexClient::ensure_collection) | yes | Create if missing, verify dimensionality |
//! | [`upsert`](IndexClient::upsert) | yes | Idempotent overwrite by id |
//! | [`delete_by_filter`](IndexClient::delete_by_filter) | yes | Remove matching points |
//! | [`reset_collection`](IndexClient::reset_collection) | yes | Drop and recreate |
//! | [`search`](IndexClient::search) | no | Dense cosine search |
//! | [`keyword_search`](IndexClient::keyword_search) | no | Sparse term search |
//! | [`stats`](IndexClient::stats) | no | Point count and status |
//!
//! Mutating calls require a [`WriteToken`], obtainable only from the
//! [`WriteLock`], so at most one writer touches the index at a time.

pub mod memory;
pub mod qdrant;

pub use memory::MemoryIndex;
pub use qdrant::QdrantIndex;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::IndexConfig;
use crate::error::{CmdexError, Result};
use crate::models::{CommandKey, EntityType, UnitPayload, Version};
use crate::retry::RetryPolicy;
use crate::sparse::SparseTerms;

/// A point to be written to the index.
#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub sparse: SparseTerms,
    pub payload: UnitPayload,
}

/// A search hit with the backend's raw score.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f64,
    pub payload: UnitPayload,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub vector_count: u64,
    pub collection_status: String,
    pub disk_usage: Option<u64>,
    pub ram_usage: Option<u64>,
}

/// Payload filter shared by search and delete.
///
/// - `version`: units of that version, plus version-agnostic doc chunks
/// - `include_deprecated = false`: drops units flagged deprecated
/// - `entity_types`: restricts to those types
/// - `command`: the command and its parameter and example units
/// - `ids`: exactly these point ids
#[derive(Debug, Clone, PartialEq)]
pub struct IndexFilter {
    pub version: Option<Version>,
    pub include_deprecated: bool,
    pub entity_types: Option<Vec<EntityType>>,
    pub command: Option<CommandKey>,
    pub ids: Option<Vec<String>>,
}

impl Default for IndexFilter {
    fn default() -> Self {
        Self {
            version: None,
            include_deprecated: true,
            entity_types: None,
            command: None,
            ids: None,
        }
    }
}

impl IndexFilter {
    pub fn for_command(key: CommandKey) -> Self {
        Self {
            command: Some(key),
            ..Self::default()
        }
    }

    pub fn for_ids(ids: Vec<String>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    /// True when the filter would match every point.
    pub fn is_unrestricted(&self) -> bool {
        self.version.is_none()
            && self.include_deprecated
            && self.entity_types.is_none()
            && self.command.is_none()
            && self.ids.is_none()
    }

    pub fn matches(&self, id: &str, payload: &UnitPayload) -> bool {
        if let Some(version) = self.version {
            if payload.version().is_some_and(|v| v != version) {
                return false;
            }
        }
        if !self.include_deprecated && payload.is_deprecated() {
            return false;
        }
        if let Some(types) = &self.entity_types {
            if !types.contains(&payload.entity_type()) {
                return false;
            }
        }
        if let Some(key) = self.command {
            if payload.command_key() != Some(key) {
                return false;
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|i| i == id) {
                return false;
            }
        }
        true
    }
}

/// Exclusive right to mutate the index. Dropping it releases the lock.
pub struct WriteToken {
    held: Arc<AtomicBool>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for WriteToken {
    fn drop(&mut self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

/// Single-writer lock handing out [`WriteToken`]s.
#[derive(Clone, Default)]
pub struct WriteLock {
    inner: Arc<Mutex<()>>,
    held: Arc<AtomicBool>,
}

impl WriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock without waiting; fails if a writer already holds it.
    pub fn try_acquire(&self) -> Result<WriteToken> {
        let guard = self
            .inner
            .clone()
            .try_lock_owned()
            .map_err(|_| CmdexError::SyncAlreadyRunning)?;
        self.held.store(true, Ordering::SeqCst);
        Ok(WriteToken {
            held: self.held.clone(),
            _guard: guard,
        })
    }

    /// Whether a token is outstanding. Never touches the mutex.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Create the collection if missing and verify its dense dimensionality.
    /// Returns true when this call created it.
    async fn ensure_collection(&self, token: &WriteToken) -> Result<bool>;

    /// Insert or overwrite points by id.
    async fn upsert(&self, token: &WriteToken, points: &[IndexPoint]) -> Result<()>;

    /// Remove every point matching the filter. An unrestricted filter is
    /// rejected; use [`reset_collection`](IndexClient::reset_collection).
    async fn delete_by_filter(&self, token: &WriteToken, filter: &IndexFilter) -> Result<()>;

    /// Dense cosine search, best first.
    async fn search(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>>;

    /// Sparse keyword search, best first. Points with no matching term are
    /// not returned.
    async fn keyword_search(
        &self,
        terms: &SparseTerms,
        filter: &IndexFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>>;

    /// Drop the collection and create it empty.
    async fn reset_collection(&self, token: &WriteToken) -> Result<()>;

    async fn stats(&self) -> Result<CollectionStats>;
}

/// Build the configured index backend.
pub fn create_index(
    config: &IndexConfig,
    dims: usize,
    retry: RetryPolicy,
) -> Result<Arc<dyn IndexClient>> {
    match config.backend.as_str() {
        "qdrant" => Ok(Arc::new(QdrantIndex::new(config, dims, retry)?)),
        "memory" => Ok(Arc::new(MemoryIndex::new(dims))),
        other => Err(CmdexError::PermanentConfig(format!(
            "unknown index backend: {}",
            other
        ))),
    }
}

pub(crate) fn reject_unrestricted(filter: &IndexFilter) -> Result<()> {
    if filter.is_unrestricted() {
        return Err(CmdexError::PermanentConfig(
            "refusing to delete with an unrestricted filter".into(),
        ));
    }
    Ok(())
}
