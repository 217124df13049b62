//! Index synchronization.
//!
//! A sync run reads every command, parameter, example and documentation
//! section from the [`SourceStore`], turns them into [`IndexableUnit`]s,
//! and brings the index in line with them:
//!
//! 1. **Prepare**: reset mode drops the collection and clears the ledger;
//!    otherwise the collection is created if missing. A collection that
//!    was just created, or is empty while the ledger has indexed units,
//!    clears the ledger too.
//! 2. **Scanning**: build units, fingerprint them and diff against the
//!    ledger. A unit is changed when it has no record, a different hash, or
//!    a record that never reached `indexed`. Changed units are recorded
//!    `pending`.
//! 3. **Processing**: changed units go through embed → upsert in batches,
//!    several batches in flight. A transient failure marks its batch
//!    `failed` and the run continues; a configuration failure aborts it.
//! 4. **Finalizing**: units the ledger knows but the source no longer
//!    produces are deleted from the index and the ledger. Deleted commands
//!    take their parameters and examples with them.
//!
//! Only one run can be active; a second trigger gets
//! [`CmdexError::SyncAlreadyRunning`]. A run can be cancelled between
//! batches; work already upserted stays indexed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{CmdexError, Result};
use crate::index::{IndexClient, IndexFilter, IndexPoint, WriteLock, WriteToken};
use crate::ledger::SyncLedger;
use crate::mapper::VersionMapper;
use crate::models::{
    Command, CommandKey, EntityType, IndexableUnit, MappedCommand, SyncRecord, SyncStatus, Version,
};
use crate::source::{Page, SourceStore};
use crate::units;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Scanning,
    Processing,
    Finalizing,
    Complete,
    Failed,
    Cancelled,
}

/// Terminal status of a run that returned a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Complete => "complete",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub scanned: u64,
    pub embedded: u64,
    pub upserted: u64,
    pub failed: u64,
    pub deleted: u64,
    pub status: RunStatus,
}

impl SyncSummary {
    fn empty() -> Self {
        Self {
            scanned: 0,
            embedded: 0,
            upserted: 0,
            failed: 0,
            deleted: 0,
            status: RunStatus::Complete,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Drop the collection and the ledger first; every unit is new.
    pub reset: bool,
}

/// Snapshot of the synchronizer for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    pub phase: RunPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_summary: Option<SyncSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub workers: usize,
    pub page_size: usize,
    pub max_chars: usize,
    pub overlap_headers: bool,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.embedding.batch_size.max(1),
            workers: config.sync.workers.max(1),
            page_size: config.sync.page_size.max(1),
            max_chars: config.chunking.max_chars,
            overlap_headers: config.chunking.overlap_headers,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            workers: 4,
            page_size: 500,
            max_chars: 1500,
            overlap_headers: true,
        }
    }
}

struct RunState {
    phase: RunPhase,
    run_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    last_summary: Option<SyncSummary>,
    last_error: Option<String>,
}

#[derive(Default)]
struct BatchOutcome {
    embedded: u64,
    upserted: u64,
    failed: u64,
    skipped: bool,
}

pub struct Synchronizer {
    source: Arc<dyn SourceStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn IndexClient>,
    ledger: SyncLedger,
    settings: SyncSettings,
    lock: WriteLock,
    cancel: CancelToken,
    state: RwLock<RunState>,
}

impl Synchronizer {
    pub fn new(
        source: Arc<dyn SourceStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn IndexClient>,
        ledger: SyncLedger,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            embedder,
            index,
            ledger,
            settings,
            lock: WriteLock::new(),
            cancel: CancelToken::new(),
            state: RwLock::new(RunState {
                phase: RunPhase::Idle,
                run_id: None,
                started_at: None,
                last_summary: None,
                last_error: None,
            }),
        }
    }

    /// Share an externally created cancellation token.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Share a write lock with other index writers.
    pub fn with_write_lock(mut self, lock: WriteLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    pub fn is_running(&self) -> bool {
        self.lock.is_held()
    }

    /// Request cancellation of the active run. Returns false when idle.
    pub fn cancel(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        info!("sync cancellation requested");
        self.cancel.cancel();
        true
    }

    pub async fn status(&self) -> SyncStatusReport {
        let state = self.state.read().await;
        SyncStatusReport {
            phase: state.phase,
            run_id: state.run_id.clone(),
            started_at: state.started_at,
            last_summary: state.last_summary.clone(),
            last_error: state.last_error.clone(),
        }
    }

    async fn set_phase(&self, phase: RunPhase) {
        self.state.write().await.phase = phase;
    }

    /// Run one sync pass. Fails fast with `SyncAlreadyRunning` if another
    /// run holds the write lock.
    pub async fn run(&self, options: SyncOptions) -> Result<SyncSummary> {
        let token = self.lock.try_acquire()?;

        let run_id = Uuid::new_v4().to_string();
        {
            let mut state = self.state.write().await;
            state.phase = RunPhase::Scanning;
            state.run_id = Some(run_id.clone());
            state.started_at = Some(Utc::now());
            state.last_error = None;
        }
        info!(run_id = %run_id, reset = options.reset, "sync started");

        let result = self.run_locked(&token, options).await;

        let mut state = self.state.write().await;
        match &result {
            Ok(summary) => {
                state.phase = match summary.status {
                    RunStatus::Complete => RunPhase::Complete,
                    RunStatus::Failed => RunPhase::Failed,
                    RunStatus::Cancelled => RunPhase::Cancelled,
                };
                state.last_summary = Some(summary.clone());
                info!(
                    run_id = %run_id,
                    scanned = summary.scanned,
                    embedded = summary.embedded,
                    upserted = summary.upserted,
                    failed = summary.failed,
                    deleted = summary.deleted,
                    status = summary.status.as_str(),
                    "sync finished"
                );
            }
            Err(e) => {
                state.phase = RunPhase::Failed;
                state.last_error = Some(e.to_string());
                error!(run_id = %run_id, error = %e, "sync failed");
            }
        }
        drop(state);
        drop(token);
        // Cleared only once the run is over, so a request that raced the
        // start of this run still cancels it.
        self.cancel.reset();
        result
    }

    async fn run_locked(&self, token: &WriteToken, options: SyncOptions) -> Result<SyncSummary> {
        if options.reset {
            self.index.reset_collection(token).await?;
            self.ledger.clear().await?;
        } else {
            let created = self.index.ensure_collection(token).await?;
            if self.index_lost(created).await? {
                warn!(
                    created,
                    "index holds none of the units the ledger marks indexed; re-indexing everything"
                );
                self.ledger.clear().await?;
            }
        }

        // Scanning
        self.set_phase(RunPhase::Scanning).await;
        let produced = self.scan().await?;
        let records = self.ledger.load_all().await?;

        let changed: Vec<&IndexableUnit> = produced
            .iter()
            .filter(|u| match records.get(&u.id) {
                None => true,
                Some(r) => r.last_hash != u.content_hash || r.status != SyncStatus::Indexed,
            })
            .collect();
        let pending: Vec<SyncRecord> = changed
            .iter()
            .map(|u| SyncRecord::for_unit(u, SyncStatus::Pending))
            .collect();
        self.ledger.upsert_many(&pending).await?;

        let mut summary = SyncSummary::empty();
        summary.scanned = produced.len() as u64;
        info!(
            scanned = produced.len(),
            changed = changed.len(),
            "scan complete"
        );

        // Processing
        self.set_phase(RunPhase::Processing).await;
        let abort = AtomicBool::new(false);
        // Futures are lazy; buffer_unordered bounds how many run at once.
        let batches: Vec<_> = changed
            .chunks(self.settings.batch_size)
            .map(|batch| self.process_batch(token, batch, &abort))
            .collect();
        let outcomes: Vec<Result<BatchOutcome>> = stream::iter(batches)
            .buffer_unordered(self.settings.workers)
            .collect()
            .await;

        let mut fatal = None;
        let mut skipped = false;
        for outcome in outcomes {
            match outcome {
                Ok(o) => {
                    summary.embedded += o.embedded;
                    summary.upserted += o.upserted;
                    summary.failed += o.failed;
                    skipped |= o.skipped;
                }
                Err(e) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }
        if skipped || self.cancel.is_cancelled() {
            summary.status = RunStatus::Cancelled;
            return Ok(summary);
        }

        // Finalizing
        self.set_phase(RunPhase::Finalizing).await;
        let produced_ids: HashSet<&str> = produced.iter().map(|u| u.id.as_str()).collect();
        let stale: Vec<&SyncRecord> = records
            .values()
            .filter(|r| !produced_ids.contains(r.unit_id.as_str()))
            .collect();
        summary.deleted = self.remove_stale(token, &stale).await?;

        Ok(summary)
    }

    /// True when the ledger claims indexed units the index no longer has:
    /// the collection was just created, or it is empty.
    async fn index_lost(&self, created: bool) -> Result<bool> {
        let counts = self.ledger.status_counts().await?;
        if counts.indexed == 0 {
            return Ok(false);
        }
        if created {
            return Ok(true);
        }
        Ok(self.index.stats().await?.vector_count == 0)
    }

    /// Build every unit the source currently describes.
    async fn scan(&self) -> Result<Vec<IndexableUnit>> {
        let mapper = VersionMapper::from_mappings(&self.source.list_version_mappings().await?);

        let mut commands: Vec<Command> = Vec::new();
        for version in Version::ALL {
            let mut page = Page::first(self.settings.page_size);
            loop {
                let rows = self.source.list_commands(version, page).await?;
                let done = rows.len() < page.limit;
                commands.extend(rows);
                if done {
                    break;
                }
                page = page.next();
            }
        }
        let names: HashMap<CommandKey, &str> =
            commands.iter().map(|c| (c.key(), c.name.as_str())).collect();
        debug!(commands = commands.len(), mappings = mapper.len(), "loaded commands");

        let mut out = Vec::new();
        for command in &commands {
            let mapped = mapper.equivalent_of(command.key()).and_then(|k| {
                names.get(&k).map(|name| MappedCommand {
                    command_id: k.id,
                    version: k.version,
                    name: name.to_string(),
                })
            });
            out.push(units::command_unit(command, mapped.clone()));
            for p in self.source.list_parameters(command.key()).await? {
                out.push(units::parameter_unit(command, &p, mapped.clone()));
            }
            for e in self.source.list_examples(command.key()).await? {
                out.push(units::example_unit(command, &e, mapped.clone()));
            }
        }

        let mut page = Page::first(self.settings.page_size);
        loop {
            let sections = self.source.list_doc_sections(page).await?;
            let done = sections.len() < page.limit;
            for section in &sections {
                out.extend(units::doc_units(
                    section,
                    self.settings.max_chars,
                    self.settings.overlap_headers,
                ));
            }
            if done {
                break;
            }
            page = page.next();
        }

        // Each id must occur once per run.
        let mut seen = HashSet::new();
        out.retain(|u| {
            let fresh = seen.insert(u.id.clone());
            if !fresh {
                warn!(entity_key = %u.entity_key, "duplicate unit skipped");
            }
            fresh
        });
        Ok(out)
    }

    async fn process_batch(
        &self,
        token: &WriteToken,
        batch: &[&IndexableUnit],
        abort: &AtomicBool,
    ) -> Result<BatchOutcome> {
        if self.cancel.is_cancelled() || abort.load(Ordering::SeqCst) {
            return Ok(BatchOutcome {
                skipped: true,
                ..BatchOutcome::default()
            });
        }

        let ids: Vec<String> = batch.iter().map(|u| u.id.clone()).collect();
        let texts: Vec<String> = batch.iter().map(|u| u.text.clone()).collect();
        debug!(count = batch.len(), "processing batch");

        let vectors = match self.embedder.embed_batch(&texts).await {
            Ok(v) => v,
            Err(e) => return self.fail_batch(&ids, e, abort, 0).await,
        };
        self.ledger
            .set_status(&ids, SyncStatus::Embedded, None)
            .await?;

        let points: Vec<IndexPoint> = batch
            .iter()
            .zip(vectors)
            .map(|(u, vector)| IndexPoint {
                id: u.id.clone(),
                vector,
                sparse: u.sparse.clone(),
                payload: u.payload.clone(),
            })
            .collect();
        let embedded = points.len() as u64;

        if let Err(e) = self.index.upsert(token, &points).await {
            return self.fail_batch(&ids, e, abort, embedded).await;
        }
        self.ledger
            .set_status(&ids, SyncStatus::Indexed, None)
            .await?;

        Ok(BatchOutcome {
            embedded,
            upserted: embedded,
            ..BatchOutcome::default()
        })
    }

    /// Record a batch failure. Configuration errors abort the run.
    async fn fail_batch(
        &self,
        ids: &[String],
        err: CmdexError,
        abort: &AtomicBool,
        embedded: u64,
    ) -> Result<BatchOutcome> {
        let message = err.to_string();
        self.ledger
            .set_status(ids, SyncStatus::Failed, Some(&message))
            .await?;

        if matches!(err, CmdexError::PermanentConfig(_)) {
            abort.store(true, Ordering::SeqCst);
            return Err(err);
        }
        warn!(count = ids.len(), error = %message, "batch failed");
        for item in item_failures(ids, &message) {
            debug!(error = %item, "unit left for the next pass");
        }
        Ok(BatchOutcome {
            embedded,
            failed: ids.len() as u64,
            ..BatchOutcome::default()
        })
    }

    /// Delete units the source no longer produces. Returns how many.
    async fn remove_stale(&self, token: &WriteToken, stale: &[&SyncRecord]) -> Result<u64> {
        if stale.is_empty() {
            return Ok(0);
        }

        let mut deleted_commands: HashSet<String> = HashSet::new();
        for r in stale.iter().filter(|r| r.entity_type == EntityType::Command) {
            match r.entity_key.parse::<CommandKey>() {
                Ok(key) => {
                    self.index
                        .delete_by_filter(token, &IndexFilter::for_command(key))
                        .await?;
                    deleted_commands.insert(r.entity_key.clone());
                }
                Err(e) => warn!(entity_key = %r.entity_key, error = %e, "unparseable command key"),
            }
        }

        let remaining: Vec<String> = stale
            .iter()
            .filter(|r| match r.entity_type {
                EntityType::Command => !deleted_commands.contains(&r.entity_key),
                EntityType::Parameter | EntityType::Example => {
                    !deleted_commands.contains(&r.parent_key)
                }
                EntityType::DocChunk => true,
            })
            .map(|r| r.unit_id.clone())
            .collect();
        if !remaining.is_empty() {
            self.index
                .delete_by_filter(token, &IndexFilter::for_ids(remaining))
                .await?;
        }

        let ids: Vec<String> = stale.iter().map(|r| r.unit_id.clone()).collect();
        self.ledger.remove_many(&ids).await?;
        info!(
            deleted = ids.len(),
            commands = deleted_commands.len(),
            "removed stale units"
        );
        Ok(ids.len() as u64)
    }
}

/// One [`CmdexError::PartialItem`] per unit of a failed batch.
fn item_failures(ids: &[String], message: &str) -> Vec<CmdexError> {
    ids.iter()
        .map(|id| CmdexError::PartialItem {
            unit_id: id.clone(),
            message: message.to_string(),
        })
        .collect()
}
