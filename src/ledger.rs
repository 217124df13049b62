//! Persistent per-unit sync state (`sync_records` table).
//!
//! The ledger remembers, for every unit the synchronizer has produced,
//! the fingerprint it was last synced with and how far that sync got.
//! Only the synchronizer writes it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{CmdexError, Result};
use crate::models::{EntityType, SyncRecord, SyncStatus};

/// Record counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerCounts {
    pub pending: u64,
    pub embedded: u64,
    pub indexed: u64,
    pub failed: u64,
}

impl LedgerCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.embedded + self.indexed + self.failed
    }
}

#[derive(Clone)]
pub struct SyncLedger {
    pool: SqlitePool,
}

fn record_from_row(row: &SqliteRow) -> Result<SyncRecord> {
    let entity_type: String = row.get("entity_type");
    let status: String = row.get("status");
    let ts: i64 = row.get("last_synced_at");
    Ok(SyncRecord {
        unit_id: row.get("unit_id"),
        entity_type: entity_type
            .parse::<EntityType>()
            .map_err(|e| CmdexError::Other(anyhow::anyhow!(e)))?,
        entity_key: row.get("entity_key"),
        parent_key: row.get("parent_key"),
        chunk_index: row.get::<i64, _>("chunk_index") as u32,
        chunk_total: row.get::<i64, _>("chunk_total") as u32,
        last_hash: row.get("last_hash"),
        last_synced_at: DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default(),
        status: status
            .parse::<SyncStatus>()
            .map_err(|e| CmdexError::Other(anyhow::anyhow!(e)))?,
        error_message: row.get("error_message"),
    })
}

impl SyncLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Every record, keyed by unit id.
    pub async fn load_all(&self) -> Result<HashMap<String, SyncRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT unit_id, entity_type, entity_key, parent_key, chunk_index, chunk_total,
                   last_hash, last_synced_at, status, error_message
            FROM sync_records
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| record_from_row(row).map(|r| (r.unit_id.clone(), r)))
            .collect()
    }

    pub async fn get(&self, unit_id: &str) -> Result<Option<SyncRecord>> {
        let row = sqlx::query(
            r#"
            SELECT unit_id, entity_type, entity_key, parent_key, chunk_index, chunk_total,
                   last_hash, last_synced_at, status, error_message
            FROM sync_records
            WHERE unit_id = ?
            "#,
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Insert or fully replace records, in one transaction.
    pub async fn upsert_many(&self, records: &[SyncRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO sync_records (unit_id, entity_type, entity_key, parent_key,
                                          chunk_index, chunk_total, last_hash,
                                          last_synced_at, status, error_message)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(unit_id) DO UPDATE SET
                    entity_type = excluded.entity_type,
                    entity_key = excluded.entity_key,
                    parent_key = excluded.parent_key,
                    chunk_index = excluded.chunk_index,
                    chunk_total = excluded.chunk_total,
                    last_hash = excluded.last_hash,
                    last_synced_at = excluded.last_synced_at,
                    status = excluded.status,
                    error_message = excluded.error_message
                "#,
            )
            .bind(&r.unit_id)
            .bind(r.entity_type.as_str())
            .bind(&r.entity_key)
            .bind(&r.parent_key)
            .bind(r.chunk_index as i64)
            .bind(r.chunk_total as i64)
            .bind(&r.last_hash)
            .bind(r.last_synced_at.timestamp())
            .bind(r.status.as_str())
            .bind(&r.error_message)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Move existing records to `status`, replacing their error message.
    pub async fn set_status(
        &self,
        unit_ids: &[String],
        status: SyncStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        if unit_ids.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for id in unit_ids {
            sqlx::query(
                "UPDATE sync_records SET status = ?, error_message = ?, last_synced_at = ? WHERE unit_id = ?",
            )
            .bind(status.as_str())
            .bind(error_message)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove_many(&self, unit_ids: &[String]) -> Result<()> {
        if unit_ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in unit_ids {
            sqlx::query("DELETE FROM sync_records WHERE unit_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM sync_records")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn status_counts(&self) -> Result<LedgerCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM sync_records GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = LedgerCounts::default();
        for row in &rows {
            let status: String = row.get("status");
            let n = row.get::<i64, _>("n") as u64;
            match status.parse::<SyncStatus>() {
                Ok(SyncStatus::Pending) => counts.pending = n,
                Ok(SyncStatus::Embedded) => counts.embedded = n,
                Ok(SyncStatus::Indexed) => counts.indexed = n,
                Ok(SyncStatus::Failed) => counts.failed = n,
                Err(_) => {}
            }
        }
        Ok(counts)
    }

    /// Failed records with their messages, most recent first.
    pub async fn failures(&self, limit: usize) -> Result<Vec<SyncRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT unit_id, entity_type, entity_key, parent_key, chunk_index, chunk_total,
                   last_hash, last_synced_at, status, error_message
            FROM sync_records
            WHERE status = 'failed'
            ORDER BY last_synced_at DESC, unit_id
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn ledger() -> (tempfile::TempDir, SyncLedger) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("ledger.sqlite"))
            .await
            .unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        (tmp, SyncLedger::new(pool))
    }

    fn record(id: &str, status: SyncStatus) -> SyncRecord {
        SyncRecord {
            unit_id: id.to_string(),
            entity_type: EntityType::Command,
            entity_key: format!("v3/{}", id),
            parent_key: format!("v3/{}", id),
            chunk_index: 0,
            chunk_total: 1,
            last_hash: "abc".to_string(),
            last_synced_at: Utc::now(),
            status,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_load() {
        let (_tmp, ledger) = ledger().await;
        ledger
            .upsert_many(&[record("a", SyncStatus::Pending), record("b", SyncStatus::Indexed)])
            .await
            .unwrap();
        let all = ledger.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["b"].status, SyncStatus::Indexed);
        assert_eq!(all["a"].entity_type, EntityType::Command);

        let mut changed = record("a", SyncStatus::Indexed);
        changed.last_hash = "def".into();
        ledger.upsert_many(&[changed]).await.unwrap();
        let a = ledger.get("a").await.unwrap().unwrap();
        assert_eq!(a.last_hash, "def");
        assert_eq!(a.status, SyncStatus::Indexed);
    }

    #[tokio::test]
    async fn test_set_status_records_errors() {
        let (_tmp, ledger) = ledger().await;
        ledger
            .upsert_many(&[record("a", SyncStatus::Pending)])
            .await
            .unwrap();
        ledger
            .set_status(&["a".to_string()], SyncStatus::Failed, Some("timeout"))
            .await
            .unwrap();
        let failures = ledger.failures(10).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_message.as_deref(), Some("timeout"));

        ledger
            .set_status(&["a".to_string()], SyncStatus::Indexed, None)
            .await
            .unwrap();
        assert!(ledger.get("a").await.unwrap().unwrap().error_message.is_none());
    }

    #[tokio::test]
    async fn test_counts_remove_and_clear() {
        let (_tmp, ledger) = ledger().await;
        ledger
            .upsert_many(&[
                record("a", SyncStatus::Indexed),
                record("b", SyncStatus::Indexed),
                record("c", SyncStatus::Failed),
            ])
            .await
            .unwrap();
        let counts = ledger.status_counts().await.unwrap();
        assert_eq!(counts.indexed, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 3);

        ledger.remove_many(&["a".to_string()]).await.unwrap();
        assert_eq!(ledger.load_all().await.unwrap().len(), 2);

        ledger.clear().await.unwrap();
        assert_eq!(ledger.status_counts().await.unwrap(), LedgerCounts::default());
    }
}
