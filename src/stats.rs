//! Index statistics and health overview.
//!
//! Combines what the index service reports about the collection with the
//! sync ledger's per-status counts. Used by `cmdex stats` and `GET /stats`
//! to give confidence that syncs are landing.

use serde::Serialize;

use crate::error::Result;
use crate::index::{CollectionStats, IndexClient};
use crate::ledger::{LedgerCounts, SyncLedger};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    #[serde(flatten)]
    pub collection: CollectionStats,
    pub ledger: LedgerCounts,
}

pub async fn collect_stats(index: &dyn IndexClient, ledger: &SyncLedger) -> Result<StatsReport> {
    let collection = index.stats().await?;
    let ledger = ledger.status_counts().await?;
    Ok(StatsReport { collection, ledger })
}

/// Print a report the way `cmdex stats` shows it.
pub fn print_stats(report: &StatsReport, collection_name: &str) {
    let c = &report.collection;
    let l = &report.ledger;

    println!("cmdex index stats");
    println!("=================");
    println!();
    println!("  Collection:  {} ({})", collection_name, c.collection_status);
    println!("  Vectors:     {}", c.vector_count);
    println!("  Disk:        {}", display_usage(c.disk_usage));
    println!("  RAM:         {}", display_usage(c.ram_usage));
    println!();
    println!("  Sync records:");
    println!("  {:<10} {:>8}", "STATUS", "UNITS");
    println!("  {}", "-".repeat(19));
    println!("  {:<10} {:>8}", "indexed", l.indexed);
    println!("  {:<10} {:>8}", "embedded", l.embedded);
    println!("  {:<10} {:>8}", "pending", l.pending);
    println!("  {:<10} {:>8}", "failed", l.failed);
    println!("  {:<10} {:>8}", "total", l.total());

    let total = l.total();
    if total > 0 && c.vector_count != l.indexed {
        println!();
        println!(
            "  note: index holds {} vectors but the ledger has {} indexed units",
            c.vector_count, l.indexed
        );
    }
    println!();
}

fn display_usage(bytes: Option<u64>) -> String {
    match bytes {
        Some(b) => format_bytes(b),
        None => "n/a".to_string(),
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
