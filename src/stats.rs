//! Index statistics.
//!
//! Used by `rqh stats` to confirm that a catalog has been indexed and with
//! which embedding dimensionality.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(&pool)
        .await?;

    let with_documents: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE documents_json != '{}'")
            .fetch_one(&pool)
            .await?;

    let last_updated: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM projects")
        .fetch_one(&pool)
        .await?;

    let dims_rows = sqlx::query("SELECT dims, COUNT(*) AS n FROM projects GROUP BY dims ORDER BY n DESC")
        .fetch_all(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("projects: {}", total);
    println!("  database: {}", config.db.path.display());
    println!("  size: {}", format_bytes(db_size));
    println!("  with documents: {}", with_documents);
    for row in &dims_rows {
        let dims: i64 = row.get("dims");
        let n: i64 = row.get("n");
        println!("  dims {}: {}", dims, n);
    }
    println!(
        "  last indexed: {}",
        last_updated.map(format_ts_iso).unwrap_or_else(|| "never".to_string())
    );

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
