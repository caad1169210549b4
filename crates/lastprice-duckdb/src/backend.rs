use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::schema::init_sql;

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// A DuckDB backend implementing every LastPrice store trait.
///
/// DuckDB is single-writer, so the connection sits behind `Arc<Mutex<_>>`.
/// Holding the lock for a whole trait call is what makes assignment,
/// metering and counter updates atomic with respect to readers.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Data is discarded on drop.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Cheap liveness probe used by `/health`.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        let one: i64 = conn.prepare("SELECT 1")?.query_row([], |row| row.get(0))?;
        anyhow::ensure!(one == 1, "unexpected ping result {one}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip_drops_sub_millisecond_precision() {
        let at = DateTime::from_timestamp(1_767_225_600, 123_456_789).unwrap_or_default();
        let back = from_millis(to_millis(at));
        assert_eq!(back.timestamp_millis(), at.timestamp_millis());
        assert_eq!(back.timestamp_subsec_nanos(), 123_000_000);
    }

    #[tokio::test]
    async fn in_memory_database_answers_ping() {
        let db = DuckDbBackend::open_in_memory().expect("open");
        db.ping().await.expect("ping");
    }

    #[tokio::test]
    async fn schema_creates_only_lastprice_tables() {
        let db = DuckDbBackend::open_in_memory().expect("open");
        let conn = db.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT table_name FROM information_schema.tables ORDER BY table_name")
            .expect("prepare");
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query")
            .collect::<std::result::Result<_, _>>()
            .expect("rows");
        assert_eq!(
            tables,
            vec![
                "experiment_assignments",
                "experiment_counters",
                "tenants",
                "usage_records",
            ]
        );
    }
}
