use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use duckdb::Connection;

use lastprice_core::assign::Variant;
use lastprice_core::experiment::{Assignment, ExperimentCounters, ExperimentStore, VariantCounters};

use crate::backend::{from_millis, to_millis};
use crate::DuckDbBackend;

fn select_variant(conn: &Connection, experiment_id: &str, user_id: &str) -> Result<Option<Variant>> {
    let mut stmt = conn.prepare(
        "SELECT variant FROM experiment_assignments WHERE experiment_id = ?1 AND user_id = ?2",
    )?;
    let mut rows = stmt.query(duckdb::params![experiment_id, user_id])?;
    let variant = match rows.next()? {
        Some(row) => {
            let raw: String = row.get(0)?;
            Some(raw.parse::<Variant>()?)
        }
        None => None,
    };
    Ok(variant)
}

fn select_counters(conn: &Connection, experiment_id: &str) -> Result<Option<ExperimentCounters>> {
    let mut stmt = conn.prepare(
        "SELECT variant, views, conversions, revenue FROM experiment_counters \
         WHERE experiment_id = ?1",
    )?;
    let rows = stmt.query_map(duckdb::params![experiment_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, f64>(3)?,
        ))
    })?;

    let mut counters: Option<ExperimentCounters> = None;
    for row in rows {
        let (variant, views, conversions, revenue) = row?;
        let variant: Variant = variant.parse()?;
        *counters
            .get_or_insert_with(|| ExperimentCounters::empty(experiment_id))
            .variant_mut(variant) = VariantCounters {
            views: u64::try_from(views)?,
            conversions: u64::try_from(conversions)?,
            revenue,
        };
    }
    Ok(counters)
}

#[async_trait]
impl ExperimentStore for DuckDbBackend {
    async fn get_assignment(&self, experiment_id: &str, user_id: &str) -> Result<Option<Variant>> {
        let conn = self.conn.lock().await;
        select_variant(&conn, experiment_id, user_id)
    }

    async fn assign_if_absent(
        &self,
        experiment_id: &str,
        user_id: &str,
        variant: Variant,
    ) -> Result<Variant> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        if let Some(existing) = select_variant(&tx, experiment_id, user_id)? {
            return Ok(existing);
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO experiment_assignments (experiment_id, user_id, variant, assigned_at_ms) \
             VALUES (?1, ?2, ?3, ?4)",
            duckdb::params![experiment_id, user_id, variant.as_str(), to_millis(Utc::now())],
        )?;
        if inserted == 0 {
            // Another writer got there first; its variant stands.
            let existing = select_variant(&tx, experiment_id, user_id)?;
            return existing.ok_or_else(|| anyhow::anyhow!("assignment vanished during insert"));
        }

        for v in Variant::ALL {
            tx.execute(
                "INSERT OR IGNORE INTO experiment_counters (experiment_id, variant, views, conversions, revenue) \
                 VALUES (?1, ?2, 0, 0, 0)",
                duckdb::params![experiment_id, v.as_str()],
            )?;
        }
        tx.execute(
            "UPDATE experiment_counters SET views = views + 1 \
             WHERE experiment_id = ?1 AND variant = ?2",
            duckdb::params![experiment_id, variant.as_str()],
        )?;
        tx.commit()?;
        Ok(variant)
    }

    async fn record_conversion(
        &self,
        experiment_id: &str,
        user_id: &str,
        revenue: f64,
    ) -> Result<Option<ExperimentCounters>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let Some(variant) = select_variant(&tx, experiment_id, user_id)? else {
            return Ok(None);
        };
        let changed = tx.execute(
            "UPDATE experiment_counters SET conversions = conversions + 1, revenue = revenue + ?1 \
             WHERE experiment_id = ?2 AND variant = ?3",
            duckdb::params![revenue, experiment_id, variant.as_str()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let counters = select_counters(&tx, experiment_id)?;
        tx.commit()?;
        Ok(counters)
    }

    async fn get_counters(&self, experiment_id: &str) -> Result<Option<ExperimentCounters>> {
        let conn = self.conn.lock().await;
        select_counters(&conn, experiment_id)
    }

    async fn list_assignments(&self, experiment_id: &str) -> Result<Vec<Assignment>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT user_id, variant, assigned_at_ms FROM experiment_assignments \
             WHERE experiment_id = ?1 ORDER BY assigned_at_ms ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(duckdb::params![experiment_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut assignments = Vec::new();
        for row in rows {
            let (user_id, variant, assigned_at_ms) = row?;
            assignments.push(Assignment {
                experiment_id: experiment_id.to_string(),
                user_id,
                variant: variant.parse()?,
                assigned_at: from_millis(assigned_at_ms),
            });
        }
        Ok(assignments)
    }

    async fn reset_experiment(&self, experiment_id: &str) -> Result<u64> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM experiment_assignments WHERE experiment_id = ?1",
            duckdb::params![experiment_id],
        )?;
        tx.execute(
            "DELETE FROM experiment_counters WHERE experiment_id = ?1",
            duckdb::params![experiment_id],
        )?;
        tx.commit()?;
        Ok(removed as u64)
    }
}
