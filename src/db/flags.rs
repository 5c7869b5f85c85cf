//! Postgres flag store.
//!
//! Flag records live in `entity_flags`, one row per record, ordered by
//! `row_id`. There is no unique index on `(entity_id, key)`:
//! racing inserts may both commit and the deduplicator removes the loser.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{EntityId, FlagPatch, FlagRecord, FlagState};
use crate::store::{FlagFilter, FlagStore, UpdateResult};

impl super::Db {
    /// Append a record without any existence check. Used to reproduce the
    /// state left behind by racing writers.
    pub async fn push_flag(&self, entity: &EntityId, record: &FlagRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO entity_flags (entity_id, key, version, started, ended, errored, reset, queued, summary, state)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(entity.as_str())
        .bind(&record.key)
        .bind(&record.version)
        .bind(record.started)
        .bind(record.ended)
        .bind(record.errored)
        .bind(record.reset)
        .bind(record.queued)
        .bind(record.summary.map(|s| s.to_string()))
        .bind(state_json(record.state.as_ref())?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FlagStore for super::Db {
    async fn list_flags(&self, entity: &EntityId) -> Result<Vec<FlagRecord>> {
        let rows: Vec<FlagRow> = sqlx::query_as(
            "SELECT key, version, started, ended, errored, reset, queued, summary, state
             FROM entity_flags WHERE entity_id = $1 ORDER BY row_id",
        )
        .bind(entity.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FlagRow::try_into_record).collect()
    }

    async fn find_flags(&self, entity: &EntityId, key: &str) -> Result<Vec<FlagRecord>> {
        let rows: Vec<FlagRow> = sqlx::query_as(
            "SELECT key, version, started, ended, errored, reset, queued, summary, state
             FROM entity_flags WHERE entity_id = $1 AND key = $2 ORDER BY row_id",
        )
        .bind(entity.as_str())
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FlagRow::try_into_record).collect()
    }

    async fn insert_flag(&self, entity: &EntityId, record: FlagRecord) -> Result<u64> {
        // Single statement: the entity must exist and must not carry the key yet.
        let rows = sqlx::query(
            "INSERT INTO entity_flags (entity_id, key, version, started, ended, errored, reset, queued, summary, state)
             SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
             WHERE EXISTS (SELECT 1 FROM entities WHERE id = $1)
             AND NOT EXISTS (SELECT 1 FROM entity_flags WHERE entity_id = $1 AND key = $2)",
        )
        .bind(entity.as_str())
        .bind(&record.key)
        .bind(&record.version)
        .bind(record.started)
        .bind(record.ended)
        .bind(record.errored)
        .bind(record.reset)
        .bind(record.queued)
        .bind(record.summary.map(|s| s.to_string()))
        .bind(state_json(record.state.as_ref())?)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows)
    }

    async fn update_flag(
        &self,
        entity: &EntityId,
        key: &str,
        filter: FlagFilter,
        patch: FlagPatch,
    ) -> Result<UpdateResult> {
        let (set_started, started) = patch.started.assignment();
        let (set_ended, ended) = patch.ended.assignment();
        let (set_errored, errored) = patch.errored.assignment();
        let (set_reset, reset) = patch.reset.assignment();
        let (set_state, state) = patch.state.assignment();

        // The subselect picks the record dedup would keep and locks it; a row
        // that stops matching while we wait gives zero rows.
        let rows = sqlx::query(
            "UPDATE entity_flags SET
                version = COALESCE($4, version),
                started = CASE WHEN $5 THEN $6 ELSE started END,
                ended = CASE WHEN $7 THEN $8 ELSE ended END,
                errored = CASE WHEN $9 THEN $10 ELSE errored END,
                reset = CASE WHEN $11 THEN $12 ELSE reset END,
                queued = COALESCE($13, queued),
                summary = COALESCE($14, summary),
                state = CASE WHEN $15 THEN $16 ELSE state END
             WHERE row_id = (
                SELECT row_id FROM entity_flags
                WHERE entity_id = $1 AND key = $2 AND (NOT $3 OR queued = false)
                ORDER BY started DESC NULLS LAST, row_id
                LIMIT 1
                FOR UPDATE
             )",
        )
        .bind(entity.as_str())
        .bind(key)
        .bind(filter == FlagFilter::NotQueued)
        .bind(patch.version.as_deref())
        .bind(set_started)
        .bind(started.copied())
        .bind(set_ended)
        .bind(ended.copied())
        .bind(set_errored)
        .bind(errored.copied())
        .bind(set_reset)
        .bind(reset.copied())
        .bind(patch.queued)
        .bind(patch.summary.map(|s| s.to_string()))
        .bind(set_state)
        .bind(state_json(state)?)
        .execute(&self.pool)
        .await?
        .rows_affected();

        // Postgres reports touched rows; a matched row always counts as modified.
        Ok(UpdateResult {
            matched: rows,
            modified: rows,
        })
    }

    async fn remove_flags(
        &self,
        entity: &EntityId,
        key: &str,
        started: &[Option<DateTime<Utc>>],
    ) -> Result<u64> {
        if started.is_empty() {
            return Ok(0);
        }
        let values: Vec<DateTime<Utc>> = started.iter().flatten().copied().collect();
        let include_unstarted = started.iter().any(Option::is_none);

        let rows = sqlx::query(
            "DELETE FROM entity_flags
             WHERE entity_id = $1 AND key = $2
             AND (started = ANY($3) OR ($4 AND started IS NULL))",
        )
        .bind(entity.as_str())
        .bind(key)
        .bind(values)
        .bind(include_unstarted)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows)
    }
}

fn state_json(state: Option<&FlagState>) -> Result<Option<serde_json::Value>> {
    state.map(serde_json::to_value).transpose().map_err(Error::from)
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct FlagRow {
    key: String,
    version: String,
    started: Option<DateTime<Utc>>,
    ended: Option<DateTime<Utc>>,
    errored: Option<DateTime<Utc>>,
    reset: Option<DateTime<Utc>>,
    queued: bool,
    summary: Option<String>,
    state: Option<serde_json::Value>,
}

impl FlagRow {
    fn try_into_record(self) -> Result<FlagRecord> {
        Ok(FlagRecord {
            key: self.key,
            version: self.version,
            started: self.started,
            ended: self.ended,
            errored: self.errored,
            reset: self.reset,
            queued: self.queued,
            summary: self.summary.map(|s| s.parse()).transpose()?,
            state: self.state.map(serde_json::from_value).transpose()?,
        })
    }
}
