//! Duplicate flag record collapse.
//!
//! The most recently started record wins. Losers are removed by their exact
//! `started` value in one bulk call; whatever they carried is dropped.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{info, warn};

use super::FlagContext;
use crate::error::Result;
use crate::model::{EntityId, FlagRecord, Outcome};
use crate::store::FlagStore;
use crate::telemetry::metrics;

/// What a dedup pass keeps and removes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DedupPlan {
    pub keep: FlagRecord,
    pub remove: Vec<Option<DateTime<Utc>>>,
}

/// Decide which records to drop. `None` when there is nothing to remove.
///
/// Records are ordered by `started` descending with unstarted records last;
/// ties keep store order. Records sharing the survivor's `started` value
/// cannot be told apart by the removal filter and are left in place.
pub(crate) fn plan(mut records: Vec<FlagRecord>) -> Option<DedupPlan> {
    if records.len() < 2 {
        return None;
    }
    records.sort_by(|a, b| b.started.cmp(&a.started));

    let rest = records.split_off(1);
    let keep = records.pop()?;

    let mut remove: Vec<Option<DateTime<Utc>>> = rest
        .into_iter()
        .map(|r| r.started)
        .filter(|started| *started != keep.started)
        .collect();
    remove.dedup();

    if remove.is_empty() {
        return None;
    }
    Some(DedupPlan { keep, remove })
}

impl<S: FlagStore + ?Sized> FlagContext<S> {
    /// Collapse this stage's duplicate records on the entity down to one.
    pub async fn dedupe(&self, entity: &EntityId) -> Result<Outcome> {
        self.observe("dedupe", entity, self.collapse_duplicates(entity))
            .await
    }

    /// Dedup pass run ahead of every mutation. Failures are logged and the
    /// caller proceeds with its update.
    pub(super) async fn dedupe_best_effort(&self, entity: &EntityId) {
        if let Err(e) = self.collapse_duplicates(entity).await {
            warn!(error = %e, "dedup pass failed, continuing");
        }
    }

    async fn collapse_duplicates(&self, entity: &EntityId) -> Result<Outcome> {
        let records = self.call(self.store.find_flags(entity, &self.key)).await?;
        let Some(plan) = plan(records) else {
            return Ok(Outcome::Unchanged);
        };

        let removed = self
            .call(self.store.remove_flags(entity, &self.key, &plan.remove))
            .await?;
        if removed > 0 {
            info!(removed, kept_started = ?plan.keep.started, "removed duplicate flags");
            metrics::duplicates_removed().add(removed, &[KeyValue::new("key", self.key.clone())]);
        }
        Ok(Outcome::from_count(removed))
    }
}
