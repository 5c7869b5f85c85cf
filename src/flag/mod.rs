//! Flag context: the per-stage view of flag records on entities.
//!
//! A [`FlagContext`] is bound to one stage (key + version) and drives that
//! stage's flag record on any entity through
//! `Absent → Queued → Started → {Ended | Errored} → Reset → Queued → …`.
//!
//! Every mutating operation first collapses duplicate records for the key
//! (best effort), then issues a conditional update. The two steps are
//! separate store calls. A writer that loses a race gets
//! [`Outcome::Unchanged`], and any leftover duplicate is removed by the
//! next operation from any worker.

mod dedup;
mod recent;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, error, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{DEFAULT_TOLERANCE, StageConfig};
use crate::error::{Error, Result};
use crate::model::{EntityId, FlagPatch, FlagRecord, FlagState, Outcome, Patch, Summary};
use crate::store::{FlagFilter, FlagStore};
use crate::telemetry::flag::{record_outcome, start_flag_span};
use crate::telemetry::metrics;

/// Whether a terminal transition requires the record to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Check {
    /// Fail with [`Error::NotStarted`] when there is no record.
    #[default]
    Required,
    /// Report [`Outcome::Unchanged`] when there is no record.
    Skip,
}

/// Flag operations for one stage over a shared store.
pub struct FlagContext<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    key: String,
    version: String,
    tolerance: Duration,
    store_timeout: Option<Duration>,
}

impl<S: ?Sized> Clone for FlagContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            key: self.key.clone(),
            version: self.version.clone(),
            tolerance: self.tolerance,
            store_timeout: self.store_timeout,
        }
    }
}

impl<S: FlagStore + ?Sized> FlagContext<S> {
    pub fn new(store: Arc<S>, key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            key: key.into(),
            version: version.into(),
            tolerance: DEFAULT_TOLERANCE,
            store_timeout: None,
        }
    }

    pub fn from_stage(store: Arc<S>, stage: &StageConfig) -> Self {
        Self {
            tolerance: stage.tolerance,
            store_timeout: stage.store_timeout,
            ..Self::new(store, stage.key.clone(), stage.version.clone())
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Bound every store call. A timed-out dedup pass is skipped; a timed-out
    /// update fails with [`Error::Timeout`].
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// This stage's records on the entity. More than one means a dedup is pending.
    pub async fn flags(&self, entity: &EntityId) -> Result<Vec<FlagRecord>> {
        self.call(self.store.find_flags(entity, &self.key)).await
    }

    /// Mark the stage as pending pickup.
    ///
    /// Creates a queued record if there is none, requeues a record that is
    /// not queued, and reports [`Outcome::Unchanged`] if already queued.
    pub async fn queue(&self, entity: &EntityId) -> Result<Outcome> {
        self.observe("queue", entity, async {
            self.dedupe_best_effort(entity).await;

            let record = FlagRecord::queued(&self.key, &self.version);
            if self.call(self.store.insert_flag(entity, record)).await? > 0 {
                return Ok(Outcome::Modified);
            }

            let patch = FlagPatch {
                queued: Some(true),
                ..FlagPatch::default()
            };
            let result = self
                .call(
                    self.store
                        .update_flag(entity, &self.key, FlagFilter::NotQueued, patch),
                )
                .await?;
            Ok(Outcome::from_count(result.modified))
        })
        .await
    }

    /// Mark the stage as launched. An existing record is restarted in place.
    pub async fn start(&self, entity: &EntityId) -> Result<Outcome> {
        self.observe("start", entity, async {
            self.dedupe_best_effort(entity).await;

            let record = FlagRecord::started(&self.key, &self.version, self.clock.now());
            if self.call(self.store.insert_flag(entity, record)).await? > 0 {
                return Ok(Outcome::Modified);
            }
            self.restart(entity).await
        })
        .await
    }

    /// Mark the stage as finished successfully. `state`, when given, replaces
    /// the record's payload; otherwise the payload is kept.
    pub async fn end(
        &self,
        entity: &EntityId,
        state: Option<FlagState>,
        check: Check,
    ) -> Result<Outcome> {
        self.observe("end", entity, async {
            self.dedupe_best_effort(entity).await;

            let patch = FlagPatch {
                ended: Patch::Set(self.clock.now()),
                errored: Patch::Clear,
                reset: Patch::Clear,
                queued: Some(false),
                summary: Some(Summary::Ended),
                state: state.map(Patch::Set).unwrap_or_default(),
                ..FlagPatch::default()
            };
            self.update_existing(entity, patch, check).await
        })
        .await
    }

    /// Mark the stage as failed.
    pub async fn error(&self, entity: &EntityId, check: Check) -> Result<Outcome> {
        self.observe("error", entity, async {
            self.dedupe_best_effort(entity).await;

            let patch = FlagPatch {
                errored: Patch::Set(self.clock.now()),
                ended: Patch::Clear,
                reset: Patch::Clear,
                queued: Some(false),
                summary: Some(Summary::Errored),
                ..FlagPatch::default()
            };
            self.update_existing(entity, patch, check).await
        })
        .await
    }

    /// Mark the record for re-processing. Drops the payload but keeps the
    /// `started`/`ended`/`errored` history.
    pub async fn reset(&self, entity: &EntityId) -> Result<Outcome> {
        self.observe("reset", entity, async {
            self.dedupe_best_effort(entity).await;

            let patch = FlagPatch {
                version: Some(self.version.clone()),
                reset: Patch::Set(self.clock.now()),
                queued: Some(true),
                state: Patch::Clear,
                ..FlagPatch::default()
            };
            self.update_existing(entity, patch, Check::Required).await
        })
        .await
    }

    /// Relaunch a stage that already has a record.
    async fn restart(&self, entity: &EntityId) -> Result<Outcome> {
        let patch = FlagPatch {
            version: Some(self.version.clone()),
            started: Patch::Set(self.clock.now()),
            ended: Patch::Clear,
            errored: Patch::Clear,
            queued: Some(true),
            summary: Some(Summary::Started),
            ..FlagPatch::default()
        };
        self.update_existing(entity, patch, Check::Required).await
    }

    async fn update_existing(
        &self,
        entity: &EntityId,
        patch: FlagPatch,
        check: Check,
    ) -> Result<Outcome> {
        let result = self
            .call(
                self.store
                    .update_flag(entity, &self.key, FlagFilter::Present, patch),
            )
            .await?;
        if result.matched == 0 && check == Check::Required {
            // A concurrent writer can delete or replace the target row
            // mid-update. Only a key with no records at all is NotStarted.
            let remaining = self.call(self.store.find_flags(entity, &self.key)).await?;
            if remaining.is_empty() {
                return Err(Error::NotStarted {
                    key: self.key.clone(),
                    entity: entity.to_string(),
                });
            }
            return Ok(Outcome::Unchanged);
        }
        Ok(Outcome::from_count(result.modified))
    }

    /// Run one store call under the configured timeout.
    async fn call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match self.store_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => call.await,
        }
    }

    /// Run an operation inside its span and record its result.
    async fn observe(
        &self,
        operation: &'static str,
        entity: &EntityId,
        work: impl Future<Output = Result<Outcome>>,
    ) -> Result<Outcome> {
        let span = start_flag_span(operation, &self.key, entity);
        let begun = Instant::now();
        let result = work.instrument(span.clone()).await;

        let label = match &result {
            Ok(outcome) => {
                record_outcome(&span, *outcome);
                match outcome {
                    Outcome::Modified => "modified",
                    Outcome::Unchanged => "unchanged",
                }
            }
            Err(e @ Error::NotStarted { .. }) => {
                span.in_scope(|| warn!(error = %e, "flag operation on a stage that never started"));
                "not_started"
            }
            Err(e) => {
                span.in_scope(|| error!(error = %e, "flag operation failed"));
                "error"
            }
        };

        metrics::flag_operations().add(
            1,
            &[
                KeyValue::new("key", self.key.clone()),
                KeyValue::new("operation", operation),
                KeyValue::new("result", label),
            ],
        );
        metrics::operation_duration_ms().record(
            begun.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", format!("flag.{operation}"))],
        );

        result
    }
}
