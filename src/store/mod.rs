//! Flag store adapter.
//!
//! The state machine talks to persistence only through [`FlagStore`]. Every
//! method is a single atomic store call; nothing here spans two calls.
//!
//! ## Conditional semantics
//!
//! - [`FlagStore::insert_flag`] appends a record only when the entity exists
//!   and has no record with the same key. Two racing inserts may both land;
//!   the deduplicator cleans that up on the next call.
//! - [`FlagStore::update_flag`] touches one record with the key that passes
//!   the [`FlagFilter`]: the one deduplication keeps (latest `started`,
//!   unstarted last, ties in store order). A concurrent dedup therefore never
//!   deletes the row an update is aimed at. Zero matches is a normal result,
//!   not an error.
//! - [`FlagStore::remove_flags`] removes every record with the key whose
//!   `started` equals one of the given values; `None` matches records that
//!   were never started.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{EntityId, FlagPatch, FlagRecord};

pub use memory::MemoryStore;

/// Which existing record an update may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagFilter {
    /// Any record with the key.
    Present,
    /// A record with the key that is not currently queued.
    NotQueued,
}

/// Counts reported by a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateResult {
    /// Records the filter selected.
    pub matched: u64,
    /// Records whose contents actually changed.
    pub modified: u64,
}

#[async_trait]
pub trait FlagStore: Send + Sync {
    /// All flag records on the entity, in store order.
    async fn list_flags(&self, entity: &EntityId) -> Result<Vec<FlagRecord>>;

    /// Flag records on the entity with the given key, in store order.
    async fn find_flags(&self, entity: &EntityId, key: &str) -> Result<Vec<FlagRecord>>;

    /// Append `record` if the entity exists and lacks its key. Returns the
    /// number of records inserted (0 or 1).
    async fn insert_flag(&self, entity: &EntityId, record: FlagRecord) -> Result<u64>;

    /// Apply `patch` to the surviving record with `key` passing `filter`.
    async fn update_flag(
        &self,
        entity: &EntityId,
        key: &str,
        filter: FlagFilter,
        patch: FlagPatch,
    ) -> Result<UpdateResult>;

    /// Remove records with `key` whose `started` is in `started`. Returns the
    /// number removed.
    async fn remove_flags(
        &self,
        entity: &EntityId,
        key: &str,
        started: &[Option<DateTime<Utc>>],
    ) -> Result<u64>;
}
