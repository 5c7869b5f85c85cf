//! In-process flag store.
//!
//! Same conditional semantics as the Postgres store. Each method holds the
//! lock for the whole call, so every call is atomic; nothing is held across
//! an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{FlagFilter, FlagStore, UpdateResult};
use crate::error::{Error, Result};
use crate::model::{EntityId, FlagPatch, FlagRecord};

/// Entities and their flag records, kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: Mutex<HashMap<EntityId, Vec<FlagRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity with no flags. Returns false if it already existed.
    pub fn create_entity(&self, entity: &EntityId) -> bool {
        let mut entities = self.lock();
        if entities.contains_key(entity) {
            return false;
        }
        entities.insert(entity.clone(), Vec::new());
        true
    }

    /// Append a record without any existence check. Used to reproduce the
    /// state left behind by racing writers.
    pub fn push_flag(&self, entity: &EntityId, record: FlagRecord) -> Result<()> {
        let mut entities = self.lock();
        let flags = entities
            .get_mut(entity)
            .ok_or_else(|| Error::NotFound(format!("entity {entity}")))?;
        flags.push(record);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityId, Vec<FlagRecord>>> {
        self.entities.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl FlagStore for MemoryStore {
    async fn list_flags(&self, entity: &EntityId) -> Result<Vec<FlagRecord>> {
        Ok(self.lock().get(entity).cloned().unwrap_or_default())
    }

    async fn find_flags(&self, entity: &EntityId, key: &str) -> Result<Vec<FlagRecord>> {
        let entities = self.lock();
        Ok(entities
            .get(entity)
            .map(|flags| flags.iter().filter(|f| f.key == key).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_flag(&self, entity: &EntityId, record: FlagRecord) -> Result<u64> {
        let mut entities = self.lock();
        let Some(flags) = entities.get_mut(entity) else {
            return Ok(0);
        };
        if flags.iter().any(|f| f.key == record.key) {
            return Ok(0);
        }
        flags.push(record);
        Ok(1)
    }

    async fn update_flag(
        &self,
        entity: &EntityId,
        key: &str,
        filter: FlagFilter,
        patch: FlagPatch,
    ) -> Result<UpdateResult> {
        let mut entities = self.lock();
        // Latest started first, unstarted last, ties in store order.
        let target = entities.get_mut(entity).and_then(|flags| {
            flags
                .iter_mut()
                .filter(|f| {
                    f.key == key
                        && match filter {
                            FlagFilter::Present => true,
                            FlagFilter::NotQueued => !f.queued,
                        }
                })
                .min_by(|a, b| b.started.cmp(&a.started))
        });

        Ok(match target {
            Some(record) => UpdateResult {
                matched: 1,
                modified: u64::from(patch.apply(record)),
            },
            None => UpdateResult::default(),
        })
    }

    async fn remove_flags(
        &self,
        entity: &EntityId,
        key: &str,
        started: &[Option<DateTime<Utc>>],
    ) -> Result<u64> {
        let mut entities = self.lock();
        let Some(flags) = entities.get_mut(entity) else {
            return Ok(0);
        };
        let before = flags.len();
        flags.retain(|f| !(f.key == key && started.contains(&f.started)));
        Ok((before - flags.len()) as u64)
    }
}
