//! Recently-run guard.

use chrono::{DateTime, Utc};

use super::FlagContext;
use crate::error::{Error, Result};
use crate::model::{EntityId, FlagRecord};
use crate::store::FlagStore;

impl<S: FlagStore + ?Sized> FlagContext<S> {
    /// True if this stage was started on the entity within the tolerance
    /// window. Callers use it to drop redeliveries of a trigger that has
    /// just been acted on. Reads only.
    #[tracing::instrument(level = "debug", skip(self), fields(key = %self.key))]
    pub async fn is_run_recently(&self, entity: &EntityId) -> Result<bool> {
        let tolerance = chrono::Duration::from_std(self.tolerance).map_err(|e| {
            Error::Config(format!("tolerance {:?} out of range: {e}", self.tolerance))
        })?;
        let records = self.call(self.store.find_flags(entity, &self.key)).await?;
        Ok(started_within(&records, self.clock.now(), tolerance))
    }
}

/// A deadline past the representable range never expires.
fn started_within(
    records: &[FlagRecord],
    now: DateTime<Utc>,
    tolerance: chrono::Duration,
) -> bool {
    records
        .iter()
        .filter_map(|r| r.started)
        .any(|started| {
            started
                .checked_add_signed(tolerance)
                .is_none_or(|deadline| deadline > now)
        })
}
