//! Flag records and the partial updates applied to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Stable identifier of a tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Flag Record
// ---------------------------------------------------------------------------

/// Status of one processing stage on one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRecord {
    /// Stage identifier. Not unique per entity: duplicates can appear
    /// transiently when writers race and are collapsed by deduplication.
    pub key: String,

    /// Version of the stage implementation that last touched this record.
    pub version: String,

    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub errored: Option<DateTime<Utc>>,
    pub reset: Option<DateTime<Utc>>,

    /// Pending pickup by the stage.
    pub queued: bool,

    pub summary: Option<Summary>,

    /// Stage-specific payload. Opaque to the tracker.
    pub state: Option<FlagState>,
}

impl FlagRecord {
    /// An empty, unqueued record.
    pub fn new(key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: version.into(),
            started: None,
            ended: None,
            errored: None,
            reset: None,
            queued: false,
            summary: None,
            state: None,
        }
    }

    /// Record created by a first `queue`.
    pub fn queued(key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            queued: true,
            ..Self::new(key, version)
        }
    }

    /// Record created by a first `start`.
    pub fn started(key: impl Into<String>, version: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            started: Some(at),
            queued: true,
            summary: Some(Summary::Started),
            ..Self::new(key, version)
        }
    }

    pub fn with_started(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.started = at;
        self
    }

    pub fn with_state(mut self, state: FlagState) -> Self {
        self.state = Some(state);
        self
    }
}

/// Short status label written alongside terminal timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Summary {
    Started,
    Ended,
    Errored,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Summary::Started => "started",
            Summary::Ended => "ended",
            Summary::Errored => "errored",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Summary {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Summary::Started),
            "ended" => Ok(Summary::Ended),
            "errored" => Ok(Summary::Errored),
            other => Err(Error::Other(format!("unknown flag summary: {other}"))),
        }
    }
}

/// Stage-specific payload carried on a flag record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagState {
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

impl FlagState {
    pub fn new(updated: DateTime<Utc>, values: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { updated, values }
    }

    /// Build from a JSON value, which must be an object.
    pub fn from_value(
        updated: DateTime<Utc>,
        value: serde_json::Value,
    ) -> crate::error::Result<Self> {
        match value {
            serde_json::Value::Object(values) => Ok(Self { updated, values }),
            other => Err(Error::Other(format!(
                "flag state must be a JSON object, got {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// How one optional field changes under an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T: Clone + PartialEq> Patch<T> {
    /// Apply to a slot, returning whether the value changed.
    pub fn apply(&self, slot: &mut Option<T>) -> bool {
        let next = match self {
            Patch::Keep => return false,
            Patch::Set(v) => Some(v.clone()),
            Patch::Clear => None,
        };
        if *slot == next {
            return false;
        }
        *slot = next;
        true
    }

    /// `(write, value)` pair for stores that express the patch as a
    /// conditional column assignment.
    pub fn assignment(&self) -> (bool, Option<&T>) {
        match self {
            Patch::Keep => (false, None),
            Patch::Set(v) => (true, Some(v)),
            Patch::Clear => (true, None),
        }
    }
}

/// Partial update of a single flag record. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagPatch {
    pub version: Option<String>,
    pub started: Patch<DateTime<Utc>>,
    pub ended: Patch<DateTime<Utc>>,
    pub errored: Patch<DateTime<Utc>>,
    pub reset: Patch<DateTime<Utc>>,
    pub queued: Option<bool>,
    pub summary: Option<Summary>,
    pub state: Patch<FlagState>,
}

impl FlagPatch {
    /// Apply in place, returning whether anything changed.
    pub fn apply(&self, record: &mut FlagRecord) -> bool {
        let mut changed = false;
        if let Some(ref version) = self.version {
            if record.version != *version {
                record.version = version.clone();
                changed = true;
            }
        }
        changed |= self.started.apply(&mut record.started);
        changed |= self.ended.apply(&mut record.ended);
        changed |= self.errored.apply(&mut record.errored);
        changed |= self.reset.apply(&mut record.reset);
        if let Some(queued) = self.queued {
            if record.queued != queued {
                record.queued = queued;
                changed = true;
            }
        }
        if let Some(summary) = self.summary {
            if record.summary != Some(summary) {
                record.summary = Some(summary);
                changed = true;
            }
        }
        changed |= self.state.apply(&mut record.state);
        changed
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of a flag operation that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A record was created, changed or removed.
    Modified,
    /// Nothing matched or the record was already in the target state.
    Unchanged,
}

impl Outcome {
    pub fn from_count(n: u64) -> Self {
        if n > 0 {
            Outcome::Modified
        } else {
            Outcome::Unchanged
        }
    }

    pub fn is_modified(self) -> bool {
        self == Outcome::Modified
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Modified => "modified",
            Outcome::Unchanged => "unchanged",
        };
        write!(f, "{s}")
    }
}
