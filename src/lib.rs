//! # flagctx
//!
//! Processing flags for pipeline stages that share documents.
//!
//! Many workers, possibly in different processes, record on each entity
//! whether their stage is queued, running, finished, failed or reset. All
//! coordination happens through conditional updates in the store: no locks,
//! no multi-statement transactions. Duplicate records left behind by racing
//! writers are collapsed by the next operation.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod flag;
pub mod model;
pub mod store;
pub mod telemetry;

pub use flag::{Check, FlagContext};
