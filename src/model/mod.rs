//! Core data model.
//!
//! An entity is a document some pipeline works on. Each processing stage
//! records its progress on the entity as a flag record keyed by the stage name.

pub mod flag;

pub use flag::{EntityId, FlagPatch, FlagRecord, FlagState, Outcome, Patch, Summary};
