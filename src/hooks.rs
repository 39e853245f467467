//! Observation points for the fetch cycle.
//!
//! Hooks let embedders watch a fetch run without touching the engine:
//! indexing new entries, counting, notifying. All methods default to
//! no-ops, so an implementation only overrides what it cares about. Hooks
//! fire in registration order and must not block for long; they run inline
//! with the cycle.

use crate::storage::{Feed, NewEntry};

/// Callbacks fired at fixed points of a fetch run.
pub trait FetchHook: Send + Sync {
    /// Fired once before any feed is fetched.
    fn on_fetch_started(&self, _feeds: &[Feed]) {}

    /// Fired for every entry that survives translation, before it is
    /// stored. The entry's content has already been sanitized.
    fn on_entry_parsed(&self, _feed: &Feed, _entry: &NewEntry) {}

    /// Fired once after every feed has been processed.
    fn on_fetch_done(&self, _feeds: &[Feed]) {}
}
