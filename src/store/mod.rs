//! Persistence for the pipeline.
//!
//! A single SQLite database per state directory holds:
//! - **phase_records**: the per-entity judge ledger, mutated only through
//!   [`StateStore::transition`]
//! - **fetch_cursors**: pagination positions so interrupted collections resume
//! - **activities**: collected activity per entity, reused across runs

mod records;
mod state_store;

pub use records::{
    CursorStatus, FetchCursor, Item, PhaseEntry, PhaseOutcome, PhaseRecord, PhaseStatus, PipelinePhase,
};
pub use state_store::{StateStore, compute_roster_key};
