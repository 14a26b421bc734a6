//! Batch command execution engine.
//!
//! Fans a single command out to many remote targets with bounded
//! concurrency. Each target is driven through a multi-phase attempt loop
//! (dispatch → poll-until-terminal → classify → retry-or-finish) and the
//! heterogeneous per-target outcomes are aggregated into one
//! [`BatchResult`]. Progress streams out through a typed [`EventBus`] so
//! rendering stays a caller concern.

pub mod attempt;
pub mod batch;
pub mod classify;
pub mod events;
pub mod executor;
pub mod report;

pub use attempt::{AttemptRecord, Outcome, RawOutcome, TargetReport};
pub use batch::{BatchCounts, BatchError, BatchOptions, BatchResult, BatchRunner};
pub use classify::FailureKind;
pub use events::{BatchEvent, EventBus};
pub use report::{BatchSummary, ExportRecord, SummaryRow, select_failed, summarize};
