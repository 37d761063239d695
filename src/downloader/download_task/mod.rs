//! Per-task pipeline: resolve, download, merge, deliver.
//!
//! Split into focused submodules:
//! - [`orchestration`] - Stage sequencing and status transitions
//! - [`segment_pool`] - Bounded worker pool filling the segment store
//! - [`finalization`] - Merge, delivery and terminal transitions

mod finalization;
mod orchestration;
pub(crate) mod segment_pool;
