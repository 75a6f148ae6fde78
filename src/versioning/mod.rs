//! Contract version history: deltas, forward copy and point-in-time reads.

pub mod delta;
pub mod version_store;

pub use delta::{AssignmentChange, AssignmentDelta, AttributeChanges, PriceDelta};
pub use version_store::{diff_snapshots, AssignmentRef, VersionDiff, VersionStore};
