//! Cross-contract conflict detection.
//!
//! `calculators` holds the pure window and scope math, `engine` scans current
//! contract versions for overlapping claims and `report` turns the overlaps
//! into the explainable JSON report.

pub mod calculators;
pub mod engine;
pub mod report;

pub use engine::{evaluate_claim, Claim, Overlap, OverlapEngine};
pub use report::{ConflictDetail, ConflictReport, ConflictReporter, OpCoRef};
