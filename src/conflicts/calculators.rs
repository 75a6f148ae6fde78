//! Core overlap math.
//!
//! Pure functions - no store access. Date windows are inclusive on both ends
//! and OpCo sets use the contract encoding where an empty set is nationwide.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::models::OpCoId;

/// Inclusive date range; `end` is `None` for an open-ended term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.end.map_or(true, |end| self.start <= end)
    }

    pub fn is_open_ended(&self) -> bool {
        self.end.is_none()
    }

    /// Length in days, counting both ends; `None` when open-ended
    pub fn days(&self) -> Option<i64> {
        self.end.map(|end| (end - self.start).num_days() + 1)
    }
}

/// Overlap of two windows.
///
/// Windows that touch on a single day overlap on that day.
///
/// # Examples
/// ```
/// use chrono::NaiveDate;
/// use opco_contracts::conflicts::calculators::{overlap_window, DateWindow};
///
/// let d = |m, day| NaiveDate::from_ymd_opt(2025, m, day).unwrap();
/// let a = DateWindow::new(d(1, 1), Some(d(6, 30)));
/// let b = DateWindow::new(d(6, 30), None);
/// assert_eq!(overlap_window(&a, &b), Some(DateWindow::new(d(6, 30), Some(d(6, 30)))));
/// ```
pub fn overlap_window(a: &DateWindow, b: &DateWindow) -> Option<DateWindow> {
    let start = a.start.max(b.start);
    let end = match (a.end, b.end) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    };
    match end {
        Some(end) if start > end => None,
        _ => Some(DateWindow { start, end }),
    }
}

/// Result of intersecting two OpCo scopes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeOverlap {
    /// OpCos both sides claim; empty when both sides are nationwide
    pub opcos: BTreeSet<OpCoId>,
    /// At least one side has no OpCo restriction
    pub is_nationwide: bool,
}

/// Intersect two OpCo scopes (empty = nationwide).
///
/// Returns `None` when two restricted scopes share no OpCo.
pub fn intersect_scopes(a: &BTreeSet<OpCoId>, b: &BTreeSet<OpCoId>) -> Option<ScopeOverlap> {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Some(ScopeOverlap {
            opcos: BTreeSet::new(),
            is_nationwide: true,
        }),
        (true, false) => Some(ScopeOverlap {
            opcos: b.clone(),
            is_nationwide: true,
        }),
        (false, true) => Some(ScopeOverlap {
            opcos: a.clone(),
            is_nationwide: true,
        }),
        (false, false) => {
            let shared: BTreeSet<OpCoId> = a.intersection(b).copied().collect();
            if shared.is_empty() {
                None
            } else {
                Some(ScopeOverlap {
                    opcos: shared,
                    is_nationwide: false,
                })
            }
        }
    }
}
