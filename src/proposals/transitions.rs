//! Proposal status transition table.
//!
//! ```text
//! Requested -> Pending -> Saved -> Submitted -> Completed
//!                           ^          |
//!                           +----------+   (returned for revision)
//! any non-terminal status -> Rejected
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ContractError, Result};
use crate::models::ProposalStatus;

/// Who is asking for the transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionMode {
    #[default]
    Standard,
    /// Lets an administrator skip forward over pipeline stages
    AdministrativeOverride,
}

/// Whether `from -> to` is allowed in `mode`
pub fn is_allowed(from: ProposalStatus, to: ProposalStatus, mode: TransitionMode) -> bool {
    use ProposalStatus::*;

    if from.is_terminal() || from == to {
        return false;
    }
    match (from, to) {
        (_, Rejected) => true,
        (Requested, Pending) | (Pending, Saved) | (Saved, Submitted) | (Submitted, Completed) => true,
        (Submitted, Saved) => true,
        _ => match (mode, from.stage(), to.stage()) {
            // Skipping never lands on Completed; that needs the completion re-check
            (TransitionMode::AdministrativeOverride, Some(a), Some(b)) => b > a && to != Completed,
            _ => false,
        },
    }
}

pub fn validate_transition(
    from: ProposalStatus,
    to: ProposalStatus,
    mode: TransitionMode,
) -> Result<()> {
    if is_allowed(from, to, mode) {
        Ok(())
    } else {
        Err(ContractError::InvalidTransition { from, to })
    }
}
