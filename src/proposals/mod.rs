//! Proposal workflow

pub mod lifecycle;
pub mod transitions;

pub use lifecycle::{build_claims, CompletionOutcome, ProposalLifecycle};
pub use transitions::{is_allowed, validate_transition, TransitionMode};
