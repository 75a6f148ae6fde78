//! Domain models shared by the versioning, conflict and proposal layers.

pub mod contract;
pub mod price;
pub mod proposal;
pub mod reference;

pub use contract::{
    AssignmentKind, Contract, ContractAssignments, ContractAttributes, ContractId,
    ContractSnapshot, ContractVersion, Suspension, VersionNumber,
};
pub use price::{round_price, PriceTerms};
pub use proposal::{
    AmendmentAction, ContractTerms, NewProposal, OpCoScope, ProductProposalStatus, Proposal,
    ProposalId, ProposalProduct, ProposalRevision, ProposalStatus, ProposalType,
    StatusHistoryEntry,
};
pub use reference::{EntityId, OpCoId, ProductId, ReferenceEntity};
