//! Persistence ports.
//!
//! `ContractStore` covers the contract, version, assignment, price and
//! proposal tables. `ReferenceData` covers the read-only lookup tables owned
//! by other services. Both have a Postgres adapter (`crate::db::PgStore`) and
//! an in-process adapter (`MemoryStore`).

pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeSet;

use crate::conflicts::{evaluate_claim, Claim, Overlap};
use crate::error::Result;
use crate::models::{
    AssignmentKind, Contract, ContractId, ContractSnapshot, ContractVersion, EntityId, NewProposal,
    OpCoId, ProductId, Proposal, ProposalId, ProposalStatus, ReferenceEntity, StatusHistoryEntry,
    Suspension, VersionNumber,
};

pub use memory::MemoryStore;

/// Current-version claim of an existing contract on one product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingClaim {
    pub contract_id: ContractId,
    pub version_number: VersionNumber,
    pub name: String,
    pub foreign_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_suspended: bool,
    pub manufacturer_ids: BTreeSet<EntityId>,
    /// Empty set means nationwide
    pub opcos: BTreeSet<OpCoId>,
}

/// Proposal state change committed together with its status history row.
///
/// The write only succeeds if the stored status still equals
/// `expected_status`.
#[derive(Debug, Clone)]
pub struct ProposalUpdate {
    pub proposal: Proposal,
    pub expected_status: ProposalStatus,
    pub history: Option<StatusHistoryEntry>,
}

/// Claims re-checked against current contracts inside the version commit.
///
/// Stores evaluate the guard after serialising writers on every claimed
/// product, so two overlapping completions cannot both pass it.
#[derive(Debug, Clone)]
pub struct ClaimGuard {
    pub claims: Vec<Claim>,
    pub exclude_contract_id: Option<ContractId>,
    pub include_suspended: bool,
}

impl ClaimGuard {
    /// Claimed products in ascending order (the lock order)
    pub fn products(&self) -> BTreeSet<ProductId> {
        self.claims.iter().map(|c| c.product_id).collect()
    }

    /// Overlaps between the guarded claims on `product_id` and `existing`
    pub fn overlaps(&self, product_id: ProductId, existing: &[ExistingClaim]) -> Vec<Overlap> {
        self.claims
            .iter()
            .filter(|c| c.product_id == product_id)
            .flat_map(|c| evaluate_claim(c, existing))
            .collect()
    }
}

/// A fully materialised contract version ready to be written.
///
/// `expected_version` is `None` for a brand-new contract; otherwise the
/// contract's `current_version_number` must still equal it at commit time.
#[derive(Debug, Clone)]
pub struct VersionWrite {
    pub snapshot: ContractSnapshot,
    pub expected_version: Option<VersionNumber>,
    pub proposal_id: Option<ProposalId>,
    /// Proposal completion committed in the same transaction
    pub completion: Option<ProposalUpdate>,
    /// Overlap re-check that must pass for the commit to go through
    pub guard: Option<ClaimGuard>,
}

/// Read-only lookup collaborators
#[async_trait]
pub trait ReferenceData: Send + Sync {
    /// Rows for the requested ids; unknown ids are simply absent
    async fn entities(
        &self,
        kind: AssignmentKind,
        ids: &BTreeSet<EntityId>,
    ) -> Result<Vec<ReferenceEntity>>;
}

/// Contract and proposal tables
#[async_trait]
pub trait ContractStore: Send + Sync {
    async fn next_contract_id(&self) -> Result<ContractId>;

    async fn contract(&self, id: ContractId) -> Result<Option<Contract>>;

    /// Attribute, assignment and price rows recorded at exactly `version`
    async fn snapshot(
        &self,
        id: ContractId,
        version: VersionNumber,
    ) -> Result<Option<ContractSnapshot>>;

    /// Version rows in ascending version order
    async fn versions(&self, id: ContractId) -> Result<Vec<ContractVersion>>;

    /// Contracts not suspended whose term includes `as_of`
    async fn active_contracts(&self, as_of: NaiveDate) -> Result<Vec<Contract>>;

    /// Contracts whose current version assigns `product_id`
    async fn claims_for_product(
        &self,
        product_id: ProductId,
        exclude_contract_id: Option<ContractId>,
        include_suspended: bool,
    ) -> Result<Vec<ExistingClaim>>;

    /// Atomically write a version, move the current pointer and apply the
    /// optional proposal completion.
    ///
    /// Suspension state is taken from the stored contract, not the snapshot.
    /// A failing guard aborts with `ContractError::Overlapping`.
    async fn commit_version(&self, write: VersionWrite) -> Result<Contract>;

    /// Flip the suspension flag on the contract and its current version row
    async fn set_suspension(&self, id: ContractId, suspension: Suspension) -> Result<Contract>;

    async fn insert_proposal(&self, proposal: NewProposal, actor: &str) -> Result<Proposal>;

    async fn proposal(&self, id: ProposalId) -> Result<Option<Proposal>>;

    /// Compare-and-swap on the proposal status, then write header, lines and
    /// the history row
    async fn update_proposal(&self, update: ProposalUpdate) -> Result<Proposal>;

    /// History rows in insertion order
    async fn status_history(&self, id: ProposalId) -> Result<Vec<StatusHistoryEntry>>;
}
