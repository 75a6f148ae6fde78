//! Append-only contract versions.
//!
//! Every write materialises the complete next version (forward copy of the
//! base version plus the delta) and hands it to the store as one atomic
//! compare-and-swap on `current_version_number`.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use super::delta::{AssignmentDelta, AttributeChanges, PriceDelta};
use crate::error::{ContractError, Result};
use crate::models::{
    AssignmentKind, Contract, ContractAssignments, ContractAttributes, ContractId,
    ContractSnapshot, EntityId, PriceTerms, ProductId, ProposalId, VersionNumber,
};
use crate::store::{ClaimGuard, ContractStore, ProposalUpdate, ReferenceData, VersionWrite};

/// Writes and reconstructs contract versions
pub struct VersionStore {
    store: Arc<dyn ContractStore>,
    references: Arc<dyn ReferenceData>,
}

impl VersionStore {
    pub fn new(store: Arc<dyn ContractStore>, references: Arc<dyn ReferenceData>) -> Self {
        Self { store, references }
    }

    /// Create version 1 of a new contract.
    ///
    /// Every referenced distributor, industry, manufacturer, OpCo and product
    /// must exist and be active.
    pub async fn create_initial_version(
        &self,
        contract_id: ContractId,
        attributes: ContractAttributes,
        assignments: ContractAssignments,
        prices: BTreeMap<ProductId, PriceTerms>,
    ) -> Result<Contract> {
        self.commit_initial_version(contract_id, attributes, assignments, prices, None, None, None)
            .await
    }

    pub(crate) async fn commit_initial_version(
        &self,
        contract_id: ContractId,
        attributes: ContractAttributes,
        assignments: ContractAssignments,
        prices: BTreeMap<ProductId, PriceTerms>,
        proposal_id: Option<ProposalId>,
        completion: Option<ProposalUpdate>,
        guard: Option<ClaimGuard>,
    ) -> Result<Contract> {
        let mut errors = attributes.validate();
        for (product_id, price) in &prices {
            if !assignments.products.contains(product_id) {
                errors.push(format!(
                    "product {} must be assigned before it can be priced",
                    product_id
                ));
            }
            errors.extend(price.validate(&format!("product {}", product_id)));
        }
        errors.extend(self.check_references(assignments.iter()).await?);
        if !errors.is_empty() {
            return Err(ContractError::Validation(errors));
        }

        let snapshot = ContractSnapshot {
            contract_id,
            version_number: 1,
            attributes,
            assignments,
            prices: prices
                .iter()
                .map(|(product_id, price)| (*product_id, price.normalized()))
                .collect(),
            created_at: Utc::now(),
        };

        let contract = self
            .store
            .commit_version(VersionWrite {
                snapshot,
                expected_version: None,
                proposal_id,
                completion,
                guard,
            })
            .await?;

        info!(contract_id, "Created contract version 1");
        Ok(contract)
    }

    /// Create version N+1 from whatever version is current now
    pub async fn create_next_version(
        &self,
        contract_id: ContractId,
        changes: &AttributeChanges,
        assignment_delta: &AssignmentDelta,
        price_delta: &PriceDelta,
    ) -> Result<Contract> {
        let contract = self.load_contract(contract_id).await?;
        self.commit_next_version(
            contract_id,
            contract.current_version_number,
            changes,
            assignment_delta,
            price_delta,
            None,
            None,
        )
        .await
    }

    /// Create version `base_version + 1`.
    ///
    /// Fails with a concurrency error if `base_version` is no longer the
    /// contract's current version, either now or at commit time.
    pub async fn create_next_version_from(
        &self,
        contract_id: ContractId,
        base_version: VersionNumber,
        changes: &AttributeChanges,
        assignment_delta: &AssignmentDelta,
        price_delta: &PriceDelta,
    ) -> Result<Contract> {
        self.commit_next_version(
            contract_id,
            base_version,
            changes,
            assignment_delta,
            price_delta,
            None,
            None,
        )
        .await
    }

    pub(crate) async fn commit_next_version(
        &self,
        contract_id: ContractId,
        base_version: VersionNumber,
        changes: &AttributeChanges,
        assignment_delta: &AssignmentDelta,
        price_delta: &PriceDelta,
        completion: Option<ProposalUpdate>,
        guard: Option<ClaimGuard>,
    ) -> Result<Contract> {
        let contract = self.load_contract(contract_id).await?;
        if contract.current_version_number != base_version {
            warn!(
                contract_id,
                base_version,
                current = contract.current_version_number,
                "Rejected next version built on a stale base"
            );
            return Err(ContractError::version_race(
                contract_id,
                base_version,
                contract.current_version_number,
            ));
        }

        let base = self.reconstruct_as_of(contract_id, base_version).await?;
        let next = self
            .build_next(base, changes, assignment_delta, price_delta)
            .await?;
        let version = next.version_number;

        let result = self
            .store
            .commit_version(VersionWrite {
                snapshot: next,
                expected_version: Some(base_version),
                proposal_id: None,
                completion,
                guard,
            })
            .await;

        match result {
            Ok(contract) => {
                info!(contract_id, version, "Created contract version");
                Ok(contract)
            }
            Err(e @ ContractError::Concurrency { .. }) => {
                warn!(contract_id, version, "Lost version race: {}", e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Forward-copy `base` and apply the delta
    async fn build_next(
        &self,
        base: ContractSnapshot,
        changes: &AttributeChanges,
        assignment_delta: &AssignmentDelta,
        price_delta: &PriceDelta,
    ) -> Result<ContractSnapshot> {
        let attributes = changes.apply(&base.attributes);
        let mut errors = attributes.validate();

        let mut assignments = base.assignments.clone();
        if let Err(e) = assignment_delta.apply(&mut assignments) {
            errors.extend(e);
        }

        let mut prices = base.prices.clone();
        if let Err(e) = price_delta.apply(&mut prices, &assignments.products) {
            errors.extend(e);
        }

        // Carried-forward relationships were validated when they were added
        errors.extend(self.check_references(assignment_delta.additions()).await?);

        if !errors.is_empty() {
            return Err(ContractError::Validation(errors));
        }

        Ok(ContractSnapshot {
            contract_id: base.contract_id,
            version_number: base.version_number + 1,
            attributes,
            assignments,
            prices,
            created_at: Utc::now(),
        })
    }

    /// State of the contract as recorded at `version`
    pub async fn reconstruct_as_of(
        &self,
        contract_id: ContractId,
        version: VersionNumber,
    ) -> Result<ContractSnapshot> {
        let contract = self.load_contract(contract_id).await?;
        if version < 1 || version > contract.current_version_number {
            return Err(ContractError::not_found("Contract version", i64::from(version)));
        }
        self.store
            .snapshot(contract_id, version)
            .await?
            .ok_or_else(|| ContractError::not_found("Contract version", i64::from(version)))
    }

    /// What changed between two versions of one contract
    pub async fn diff_versions(
        &self,
        contract_id: ContractId,
        from: VersionNumber,
        to: VersionNumber,
    ) -> Result<VersionDiff> {
        let before = self.reconstruct_as_of(contract_id, from).await?;
        let after = self.reconstruct_as_of(contract_id, to).await?;
        Ok(diff_snapshots(&before, &after))
    }

    async fn load_contract(&self, contract_id: ContractId) -> Result<Contract> {
        self.store
            .contract(contract_id)
            .await?
            .ok_or_else(|| ContractError::not_found("Contract", contract_id))
    }

    /// Validation messages for references that are missing or inactive
    async fn check_references(
        &self,
        refs: impl Iterator<Item = (AssignmentKind, EntityId)>,
    ) -> Result<Vec<String>> {
        let mut by_kind: BTreeMap<AssignmentKind, BTreeSet<EntityId>> = BTreeMap::new();
        for (kind, id) in refs {
            by_kind.entry(kind).or_default().insert(id);
        }

        let mut errors = Vec::new();
        for (kind, ids) in by_kind {
            let found: BTreeMap<EntityId, bool> = self
                .references
                .entities(kind, &ids)
                .await?
                .into_iter()
                .map(|e| (e.id, e.is_active))
                .collect();
            for id in ids {
                match found.get(&id) {
                    None => errors.push(format!("{} {} does not exist", kind, id)),
                    Some(false) => errors.push(format!("{} {} is inactive", kind, id)),
                    Some(true) => {}
                }
            }
        }
        Ok(errors)
    }
}

/// One assignment in a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRef {
    pub kind: AssignmentKind,
    pub id: EntityId,
}

/// Differences between two contract versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDiff {
    pub contract_id: ContractId,
    pub from_version: VersionNumber,
    pub to_version: VersionNumber,
    pub attributes_changed: bool,
    pub added: Vec<AssignmentRef>,
    pub removed: Vec<AssignmentRef>,
    pub prices_added: Vec<ProductId>,
    pub prices_removed: Vec<ProductId>,
    pub prices_changed: Vec<ProductId>,
}

impl VersionDiff {
    pub fn is_empty(&self) -> bool {
        !self.attributes_changed
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.prices_added.is_empty()
            && self.prices_removed.is_empty()
            && self.prices_changed.is_empty()
    }
}

pub fn diff_snapshots(before: &ContractSnapshot, after: &ContractSnapshot) -> VersionDiff {
    let before_refs: BTreeSet<_> = before.assignments.iter().collect();
    let after_refs: BTreeSet<_> = after.assignments.iter().collect();
    let to_ref = |(kind, id): &(AssignmentKind, EntityId)| AssignmentRef { kind: *kind, id: *id };

    let prices_changed = before
        .prices
        .iter()
        .filter_map(|(product_id, price)| match after.prices.get(product_id) {
            Some(other) if other != price => Some(*product_id),
            _ => None,
        })
        .collect();

    VersionDiff {
        contract_id: after.contract_id,
        from_version: before.version_number,
        to_version: after.version_number,
        attributes_changed: before.attributes != after.attributes,
        added: after_refs.difference(&before_refs).map(to_ref).collect(),
        removed: before_refs.difference(&after_refs).map(to_ref).collect(),
        prices_added: after
            .prices
            .keys()
            .filter(|p| !before.prices.contains_key(p))
            .copied()
            .collect(),
        prices_removed: before
            .prices
            .keys()
            .filter(|p| !after.prices.contains_key(p))
            .copied()
            .collect(),
        prices_changed,
    }
}
