//! In-process store adapter.
//!
//! Mirrors the relational layout table by table so the same invariants hold
//! as with Postgres: every check of a write happens before the first
//! mutation, under one write lock, which makes each commit all-or-nothing.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::{ContractStore, ExistingClaim, ProposalUpdate, ReferenceData, VersionWrite};
use crate::error::{ContractError, Result};
use crate::models::{
    AssignmentKind, Contract, ContractAssignments, ContractId, ContractSnapshot, ContractVersion,
    EntityId, NewProposal, PriceTerms, ProductId, Proposal, ProposalId, ReferenceEntity,
    StatusHistoryEntry, Suspension, VersionNumber,
};

#[derive(Default)]
struct Tables {
    last_contract_id: ContractId,
    last_proposal_id: ProposalId,
    contracts: BTreeMap<ContractId, Contract>,
    versions: BTreeMap<(ContractId, VersionNumber), ContractVersion>,
    /// (kind, contract, related) -> current_version_number
    current_assignments: BTreeMap<(AssignmentKind, ContractId, EntityId), VersionNumber>,
    assignment_history: BTreeSet<(AssignmentKind, ContractId, EntityId, VersionNumber)>,
    current_prices: BTreeMap<(ContractId, ProductId), (VersionNumber, PriceTerms)>,
    price_history: BTreeMap<(ContractId, ProductId, VersionNumber), PriceTerms>,
    proposals: BTreeMap<ProposalId, Proposal>,
    status_history: Vec<StatusHistoryEntry>,
    references: BTreeMap<(AssignmentKind, EntityId), ReferenceEntity>,
}

impl Tables {
    fn current_ids(&self, kind: AssignmentKind, contract_id: ContractId) -> BTreeSet<EntityId> {
        self.current_assignments
            .range((kind, contract_id, EntityId::MIN)..=(kind, contract_id, EntityId::MAX))
            .map(|((_, _, related), _)| *related)
            .collect()
    }

    fn claims_for(
        &self,
        product_id: ProductId,
        exclude_contract_id: Option<ContractId>,
        include_suspended: bool,
    ) -> Vec<ExistingClaim> {
        self.contracts
            .values()
            .filter(|c| Some(c.id) != exclude_contract_id)
            .filter(|c| include_suspended || !c.attributes.is_suspended)
            .filter(|c| {
                self.current_assignments
                    .contains_key(&(AssignmentKind::Product, c.id, product_id))
            })
            .map(|c| ExistingClaim {
                contract_id: c.id,
                version_number: c.current_version_number,
                name: c.attributes.name.clone(),
                foreign_id: c.attributes.foreign_id.clone(),
                start_date: c.attributes.start_date,
                end_date: c.attributes.end_date,
                is_suspended: c.attributes.is_suspended,
                manufacturer_ids: self.current_ids(AssignmentKind::Manufacturer, c.id),
                opcos: self.current_ids(AssignmentKind::OpCo, c.id),
            })
            .collect()
    }

    fn check_proposal_status(&self, update: &ProposalUpdate) -> Result<()> {
        let stored = self
            .proposals
            .get(&update.proposal.id)
            .ok_or_else(|| ContractError::not_found("Proposal", update.proposal.id))?;
        if stored.status != update.expected_status {
            return Err(ContractError::Concurrency {
                entity: "Proposal",
                id: stored.id,
                expected: update.expected_status.to_string(),
                found: stored.status.to_string(),
            });
        }
        Ok(())
    }

    fn apply_proposal_update(&mut self, update: ProposalUpdate) -> Proposal {
        let mut proposal = update.proposal;
        proposal.updated_at = Utc::now();
        if let Some(entry) = update.history {
            self.status_history.push(entry);
        }
        self.proposals.insert(proposal.id, proposal.clone());
        proposal
    }
}

/// Store backed by in-process maps
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a lookup row
    pub fn insert_reference(&self, entity: ReferenceEntity) {
        self.tables
            .write()
            .references
            .insert((entity.kind, entity.id), entity);
    }

    pub fn with_references(self, entities: impl IntoIterator<Item = ReferenceEntity>) -> Self {
        for entity in entities {
            self.insert_reference(entity);
        }
        self
    }
}

#[async_trait]
impl ReferenceData for MemoryStore {
    async fn entities(
        &self,
        kind: AssignmentKind,
        ids: &BTreeSet<EntityId>,
    ) -> Result<Vec<ReferenceEntity>> {
        let tables = self.tables.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.references.get(&(kind, *id)).cloned())
            .collect())
    }
}

#[async_trait]
impl ContractStore for MemoryStore {
    async fn next_contract_id(&self) -> Result<ContractId> {
        let mut tables = self.tables.write();
        tables.last_contract_id += 1;
        Ok(tables.last_contract_id)
    }

    async fn contract(&self, id: ContractId) -> Result<Option<Contract>> {
        Ok(self.tables.read().contracts.get(&id).cloned())
    }

    async fn snapshot(
        &self,
        id: ContractId,
        version: VersionNumber,
    ) -> Result<Option<ContractSnapshot>> {
        let tables = self.tables.read();
        let Some(row) = tables.versions.get(&(id, version)) else {
            return Ok(None);
        };

        let mut assignments = ContractAssignments::default();
        for (kind, contract_id, related, v) in tables.assignment_history.iter() {
            if *contract_id == id && *v == version {
                assignments.ids_mut(*kind).insert(*related);
            }
        }

        let prices = tables
            .price_history
            .iter()
            .filter(|((contract_id, _, v), _)| *contract_id == id && *v == version)
            .map(|((_, product_id, _), price)| (*product_id, price.clone()))
            .collect();

        Ok(Some(ContractSnapshot {
            contract_id: id,
            version_number: version,
            attributes: row.attributes.clone(),
            assignments,
            prices,
            created_at: row.created_at,
        }))
    }

    async fn versions(&self, id: ContractId) -> Result<Vec<ContractVersion>> {
        let tables = self.tables.read();
        Ok(tables
            .versions
            .range((id, VersionNumber::MIN)..=(id, VersionNumber::MAX))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn active_contracts(&self, as_of: NaiveDate) -> Result<Vec<Contract>> {
        let tables = self.tables.read();
        Ok(tables
            .contracts
            .values()
            .filter(|c| c.is_active_on(as_of))
            .cloned()
            .collect())
    }

    async fn claims_for_product(
        &self,
        product_id: ProductId,
        exclude_contract_id: Option<ContractId>,
        include_suspended: bool,
    ) -> Result<Vec<ExistingClaim>> {
        Ok(self
            .tables
            .read()
            .claims_for(product_id, exclude_contract_id, include_suspended))
    }

    async fn commit_version(&self, write: VersionWrite) -> Result<Contract> {
        let mut tables = self.tables.write();
        let snapshot = write.snapshot;
        let contract_id = snapshot.contract_id;
        let version = snapshot.version_number;

        // Compare-and-swap checks, all before the first mutation
        let existing = tables.contracts.get(&contract_id).cloned();
        match (write.expected_version, &existing) {
            (None, Some(found)) => {
                return Err(ContractError::Concurrency {
                    entity: "Contract",
                    id: contract_id,
                    expected: "no contract".to_string(),
                    found: format!("version {}", found.current_version_number),
                })
            }
            (Some(_), None) => return Err(ContractError::not_found("Contract", contract_id)),
            (Some(expected), Some(found)) if found.current_version_number != expected => {
                return Err(ContractError::version_race(
                    contract_id,
                    expected,
                    found.current_version_number,
                ))
            }
            _ => {}
        }
        if version != write.expected_version.map_or(1, |v| v + 1) {
            return Err(ContractError::validation(format!(
                "version {} does not follow {:?}",
                version, write.expected_version
            )));
        }
        if let Some(update) = &write.completion {
            tables.check_proposal_status(update)?;
        }
        if let Some(guard) = &write.guard {
            let overlaps: Vec<_> = guard
                .products()
                .into_iter()
                .flat_map(|product_id| {
                    let existing = tables.claims_for(
                        product_id,
                        guard.exclude_contract_id,
                        guard.include_suspended,
                    );
                    guard.overlaps(product_id, &existing)
                })
                .collect();
            if !overlaps.is_empty() {
                return Err(ContractError::Overlapping(overlaps));
            }
        }

        let mut attributes = snapshot.attributes.clone();
        if let Some(found) = &existing {
            attributes.is_suspended = found.attributes.is_suspended;
            attributes.suspended_date = found.attributes.suspended_date;
        }

        let now = Utc::now();
        let contract = Contract {
            id: contract_id,
            attributes: attributes.clone(),
            current_version_number: version,
            proposal_id: existing
                .as_ref()
                .and_then(|c| c.proposal_id)
                .or(write.proposal_id),
            created_at: existing.as_ref().map_or(now, |c| c.created_at),
            updated_at: now,
        };
        tables.contracts.insert(contract_id, contract.clone());
        tables.versions.insert(
            (contract_id, version),
            ContractVersion {
                contract_id,
                version_number: version,
                attributes,
                created_at: now,
            },
        );

        tables
            .current_assignments
            .retain(|(_, c, _), _| *c != contract_id);
        for (kind, related) in snapshot.assignments.iter() {
            tables
                .current_assignments
                .insert((kind, contract_id, related), version);
            tables
                .assignment_history
                .insert((kind, contract_id, related, version));
        }

        tables.current_prices.retain(|(c, _), _| *c != contract_id);
        for (product_id, price) in &snapshot.prices {
            tables
                .current_prices
                .insert((contract_id, *product_id), (version, price.clone()));
            tables
                .price_history
                .insert((contract_id, *product_id, version), price.clone());
        }

        if let Some(update) = write.completion {
            tables.apply_proposal_update(update);
        }

        debug!(contract_id, version, "Committed contract version in memory store");
        Ok(contract)
    }

    async fn set_suspension(&self, id: ContractId, suspension: Suspension) -> Result<Contract> {
        let mut tables = self.tables.write();
        let contract = tables
            .contracts
            .get_mut(&id)
            .ok_or_else(|| ContractError::not_found("Contract", id))?;
        suspension.apply(&mut contract.attributes);
        contract.updated_at = Utc::now();
        let contract = contract.clone();

        if let Some(row) = tables
            .versions
            .get_mut(&(id, contract.current_version_number))
        {
            suspension.apply(&mut row.attributes);
        }
        Ok(contract)
    }

    async fn insert_proposal(&self, proposal: NewProposal, actor: &str) -> Result<Proposal> {
        let mut tables = self.tables.write();
        tables.last_proposal_id += 1;
        let proposal = proposal.into_proposal(tables.last_proposal_id, Utc::now());
        tables.status_history.push(StatusHistoryEntry {
            proposal_id: proposal.id,
            from_status: None,
            to_status: proposal.status,
            actor: actor.to_string(),
            comment: None,
            changed_at: proposal.created_at,
        });
        tables.proposals.insert(proposal.id, proposal.clone());
        Ok(proposal)
    }

    async fn proposal(&self, id: ProposalId) -> Result<Option<Proposal>> {
        Ok(self.tables.read().proposals.get(&id).cloned())
    }

    async fn update_proposal(&self, update: ProposalUpdate) -> Result<Proposal> {
        let mut tables = self.tables.write();
        tables.check_proposal_status(&update)?;
        Ok(tables.apply_proposal_update(update))
    }

    async fn status_history(&self, id: ProposalId) -> Result<Vec<StatusHistoryEntry>> {
        Ok(self
            .tables
            .read()
            .status_history
            .iter()
            .filter(|e| e.proposal_id == id)
            .cloned()
            .collect())
    }
}
