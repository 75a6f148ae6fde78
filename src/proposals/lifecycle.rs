//! Proposal workflow: status transitions, conflict checks and completion into
//! a contract version.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use super::transitions::{validate_transition, TransitionMode};
use crate::conflicts::{Claim, ConflictReport, ConflictReporter, OverlapEngine};
use crate::error::{ContractError, Result};
use crate::models::{
    AmendmentAction, AssignmentKind, Contract, ContractAssignments, NewProposal, ProductId,
    ProductProposalStatus, Proposal, ProposalId, ProposalRevision, ProposalStatus, ProposalType,
    StatusHistoryEntry,
};
use crate::repository::ContractRepository;
use crate::store::{ClaimGuard, ContractStore, ProposalUpdate};
use crate::versioning::{AssignmentDelta, AttributeChanges, PriceDelta};

/// Result of a successful completion
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub proposal: Proposal,
    pub contract: Contract,
}

pub struct ProposalLifecycle {
    store: Arc<dyn ContractStore>,
    repository: Arc<ContractRepository>,
    engine: Arc<OverlapEngine>,
    reporter: Arc<ConflictReporter>,
}

impl ProposalLifecycle {
    pub fn new(
        store: Arc<dyn ContractStore>,
        repository: Arc<ContractRepository>,
        engine: Arc<OverlapEngine>,
        reporter: Arc<ConflictReporter>,
    ) -> Self {
        Self {
            store,
            repository,
            engine,
            reporter,
        }
    }

    /// Store a new proposal in Requested status
    pub async fn create_proposal(&self, new: NewProposal, actor: &str) -> Result<Proposal> {
        let errors = new.clone().into_proposal(0, Utc::now()).validate();
        if !errors.is_empty() {
            return Err(ContractError::Validation(errors));
        }
        if let Some(contract_id) = new.amended_contract_id {
            self.repository.get_contract(contract_id).await?;
        }

        let proposal = self.store.insert_proposal(new, actor).await?;
        info!(
            proposal_id = proposal.id,
            proposal_type = proposal.proposal_type.as_str(),
            actor,
            "Proposal created"
        );
        Ok(proposal)
    }

    pub async fn get_proposal(&self, id: ProposalId) -> Result<Proposal> {
        self.store
            .proposal(id)
            .await?
            .ok_or_else(|| ContractError::not_found("Proposal", id))
    }

    pub async fn status_history(&self, id: ProposalId) -> Result<Vec<StatusHistoryEntry>> {
        self.get_proposal(id).await?;
        self.store.status_history(id).await
    }

    /// Move a proposal along the pipeline.
    ///
    /// Completion goes through `submit_for_completion` and rejection through
    /// `reject`, since both carry extra requirements.
    pub async fn transition(
        &self,
        id: ProposalId,
        to: ProposalStatus,
        mode: TransitionMode,
        actor: &str,
        comment: Option<String>,
    ) -> Result<Proposal> {
        match to {
            ProposalStatus::Completed => {
                return Err(ContractError::validation(
                    "proposals are completed through submit_for_completion",
                ))
            }
            ProposalStatus::Rejected => {
                return Err(ContractError::validation("rejecting a proposal needs a reason"))
            }
            _ => {}
        }

        let mut proposal = self.get_proposal(id).await?;
        let from = proposal.status;
        validate_transition(from, to, mode)?;

        if to == ProposalStatus::Submitted {
            let mut errors = proposal.validate();
            if let Err(e) = proposal.opco_scope.resolve() {
                errors.push(e);
            }
            if !errors.is_empty() {
                return Err(ContractError::Validation(errors));
            }
        }

        proposal.status = to;
        let updated = self
            .store
            .update_proposal(ProposalUpdate {
                history: Some(history_entry(id, from, to, actor, comment)),
                proposal,
                expected_status: from,
            })
            .await?;

        info!(proposal_id = id, %from, %to, actor, ?mode, "Proposal status changed");
        Ok(updated)
    }

    /// Reject from any non-terminal status; the reason is required
    pub async fn reject(&self, id: ProposalId, reason: &str, actor: &str) -> Result<Proposal> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ContractError::validation("reject reason is required"));
        }

        let mut proposal = self.get_proposal(id).await?;
        let from = proposal.status;
        validate_transition(from, ProposalStatus::Rejected, TransitionMode::Standard)?;

        proposal.status = ProposalStatus::Rejected;
        proposal.reject_reason = Some(reason.to_string());
        let updated = self
            .store
            .update_proposal(ProposalUpdate {
                history: Some(history_entry(
                    id,
                    from,
                    ProposalStatus::Rejected,
                    actor,
                    Some(reason.to_string()),
                )),
                proposal,
                expected_status: from,
            })
            .await?;

        info!(proposal_id = id, %from, actor, "Proposal rejected");
        Ok(updated)
    }

    /// Edit header fields or lines while the proposal is still editable
    pub async fn revise_proposal(
        &self,
        id: ProposalId,
        revision: ProposalRevision,
        actor: &str,
    ) -> Result<Proposal> {
        let mut proposal = self.get_proposal(id).await?;
        ensure_editable(&proposal)?;
        let status = proposal.status;

        revision.apply(&mut proposal);
        let errors = proposal.validate();
        if !errors.is_empty() {
            return Err(ContractError::Validation(errors));
        }

        let updated = self
            .store
            .update_proposal(ProposalUpdate {
                proposal,
                expected_status: status,
                history: None,
            })
            .await?;
        info!(proposal_id = id, actor, "Proposal revised");
        Ok(updated)
    }

    /// Accept, reject or re-propose one line
    pub async fn set_line_status(
        &self,
        id: ProposalId,
        line_id: i32,
        status: ProductProposalStatus,
        actor: &str,
    ) -> Result<Proposal> {
        let mut proposal = self.get_proposal(id).await?;
        ensure_editable(&proposal)?;
        let expected_status = proposal.status;

        let line = proposal
            .lines
            .iter_mut()
            .find(|l| l.line_id == line_id)
            .ok_or_else(|| ContractError::not_found("Proposal line", i64::from(line_id)))?;
        line.status = status;

        let updated = self
            .store
            .update_proposal(ProposalUpdate {
                proposal,
                expected_status,
                history: None,
            })
            .await?;
        info!(proposal_id = id, line_id, status = status.as_str(), actor, "Proposal line status set");
        Ok(updated)
    }

    /// Non-authoritative conflict check; completion re-runs it
    pub async fn check_conflicts(&self, id: ProposalId) -> Result<ConflictReport> {
        let proposal = self.get_proposal(id).await?;
        self.conflicts_for(&proposal).await
    }

    /// Claims the proposal would hold once completed. An amendment re-claims
    /// every product left on the contract under its new dates and scope.
    async fn claims_for(&self, proposal: &Proposal) -> Result<Vec<Claim>> {
        match proposal.proposal_type {
            ProposalType::NewContract => build_claims(proposal, None),
            ProposalType::Amendment => {
                let contract_id = proposal.amended_contract_id.ok_or_else(|| {
                    ContractError::validation("amendment proposals need an amended contract")
                })?;
                let current = self.repository.get_current_snapshot(contract_id).await?;
                build_claims(proposal, Some(&current.assignments.products))
            }
        }
    }

    async fn conflicts_for(&self, proposal: &Proposal) -> Result<ConflictReport> {
        let claims = self.claims_for(proposal).await?;
        let overlaps = self
            .engine
            .find_overlaps(&claims, proposal.amended_contract_id)
            .await?;
        self.reporter.build_report(Some(proposal.id), &overlaps).await
    }

    /// Re-check conflicts and, when clear, write the contract version and
    /// mark the proposal Completed in the same commit.
    ///
    /// On any failure the proposal stays Submitted and no version is written.
    pub async fn submit_for_completion(
        &self,
        id: ProposalId,
        actor: &str,
    ) -> Result<CompletionOutcome> {
        let proposal = self.get_proposal(id).await?;
        if proposal.status != ProposalStatus::Submitted {
            return Err(ContractError::InvalidTransition {
                from: proposal.status,
                to: ProposalStatus::Completed,
            });
        }
        let errors = proposal.validate();
        if !errors.is_empty() {
            return Err(ContractError::Validation(errors));
        }

        let report = self.conflicts_for(&proposal).await?;
        if report.has_conflicts {
            warn!(
                proposal_id = id,
                conflicts = report.total_conflict_count,
                contracts = ?report.conflicting_contract_ids(),
                "Proposal completion blocked by conflicts"
            );
            return Err(ContractError::Conflict(Box::new(report)));
        }

        let committed = match proposal.proposal_type {
            ProposalType::NewContract => self.complete_new_contract(proposal, actor).await,
            ProposalType::Amendment => self.complete_amendment(proposal, actor).await,
        };
        let contract = match committed {
            Ok(contract) => contract,
            // A competing completion claimed the same products first
            Err(ContractError::Overlapping(overlaps)) => {
                let report = self.reporter.build_report(Some(id), &overlaps).await?;
                warn!(
                    proposal_id = id,
                    conflicts = report.total_conflict_count,
                    contracts = ?report.conflicting_contract_ids(),
                    "Proposal completion lost to an overlapping commit"
                );
                return Err(ContractError::Conflict(Box::new(report)));
            }
            Err(e) => return Err(e),
        };

        let proposal = self.get_proposal(id).await?;
        info!(
            proposal_id = id,
            contract_id = contract.id,
            version = contract.current_version_number,
            actor,
            "Proposal completed"
        );
        Ok(CompletionOutcome { proposal, contract })
    }

    async fn complete_new_contract(&self, proposal: Proposal, actor: &str) -> Result<Contract> {
        let terms = proposal
            .terms
            .clone()
            .ok_or_else(|| ContractError::validation("new contract proposals need terms"))?;
        let opcos = proposal
            .opco_scope
            .resolve()
            .map_err(ContractError::validation)?;

        let mut errors = Vec::new();
        let mut assignments = ContractAssignments::default();
        let mut prices = BTreeMap::new();
        for line in proposal.lines.iter().filter(|l| l.claims_product()) {
            if !assignments.products.insert(line.product_id) {
                errors.push(format!(
                    "product {} appears on more than one line",
                    line.product_id
                ));
            }
            prices.insert(line.product_id, line.price.clone());
        }
        if !errors.is_empty() {
            return Err(ContractError::Validation(errors));
        }
        assignments.manufacturers.insert(proposal.manufacturer_id);
        assignments.distributors = proposal.distributor_ids.clone().unwrap_or_default();
        assignments.industries = proposal.industry_ids.clone().unwrap_or_default();
        assignments.opcos = opcos;

        let guard = ClaimGuard {
            claims: build_claims(&proposal, None)?,
            exclude_contract_id: None,
            include_suspended: self.engine.include_suspended(),
        };
        let contract_id = self.store.next_contract_id().await?;
        let attributes = terms.to_attributes(proposal.start_date, proposal.end_date);
        let proposal_id = proposal.id;
        let completion = completed(proposal, contract_id, 1, actor);

        self.repository
            .versions()
            .commit_initial_version(
                contract_id,
                attributes,
                assignments,
                prices,
                Some(proposal_id),
                Some(completion),
                Some(guard),
            )
            .await
    }

    async fn complete_amendment(&self, proposal: Proposal, actor: &str) -> Result<Contract> {
        let contract_id = proposal
            .amended_contract_id
            .ok_or_else(|| ContractError::validation("amendment proposals need an amended contract"))?;
        let contract = self.repository.get_contract(contract_id).await?;
        let base_version = contract.current_version_number;
        let base = self.repository.snapshot_as_of(contract_id, base_version).await?;

        let mut errors = Vec::new();
        if !base.assignments.manufacturers.contains(&proposal.manufacturer_id) {
            errors.push(format!(
                "manufacturer {} is not on contract {}",
                proposal.manufacturer_id, contract_id
            ));
        }

        let mut changes = AttributeChanges {
            start_date: Some(proposal.start_date),
            end_date: Some(proposal.end_date),
            ..Default::default()
        };
        if let Some(terms) = &proposal.terms {
            changes.name = Some(terms.name.clone());
            changes.foreign_id = Some(terms.foreign_id.clone());
            changes.reference_number = Some(terms.reference_number.clone());
            changes.billback_name = Some(terms.billback_name.clone());
            changes.terms = Some(terms.terms.clone());
            changes.notes = Some(terms.notes.clone());
            changes.contact_person = Some(terms.contact_person.clone());
            changes.program_type_codes = Some(terms.program_type_codes.clone());
        }

        let mut assignment_delta = AssignmentDelta::new();
        match proposal.opco_scope.resolve() {
            Ok(opcos) => {
                assignment_delta =
                    assignment_delta.replace(&base.assignments.opcos, AssignmentKind::OpCo, &opcos)
            }
            Err(e) => errors.push(e),
        }
        if let Some(ids) = &proposal.distributor_ids {
            assignment_delta =
                assignment_delta.replace(&base.assignments.distributors, AssignmentKind::Distributor, ids);
        }
        if let Some(ids) = &proposal.industry_ids {
            assignment_delta =
                assignment_delta.replace(&base.assignments.industries, AssignmentKind::Industry, ids);
        }

        let mut price_delta = PriceDelta::new();
        let mut touched = BTreeSet::new();
        for line in proposal
            .lines
            .iter()
            .filter(|l| l.status != ProductProposalStatus::Rejected)
        {
            let product_id = line.product_id;
            if !touched.insert(product_id) {
                errors.push(format!("product {} appears on more than one line", product_id));
                continue;
            }
            let assigned = base.assignments.products.contains(&product_id);
            match line.amendment_action {
                Some(AmendmentAction::Add) if assigned => errors.push(format!(
                    "line {}: product {} is already on contract {}",
                    line.line_id, product_id, contract_id
                )),
                Some(AmendmentAction::Add) => {
                    assignment_delta = assignment_delta.add(AssignmentKind::Product, product_id);
                    price_delta = price_delta.upsert(product_id, line.price.clone());
                }
                Some(AmendmentAction::Update) if !assigned => errors.push(format!(
                    "line {}: product {} is not on contract {}",
                    line.line_id, product_id, contract_id
                )),
                Some(AmendmentAction::Update) => {
                    price_delta = price_delta.upsert(product_id, line.price.clone());
                }
                Some(AmendmentAction::Remove) if !assigned => errors.push(format!(
                    "line {}: product {} is not on contract {}",
                    line.line_id, product_id, contract_id
                )),
                Some(AmendmentAction::Remove) => {
                    assignment_delta = assignment_delta.remove(AssignmentKind::Product, product_id);
                }
                None => errors.push(format!("line {}: amendment lines need an action", line.line_id)),
            }
        }
        if !errors.is_empty() {
            return Err(ContractError::Validation(errors));
        }

        let guard = ClaimGuard {
            claims: build_claims(&proposal, Some(&base.assignments.products))?,
            exclude_contract_id: Some(contract_id),
            include_suspended: self.engine.include_suspended(),
        };
        let completion = completed(proposal, contract_id, base_version + 1, actor);
        self.repository
            .versions()
            .commit_next_version(
                contract_id,
                base_version,
                &changes,
                &assignment_delta,
                &price_delta,
                Some(completion),
                Some(guard),
            )
            .await
    }
}

fn ensure_editable(proposal: &Proposal) -> Result<()> {
    if proposal.status.is_editable() {
        Ok(())
    } else {
        Err(ContractError::validation(format!(
            "proposal {} cannot be edited in status {}",
            proposal.id, proposal.status
        )))
    }
}

fn history_entry(
    id: ProposalId,
    from: ProposalStatus,
    to: ProposalStatus,
    actor: &str,
    comment: Option<String>,
) -> StatusHistoryEntry {
    StatusHistoryEntry {
        proposal_id: id,
        from_status: Some(from),
        to_status: to,
        actor: actor.to_string(),
        comment,
        changed_at: Utc::now(),
    }
}

/// The Submitted -> Completed update that rides along with the version write
fn completed(
    mut proposal: Proposal,
    contract_id: i64,
    version: i32,
    actor: &str,
) -> ProposalUpdate {
    for line in proposal.lines.iter_mut() {
        if line.status != ProductProposalStatus::Rejected {
            line.status = ProductProposalStatus::Accepted;
        }
    }
    proposal.status = ProposalStatus::Completed;
    proposal.contract_id = Some(contract_id);
    proposal.contract_version_number = Some(version);

    ProposalUpdate {
        history: Some(history_entry(
            proposal.id,
            ProposalStatus::Submitted,
            ProposalStatus::Completed,
            actor,
            Some(format!("contract {} version {}", contract_id, version)),
        )),
        proposal,
        expected_status: ProposalStatus::Submitted,
    }
}

/// Claims a proposal would make once completed.
///
/// `base_products` is the amended contract's current product set; an
/// amendment claims it plus its Add lines, minus its Remove lines. Without a
/// base only the lines themselves are claimed.
pub fn build_claims(
    proposal: &Proposal,
    base_products: Option<&BTreeSet<ProductId>>,
) -> Result<Vec<Claim>> {
    let opcos = proposal
        .opco_scope
        .resolve()
        .map_err(ContractError::validation)?;

    let products: BTreeSet<ProductId> = match base_products {
        None => proposal
            .lines
            .iter()
            .filter(|l| l.claims_product())
            .map(|l| l.product_id)
            .collect(),
        Some(base) => {
            let mut products = base.clone();
            for line in proposal
                .lines
                .iter()
                .filter(|l| l.status != ProductProposalStatus::Rejected)
            {
                match line.amendment_action {
                    Some(AmendmentAction::Add) => {
                        products.insert(line.product_id);
                    }
                    Some(AmendmentAction::Remove) => {
                        products.remove(&line.product_id);
                    }
                    Some(AmendmentAction::Update) | None => {}
                }
            }
            products
        }
    };

    Ok(products
        .into_iter()
        .map(|product_id| Claim {
            product_id,
            opcos: opcos.clone(),
            start_date: proposal.start_date,
            end_date: proposal.end_date,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReferenceCache;
    use crate::models::{
        ContractId, ContractSnapshot, ContractTerms, ContractVersion, OpCoScope, PriceTerms,
        ProposalProduct, ReferenceEntity, Suspension, VersionNumber,
    };
    use crate::store::{ExistingClaim, MemoryStore, VersionWrite};
    use crate::versioning::VersionStore;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Harness {
        store: Arc<dyn ContractStore>,
        repository: Arc<ContractRepository>,
        lifecycle: Arc<ProposalLifecycle>,
    }

    /// Delays every version commit, like a database round trip
    struct SlowCommits {
        inner: Arc<MemoryStore>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl ContractStore for SlowCommits {
        async fn next_contract_id(&self) -> Result<ContractId> {
            self.inner.next_contract_id().await
        }

        async fn contract(&self, id: ContractId) -> Result<Option<Contract>> {
            self.inner.contract(id).await
        }

        async fn snapshot(
            &self,
            id: ContractId,
            version: VersionNumber,
        ) -> Result<Option<ContractSnapshot>> {
            self.inner.snapshot(id, version).await
        }

        async fn versions(&self, id: ContractId) -> Result<Vec<ContractVersion>> {
            self.inner.versions(id).await
        }

        async fn active_contracts(&self, as_of: NaiveDate) -> Result<Vec<Contract>> {
            self.inner.active_contracts(as_of).await
        }

        async fn claims_for_product(
            &self,
            product_id: ProductId,
            exclude_contract_id: Option<ContractId>,
            include_suspended: bool,
        ) -> Result<Vec<ExistingClaim>> {
            self.inner
                .claims_for_product(product_id, exclude_contract_id, include_suspended)
                .await
        }

        async fn commit_version(&self, write: VersionWrite) -> Result<Contract> {
            tokio::time::sleep(self.delay).await;
            self.inner.commit_version(write).await
        }

        async fn set_suspension(&self, id: ContractId, suspension: Suspension) -> Result<Contract> {
            self.inner.set_suspension(id, suspension).await
        }

        async fn insert_proposal(&self, proposal: NewProposal, actor: &str) -> Result<Proposal> {
            self.inner.insert_proposal(proposal, actor).await
        }

        async fn proposal(&self, id: ProposalId) -> Result<Option<Proposal>> {
            self.inner.proposal(id).await
        }

        async fn update_proposal(&self, update: ProposalUpdate) -> Result<Proposal> {
            self.inner.update_proposal(update).await
        }

        async fn status_history(&self, id: ProposalId) -> Result<Vec<StatusHistoryEntry>> {
            self.inner.status_history(id).await
        }
    }

    fn harness(include_suspended: bool) -> Harness {
        let memory = reference_store();
        harness_over(memory.clone(), memory, include_suspended)
    }

    fn slow_harness() -> Harness {
        let memory = reference_store();
        let slow = Arc::new(SlowCommits {
            inner: memory.clone(),
            delay: Duration::from_millis(50),
        });
        harness_over(slow, memory, false)
    }

    fn harness_over(
        store: Arc<dyn ContractStore>,
        references: Arc<MemoryStore>,
        include_suspended: bool,
    ) -> Harness {
        let versions = Arc::new(VersionStore::new(store.clone(), references.clone()));
        let repository = Arc::new(ContractRepository::new(store.clone(), versions));
        let engine = Arc::new(OverlapEngine::new(repository.clone(), include_suspended));
        let cache = ReferenceCache::new(references, Duration::from_secs(60), 1_000);
        let reporter = Arc::new(ConflictReporter::new(cache));
        let lifecycle = Arc::new(ProposalLifecycle::new(
            store.clone(),
            repository.clone(),
            engine,
            reporter,
        ));
        Harness {
            store,
            repository,
            lifecycle,
        }
    }

    fn reference_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new().with_references([
            ReferenceEntity::new(AssignmentKind::Manufacturer, 50, "Acme Foods"),
            ReferenceEntity::new(AssignmentKind::Manufacturer, 51, "Zenith Farms"),
            ReferenceEntity::new(AssignmentKind::Distributor, 60, "Northline"),
            ReferenceEntity::new(AssignmentKind::OpCo, 1, "Denver"),
            ReferenceEntity::new(AssignmentKind::OpCo, 2, "Phoenix"),
            ReferenceEntity::new(AssignmentKind::Product, 10, "Chicken Breast").with_code("CB-10"),
            ReferenceEntity::new(AssignmentKind::Product, 11, "Chicken Thigh"),
            ReferenceEntity::new(AssignmentKind::Product, 12, "Turkey Breast"),
        ]))
    }

    fn allowance(value: rust_decimal::Decimal) -> PriceTerms {
        PriceTerms {
            allowance: Some(value),
            ..Default::default()
        }
    }

    fn new_contract(
        manufacturer_id: i64,
        scope: OpCoScope,
        start: NaiveDate,
        end: Option<NaiveDate>,
        products: &[i64],
    ) -> NewProposal {
        NewProposal {
            proposal_type: ProposalType::NewContract,
            manufacturer_id,
            distributor_ids: Some([60].into_iter().collect()),
            industry_ids: None,
            opco_scope: scope,
            start_date: start,
            end_date: end,
            due_date: None,
            amended_contract_id: None,
            terms: Some(ContractTerms {
                name: "Poultry Program".to_string(),
                foreign_id: Some("EXT-1".to_string()),
                ..Default::default()
            }),
            lines: products
                .iter()
                .enumerate()
                .map(|(i, p)| ProposalProduct::new(i as i32 + 1, *p).with_price(allowance(dec!(1.25))))
                .collect(),
        }
    }

    fn restricted(ids: &[i64]) -> OpCoScope {
        OpCoScope::Restricted(ids.iter().copied().collect())
    }

    impl Harness {
        async fn submitted(&self, new: NewProposal) -> Proposal {
            let p = self.lifecycle.create_proposal(new, "buyer").await.unwrap();
            for to in [ProposalStatus::Pending, ProposalStatus::Saved, ProposalStatus::Submitted] {
                self.lifecycle
                    .transition(p.id, to, TransitionMode::Standard, "buyer", None)
                    .await
                    .unwrap();
            }
            self.lifecycle.get_proposal(p.id).await.unwrap()
        }

        /// Contract A: OpCo 1, product 10, first half of 2025
        async fn contract_a(&self) -> Contract {
            let p = self
                .submitted(new_contract(
                    50,
                    restricted(&[1]),
                    date(2025, 1, 1),
                    Some(date(2025, 6, 30)),
                    &[10],
                ))
                .await;
            self.lifecycle
                .submit_for_completion(p.id, "approver")
                .await
                .unwrap()
                .contract
        }
    }

    #[tokio::test]
    async fn test_new_contract_completion_creates_version_one() {
        let h = harness(false);
        let p = h
            .submitted(new_contract(
                50,
                restricted(&[1]),
                date(2025, 1, 1),
                Some(date(2025, 6, 30)),
                &[10, 11],
            ))
            .await;

        let outcome = h.lifecycle.submit_for_completion(p.id, "approver").await.unwrap();
        assert_eq!(outcome.contract.current_version_number, 1);
        assert_eq!(outcome.contract.proposal_id, Some(p.id));
        assert_eq!(outcome.proposal.status, ProposalStatus::Completed);
        assert_eq!(outcome.proposal.contract_id, Some(outcome.contract.id));
        assert!(outcome
            .proposal
            .lines
            .iter()
            .all(|l| l.status == ProductProposalStatus::Accepted));

        let snapshot = h.repository.get_current_snapshot(outcome.contract.id).await.unwrap();
        assert_eq!(snapshot.assignments.products, [10, 11].into_iter().collect());
        assert_eq!(snapshot.assignments.manufacturers, [50].into_iter().collect());
        assert_eq!(snapshot.assignments.distributors, [60].into_iter().collect());
        assert_eq!(snapshot.prices[&10].allowance, Some(dec!(1.25)));
        assert_eq!(snapshot.attributes.foreign_id.as_deref(), Some("EXT-1"));

        let history = h.lifecycle.status_history(p.id).await.unwrap();
        let path: Vec<ProposalStatus> = history.iter().map(|e| e.to_status).collect();
        assert_eq!(
            path,
            vec![
                ProposalStatus::Requested,
                ProposalStatus::Pending,
                ProposalStatus::Saved,
                ProposalStatus::Submitted,
                ProposalStatus::Completed,
            ]
        );
        assert_eq!(history[4].actor, "approver");
    }

    #[tokio::test]
    async fn test_conflicting_proposal_stays_submitted() {
        let h = harness(false);
        let a = h.contract_a().await;

        let p = h
            .submitted(new_contract(
                51,
                restricted(&[1]),
                date(2025, 6, 1),
                Some(date(2025, 12, 31)),
                &[10],
            ))
            .await;

        let err = h.lifecycle.submit_for_completion(p.id, "approver").await.unwrap_err();
        let report = match err {
            ContractError::Conflict(report) => report,
            other => panic!("expected conflict, got {:?}", other),
        };
        assert_eq!(report.total_conflict_count, 1);
        let detail = &report.conflicts[0];
        assert_eq!(detail.conflicting_contract_id, a.id);
        assert_eq!(detail.overlap_start_date, date(2025, 6, 1));
        assert_eq!(detail.overlap_end_date, Some(date(2025, 6, 30)));
        assert!(!detail.is_nationwide_conflict);
        assert_eq!(detail.conflicting_manufacturer_name.as_deref(), Some("Acme Foods"));

        let stored = h.lifecycle.get_proposal(p.id).await.unwrap();
        assert_eq!(stored.status, ProposalStatus::Submitted);
        assert_eq!(stored.contract_id, None);
        assert!(h.store.contract(a.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nationwide_proposal_conflicts_with_restricted_contract() {
        let h = harness(false);
        h.contract_a().await;

        let p = h
            .lifecycle
            .create_proposal(
                new_contract(51, OpCoScope::Nationwide, date(2025, 6, 1), Some(date(2025, 12, 31)), &[10]),
                "buyer",
            )
            .await
            .unwrap();
        let report = h.lifecycle.check_conflicts(p.id).await.unwrap();
        assert_eq!(report.total_conflict_count, 1);
        assert!(report.conflicts[0].is_nationwide_conflict);
        assert_eq!(report.conflicts[0].overlapping_opcos.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_line_makes_no_claim() {
        let h = harness(false);
        h.contract_a().await;

        let p = h
            .lifecycle
            .create_proposal(
                new_contract(51, restricted(&[1]), date(2025, 6, 1), None, &[10, 12]),
                "buyer",
            )
            .await
            .unwrap();
        assert!(h.lifecycle.check_conflicts(p.id).await.unwrap().has_conflicts);

        h.lifecycle
            .set_line_status(p.id, 1, ProductProposalStatus::Rejected, "buyer")
            .await
            .unwrap();
        assert!(!h.lifecycle.check_conflicts(p.id).await.unwrap().has_conflicts);
    }

    #[tokio::test]
    async fn test_suspended_contract_blocks_only_when_configured() {
        for (include_suspended, expected) in [(false, 0), (true, 1)] {
            let h = harness(include_suspended);
            let a = h.contract_a().await;
            h.repository.suspend(a.id, date(2025, 2, 1)).await.unwrap();

            let p = h
                .lifecycle
                .create_proposal(
                    new_contract(51, restricted(&[1]), date(2025, 3, 1), None, &[10]),
                    "buyer",
                )
                .await
                .unwrap();
            let report = h.lifecycle.check_conflicts(p.id).await.unwrap();
            assert_eq!(report.total_conflict_count, expected);
        }
    }

    fn amendment(contract_id: i64, lines: Vec<ProposalProduct>) -> NewProposal {
        NewProposal {
            proposal_type: ProposalType::Amendment,
            manufacturer_id: 50,
            distributor_ids: None,
            industry_ids: None,
            opco_scope: restricted(&[1, 2]),
            start_date: date(2025, 1, 1),
            end_date: Some(date(2025, 12, 31)),
            due_date: None,
            amended_contract_id: Some(contract_id),
            terms: None,
            lines,
        }
    }

    #[tokio::test]
    async fn test_amendment_does_not_conflict_with_itself() {
        let h = harness(false);
        let a = h.contract_a().await;

        let p = h
            .submitted(amendment(
                a.id,
                vec![
                    ProposalProduct::new(1, 10)
                        .with_action(AmendmentAction::Update)
                        .with_price(allowance(dec!(1.40))),
                    ProposalProduct::new(2, 11)
                        .with_action(AmendmentAction::Add)
                        .with_price(allowance(dec!(0.95))),
                ],
            ))
            .await;
        assert!(!h.lifecycle.check_conflicts(p.id).await.unwrap().has_conflicts);

        let outcome = h.lifecycle.submit_for_completion(p.id, "approver").await.unwrap();
        assert_eq!(outcome.contract.id, a.id);
        assert_eq!(outcome.contract.current_version_number, 2);
        assert_eq!(outcome.proposal.contract_version_number, Some(2));

        let v1 = h.repository.snapshot_as_of(a.id, 1).await.unwrap();
        let v2 = h.repository.snapshot_as_of(a.id, 2).await.unwrap();
        assert_eq!(v1.prices[&10].allowance, Some(dec!(1.25)));
        assert_eq!(v2.prices[&10].allowance, Some(dec!(1.40)));
        assert_eq!(v2.prices[&11].allowance, Some(dec!(0.95)));
        assert_eq!(v2.assignments.opcos, [1, 2].into_iter().collect());
        assert_eq!(v2.assignments.distributors, v1.assignments.distributors);
        assert_eq!(v2.attributes.end_date, Some(date(2025, 12, 31)));
        assert_eq!(v2.attributes.name, v1.attributes.name);
    }

    #[tokio::test]
    async fn test_amendment_remove_retires_product() {
        let h = harness(false);
        let a = h.contract_a().await;

        let p = h
            .submitted(amendment(
                a.id,
                vec![
                    ProposalProduct::new(1, 10).with_action(AmendmentAction::Remove),
                    ProposalProduct::new(2, 12).with_action(AmendmentAction::Add),
                ],
            ))
            .await;
        h.lifecycle.submit_for_completion(p.id, "approver").await.unwrap();

        let current = h.repository.get_current_snapshot(a.id).await.unwrap();
        assert_eq!(current.assignments.products, [12].into_iter().collect());
        assert!(!current.prices.contains_key(&10));
    }

    #[tokio::test]
    async fn test_failed_amendment_leaves_proposal_submitted() {
        let h = harness(false);
        let a = h.contract_a().await;

        let p = h
            .submitted(amendment(
                a.id,
                vec![ProposalProduct::new(1, 10).with_action(AmendmentAction::Add)],
            ))
            .await;
        let err = h.lifecycle.submit_for_completion(p.id, "approver").await.unwrap_err();
        match err {
            ContractError::Validation(errors) => assert!(errors[0].contains("already on contract")),
            other => panic!("expected validation error, got {:?}", other),
        }

        assert_eq!(
            h.lifecycle.get_proposal(p.id).await.unwrap().status,
            ProposalStatus::Submitted
        );
        assert_eq!(h.repository.get_contract(a.id).await.unwrap().current_version_number, 1);
        assert_eq!(h.repository.list_versions(a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_amendment_by_other_manufacturer_is_rejected() {
        let h = harness(false);
        let a = h.contract_a().await;

        let mut new = amendment(
            a.id,
            vec![ProposalProduct::new(1, 10).with_action(AmendmentAction::Update)],
        );
        new.manufacturer_id = 51;
        let p = h.submitted(new).await;

        assert!(matches!(
            h.lifecycle.submit_for_completion(p.id, "approver").await,
            Err(ContractError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unset_scope_is_a_validation_error() {
        let h = harness(false);
        let p = h
            .lifecycle
            .create_proposal(
                new_contract(50, OpCoScope::Unset, date(2025, 1, 1), None, &[10]),
                "buyer",
            )
            .await
            .unwrap();

        assert!(matches!(
            h.lifecycle.check_conflicts(p.id).await,
            Err(ContractError::Validation(_))
        ));
        for to in [ProposalStatus::Pending, ProposalStatus::Saved] {
            h.lifecycle
                .transition(p.id, to, TransitionMode::Standard, "buyer", None)
                .await
                .unwrap();
        }
        assert!(matches!(
            h.lifecycle
                .transition(p.id, ProposalStatus::Submitted, TransitionMode::Standard, "buyer", None)
                .await,
            Err(ContractError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_transition_rules() {
        let h = harness(false);
        let p = h
            .lifecycle
            .create_proposal(
                new_contract(50, OpCoScope::Nationwide, date(2025, 1, 1), None, &[10]),
                "buyer",
            )
            .await
            .unwrap();

        assert!(matches!(
            h.lifecycle
                .transition(p.id, ProposalStatus::Saved, TransitionMode::Standard, "buyer", None)
                .await,
            Err(ContractError::InvalidTransition { .. })
        ));
        assert!(matches!(
            h.lifecycle.submit_for_completion(p.id, "approver").await,
            Err(ContractError::InvalidTransition { .. })
        ));

        let p = h
            .lifecycle
            .transition(
                p.id,
                ProposalStatus::Submitted,
                TransitionMode::AdministrativeOverride,
                "admin",
                Some("expedited".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(p.status, ProposalStatus::Submitted);

        let p = h
            .lifecycle
            .transition(p.id, ProposalStatus::Saved, TransitionMode::Standard, "approver", None)
            .await
            .unwrap();
        assert_eq!(p.status, ProposalStatus::Saved);
    }

    #[tokio::test]
    async fn test_reject_requires_reason_and_is_final() {
        let h = harness(false);
        let p = h
            .lifecycle
            .create_proposal(
                new_contract(50, OpCoScope::Nationwide, date(2025, 1, 1), None, &[10]),
                "buyer",
            )
            .await
            .unwrap();

        assert!(matches!(
            h.lifecycle.reject(p.id, "  ", "approver").await,
            Err(ContractError::Validation(_))
        ));
        let rejected = h.lifecycle.reject(p.id, "Pricing too high", "approver").await.unwrap();
        assert_eq!(rejected.status, ProposalStatus::Rejected);
        assert_eq!(rejected.reject_reason.as_deref(), Some("Pricing too high"));

        assert!(matches!(
            h.lifecycle
                .transition(p.id, ProposalStatus::Pending, TransitionMode::AdministrativeOverride, "admin", None)
                .await,
            Err(ContractError::InvalidTransition { .. })
        ));
        let history = h.lifecycle.status_history(p.id).await.unwrap();
        assert_eq!(history.last().unwrap().comment.as_deref(), Some("Pricing too high"));
    }

    #[tokio::test]
    async fn test_revise_only_while_editable() {
        let h = harness(false);
        let p = h
            .submitted(new_contract(50, OpCoScope::Nationwide, date(2025, 1, 1), None, &[10]))
            .await;

        let revision = ProposalRevision {
            end_date: Some(Some(date(2025, 3, 31))),
            ..Default::default()
        };
        assert!(matches!(
            h.lifecycle.revise_proposal(p.id, revision.clone(), "buyer").await,
            Err(ContractError::Validation(_))
        ));

        h.lifecycle
            .transition(p.id, ProposalStatus::Saved, TransitionMode::Standard, "approver", None)
            .await
            .unwrap();
        let revised = h.lifecycle.revise_proposal(p.id, revision, "buyer").await.unwrap();
        assert_eq!(revised.end_date, Some(date(2025, 3, 31)));
        assert_eq!(revised.status, ProposalStatus::Saved);
    }

    #[tokio::test]
    async fn test_concurrent_completions_succeed_once() {
        let h = harness(false);
        let p = h
            .submitted(new_contract(50, restricted(&[2]), date(2025, 1, 1), None, &[12]))
            .await;

        let first = {
            let lifecycle = h.lifecycle.clone();
            tokio::spawn(async move { lifecycle.submit_for_completion(p.id, "a").await })
        };
        let second = {
            let lifecycle = h.lifecycle.clone();
            tokio::spawn(async move { lifecycle.submit_for_completion(p.id, "b").await })
        };
        let results = [first.await.unwrap(), second.await.unwrap()];

        // The loser sees a stale status, a lost status swap, or the winner's contract
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(ContractError::Concurrency { .. })
                | Err(ContractError::InvalidTransition { .. })
                | Err(ContractError::Conflict(_))
        )));
        let completed = h.lifecycle.get_proposal(p.id).await.unwrap();
        assert_eq!(completed.status, ProposalStatus::Completed);
        let history = h.lifecycle.status_history(p.id).await.unwrap();
        assert_eq!(
            history
                .iter()
                .filter(|e| e.to_status == ProposalStatus::Completed)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_overlapping_proposals_completed_together_yield_one_contract() {
        let h = slow_harness();
        let first = h
            .submitted(new_contract(
                50,
                restricted(&[1]),
                date(2025, 1, 1),
                Some(date(2025, 6, 30)),
                &[10],
            ))
            .await;
        let second = h
            .submitted(new_contract(
                51,
                restricted(&[1]),
                date(2025, 3, 1),
                Some(date(2025, 12, 31)),
                &[10],
            ))
            .await;

        let handles = [first.id, second.id].map(|id| {
            let lifecycle = h.lifecycle.clone();
            tokio::spawn(async move { lifecycle.submit_for_completion(id, "approver").await })
        });
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let winner = results
            .iter()
            .find_map(|r| r.as_ref().ok())
            .unwrap()
            .contract
            .clone();
        let (loser_id, report) = results
            .into_iter()
            .zip([first.id, second.id])
            .find_map(|(r, id)| match r {
                Err(ContractError::Conflict(report)) => Some((id, report)),
                _ => None,
            })
            .expect("the other completion reports the conflict");
        assert_eq!(report.conflicts[0].conflicting_contract_id, winner.id);
        assert_eq!(report.conflicts[0].product_name.as_deref(), Some("Chicken Breast"));

        let loser = h.lifecycle.get_proposal(loser_id).await.unwrap();
        assert_eq!(loser.status, ProposalStatus::Submitted);
        assert_eq!(loser.contract_id, None);
        let active = h.repository.get_active_contracts(date(2025, 4, 1)).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_amendment_dates_are_checked_for_carried_products() {
        let h = harness(false);
        let a = {
            let p = h
                .submitted(new_contract(
                    50,
                    restricted(&[1]),
                    date(2025, 1, 1),
                    Some(date(2025, 6, 30)),
                    &[10, 11],
                ))
                .await;
            h.lifecycle.submit_for_completion(p.id, "approver").await.unwrap().contract
        };
        let b = {
            let p = h
                .submitted(new_contract(
                    51,
                    restricted(&[1]),
                    date(2025, 7, 1),
                    Some(date(2025, 12, 31)),
                    &[11],
                ))
                .await;
            h.lifecycle.submit_for_completion(p.id, "approver").await.unwrap().contract
        };

        // Only product 10 is on a line; the longer term also reaches product 11
        let mut new = amendment(
            a.id,
            vec![ProposalProduct::new(1, 10)
                .with_action(AmendmentAction::Update)
                .with_price(allowance(dec!(1.30)))],
        );
        new.opco_scope = restricted(&[1]);
        let p = h.submitted(new).await;

        let report = h.lifecycle.check_conflicts(p.id).await.unwrap();
        assert_eq!(report.total_conflict_count, 1);
        let detail = &report.conflicts[0];
        assert_eq!(detail.product_id, 11);
        assert_eq!(detail.conflicting_contract_id, b.id);
        assert_eq!(detail.overlap_start_date, date(2025, 7, 1));
        assert_eq!(detail.overlap_end_date, Some(date(2025, 12, 31)));

        assert!(matches!(
            h.lifecycle.submit_for_completion(p.id, "approver").await,
            Err(ContractError::Conflict(_))
        ));
        let current = h.repository.get_current_snapshot(a.id).await.unwrap();
        assert_eq!(current.version_number, 1);
        assert_eq!(current.attributes.end_date, Some(date(2025, 6, 30)));
    }

    #[tokio::test]
    async fn test_version_bump_keeps_concurrent_suspension() {
        let h = slow_harness();
        let a = h.contract_a().await;

        let bump = {
            let repository = h.repository.clone();
            tokio::spawn(async move {
                repository
                    .versions()
                    .create_next_version(
                        a.id,
                        &AttributeChanges {
                            name: Some("Poultry Program 2".to_string()),
                            ..Default::default()
                        },
                        &AssignmentDelta::new(),
                        &PriceDelta::new(),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.repository.suspend(a.id, date(2025, 3, 1)).await.unwrap();

        let bumped = bump.await.unwrap().unwrap();
        assert_eq!(bumped.current_version_number, 2);
        assert!(bumped.attributes.is_suspended);
        let contract = h.repository.get_contract(a.id).await.unwrap();
        assert!(contract.attributes.is_suspended);
        assert_eq!(contract.attributes.suspended_date, Some(date(2025, 3, 1)));
        assert_eq!(contract.attributes.name, "Poultry Program 2");
    }

    #[test]
    fn test_amendment_claims_cover_resulting_product_set() {
        let now = Utc::now();
        let mut proposal = amendment(
            7,
            vec![
                ProposalProduct::new(1, 10).with_action(AmendmentAction::Remove),
                ProposalProduct::new(2, 12).with_action(AmendmentAction::Add),
                ProposalProduct::new(3, 13).with_action(AmendmentAction::Add),
            ],
        )
        .into_proposal(1, now);
        proposal.lines[2].status = ProductProposalStatus::Rejected;

        let base: BTreeSet<ProductId> = [10, 11].into_iter().collect();
        let claims = build_claims(&proposal, Some(&base)).unwrap();
        let products: Vec<ProductId> = claims.iter().map(|c| c.product_id).collect();
        assert_eq!(products, vec![11, 12]);
        assert!(claims.iter().all(|c| c.end_date == Some(date(2025, 12, 31))));
        assert!(claims.iter().all(|c| c.opcos == [1, 2].into_iter().collect()));

        let lines_only = build_claims(&proposal, None).unwrap();
        assert_eq!(lines_only.len(), 1);
        assert_eq!(lines_only[0].product_id, 12);
    }
}
