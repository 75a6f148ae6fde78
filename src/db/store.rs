//! Postgres adapter for the store ports.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::queries;
use super::rows::ContractRow;
use crate::error::{ContractError, Result};
use crate::models::{
    AssignmentKind, Contract, ContractAssignments, ContractId, ContractSnapshot, ContractVersion,
    EntityId, NewProposal, ProductId, Proposal, ProposalId, ReferenceEntity, StatusHistoryEntry,
    Suspension, VersionNumber,
};
use crate::store::{
    ClaimGuard, ContractStore, ExistingClaim, ProposalUpdate, ReferenceData, VersionWrite,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_proposal(&self, id: ProposalId) -> Result<Option<Proposal>> {
        let Some(row) = queries::get_proposal(&self.pool, id).await? else {
            return Ok(None);
        };
        let lines = queries::get_proposal_lines(&self.pool, id)
            .await?
            .into_iter()
            .map(|l| l.into_line())
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(row.into_proposal(lines)?))
    }
}

async fn current_ids_by_contract(
    conn: &mut PgConnection,
    kind: AssignmentKind,
    contract_ids: &[ContractId],
) -> Result<BTreeMap<ContractId, BTreeSet<EntityId>>> {
    let mut by_contract: BTreeMap<ContractId, BTreeSet<EntityId>> = BTreeMap::new();
    for row in queries::get_current_assignments(conn, kind, contract_ids).await? {
        by_contract
            .entry(row.contract_id)
            .or_default()
            .insert(row.related_id);
    }
    Ok(by_contract)
}

/// Current-version claims on one product, read through `conn`
async fn load_claims(
    conn: &mut PgConnection,
    product_id: ProductId,
    exclude_contract_id: Option<ContractId>,
    include_suspended: bool,
) -> Result<Vec<ExistingClaim>> {
    let contracts: Vec<ContractRow> = queries::get_contracts_claiming_product(
        conn,
        product_id,
        exclude_contract_id,
        include_suspended,
    )
    .await?;
    if contracts.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<ContractId> = contracts.iter().map(|c| c.id).collect();
    let mut manufacturers = current_ids_by_contract(conn, AssignmentKind::Manufacturer, &ids).await?;
    let mut opcos = current_ids_by_contract(conn, AssignmentKind::OpCo, &ids).await?;

    Ok(contracts
        .into_iter()
        .map(Contract::from)
        .map(|c| ExistingClaim {
            contract_id: c.id,
            version_number: c.current_version_number,
            manufacturer_ids: manufacturers.remove(&c.id).unwrap_or_default(),
            opcos: opcos.remove(&c.id).unwrap_or_default(),
            name: c.attributes.name,
            foreign_id: c.attributes.foreign_id,
            start_date: c.attributes.start_date,
            end_date: c.attributes.end_date,
            is_suspended: c.attributes.is_suspended,
        })
        .collect())
}

/// Lock every guarded product, then re-scan claims inside the transaction
async fn check_guard(conn: &mut PgConnection, guard: &ClaimGuard) -> Result<()> {
    let products = guard.products();
    for product_id in &products {
        queries::lock_product_claims(conn, *product_id).await?;
    }

    let mut overlaps = Vec::new();
    for product_id in products {
        let existing = load_claims(
            conn,
            product_id,
            guard.exclude_contract_id,
            guard.include_suspended,
        )
        .await?;
        overlaps.extend(guard.overlaps(product_id, &existing));
    }
    if overlaps.is_empty() {
        Ok(())
    } else {
        Err(ContractError::Overlapping(overlaps))
    }
}

/// Proposal status compare-and-swap plus lines and history, inside `conn`
async fn write_proposal_update(
    conn: &mut sqlx::PgConnection,
    update: &ProposalUpdate,
) -> Result<()> {
    let proposal = &update.proposal;
    if !queries::update_proposal_if_status(conn, proposal, update.expected_status).await? {
        let found = queries::get_proposal_status(conn, proposal.id).await?;
        return Err(match found {
            None => ContractError::not_found("Proposal", proposal.id),
            Some(status) => ContractError::Concurrency {
                entity: "Proposal",
                id: proposal.id,
                expected: update.expected_status.to_string(),
                found: status,
            },
        });
    }
    queries::replace_proposal_lines(conn, proposal.id, &proposal.lines).await?;
    if let Some(entry) = &update.history {
        queries::insert_status_history(conn, entry).await?;
    }
    Ok(())
}

#[async_trait]
impl ReferenceData for PgStore {
    async fn entities(
        &self,
        kind: AssignmentKind,
        ids: &BTreeSet<EntityId>,
    ) -> Result<Vec<ReferenceEntity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<EntityId> = ids.iter().copied().collect();
        Ok(queries::get_reference_rows(&self.pool, kind, &ids)
            .await?
            .into_iter()
            .map(|row| row.into_entity(kind))
            .collect())
    }
}

#[async_trait]
impl ContractStore for PgStore {
    async fn next_contract_id(&self) -> Result<ContractId> {
        queries::next_contract_id(&self.pool).await
    }

    async fn contract(&self, id: ContractId) -> Result<Option<Contract>> {
        Ok(queries::get_contract(&self.pool, id).await?.map(Contract::from))
    }

    async fn snapshot(
        &self,
        id: ContractId,
        version: VersionNumber,
    ) -> Result<Option<ContractSnapshot>> {
        let Some(row) = queries::get_version(&self.pool, id, version).await? else {
            return Ok(None);
        };

        let mut assignments = ContractAssignments::default();
        for kind in AssignmentKind::ALL {
            let ids = queries::get_version_assignments(&self.pool, kind, id, version).await?;
            assignments.ids_mut(kind).extend(ids);
        }

        let prices = queries::get_version_prices(&self.pool, id, version)
            .await?
            .into_iter()
            .map(|p| (p.product_id, p.price.into()))
            .collect();

        let version_row = ContractVersion::from(row);
        Ok(Some(ContractSnapshot {
            contract_id: id,
            version_number: version,
            attributes: version_row.attributes,
            assignments,
            prices,
            created_at: version_row.created_at,
        }))
    }

    async fn versions(&self, id: ContractId) -> Result<Vec<ContractVersion>> {
        Ok(queries::list_versions(&self.pool, id)
            .await?
            .into_iter()
            .map(ContractVersion::from)
            .collect())
    }

    async fn active_contracts(&self, as_of: NaiveDate) -> Result<Vec<Contract>> {
        Ok(queries::get_active_contracts(&self.pool, as_of)
            .await?
            .into_iter()
            .map(Contract::from)
            .collect())
    }

    async fn claims_for_product(
        &self,
        product_id: ProductId,
        exclude_contract_id: Option<ContractId>,
        include_suspended: bool,
    ) -> Result<Vec<ExistingClaim>> {
        let mut conn = self.pool.acquire().await?;
        load_claims(&mut conn, product_id, exclude_contract_id, include_suspended).await
    }

    async fn commit_version(&self, write: VersionWrite) -> Result<Contract> {
        let snapshot = &write.snapshot;
        let contract_id = snapshot.contract_id;
        let version = snapshot.version_number;

        if version != write.expected_version.map_or(1, |v| v + 1) {
            return Err(ContractError::validation(format!(
                "version {} does not follow {:?}",
                version, write.expected_version
            )));
        }

        let mut tx = self.pool.begin().await?;

        // Product locks come before any row lock, always in ascending order
        if let Some(guard) = &write.guard {
            check_guard(&mut tx, guard).await?;
        }

        // Pointer compare-and-swap first so a lost race writes nothing
        let mut attributes = snapshot.attributes.clone();
        match write.expected_version {
            None => {
                let inserted = queries::insert_contract(
                    &mut tx,
                    contract_id,
                    &snapshot.attributes,
                    version,
                    write.proposal_id,
                )
                .await?;
                if !inserted {
                    return Err(ContractError::Concurrency {
                        entity: "Contract",
                        id: contract_id,
                        expected: "no contract".to_string(),
                        found: "existing contract".to_string(),
                    });
                }
            }
            Some(expected) => {
                let advanced = queries::advance_contract(
                    &mut tx,
                    contract_id,
                    &snapshot.attributes,
                    expected,
                    version,
                )
                .await?;
                let Some((is_suspended, suspended_date)) = advanced else {
                    // Dropping the transaction rolls it back
                    let found = queries::get_contract(&self.pool, contract_id).await?;
                    return Err(match found {
                        None => ContractError::not_found("Contract", contract_id),
                        Some(c) => {
                            warn!(contract_id, expected, found = c.current_version_number, "Version pointer moved");
                            ContractError::version_race(contract_id, expected, c.current_version_number)
                        }
                    });
                };
                attributes.is_suspended = is_suspended;
                attributes.suspended_date = suspended_date;
            }
        }

        queries::insert_version(&mut tx, contract_id, version, &attributes).await?;
        for kind in AssignmentKind::ALL {
            let ids: Vec<EntityId> = snapshot.assignments.ids(kind).iter().copied().collect();
            queries::write_assignments(&mut tx, kind, contract_id, &ids, version).await?;
        }
        queries::write_prices(&mut tx, contract_id, &snapshot.prices, version).await?;

        if let Some(update) = &write.completion {
            write_proposal_update(&mut tx, update).await?;
        }

        tx.commit().await?;
        debug!(contract_id, version, "Committed contract version");

        queries::get_contract(&self.pool, contract_id)
            .await?
            .map(Contract::from)
            .ok_or_else(|| ContractError::not_found("Contract", contract_id))
    }

    async fn set_suspension(&self, id: ContractId, suspension: Suspension) -> Result<Contract> {
        let (is_suspended, date) = match suspension {
            Suspension::Suspend(date) => (true, Some(date)),
            Suspension::Unsuspend => (false, None),
        };

        let mut tx = self.pool.begin().await?;
        let contract = queries::update_suspension(&mut tx, id, is_suspended, date)
            .await?
            .ok_or_else(|| ContractError::not_found("Contract", id))?;
        tx.commit().await?;

        Ok(contract.into())
    }

    async fn insert_proposal(&self, proposal: NewProposal, actor: &str) -> Result<Proposal> {
        let mut proposal = proposal.into_proposal(0, Utc::now());

        let mut tx = self.pool.begin().await?;
        proposal.id = queries::insert_proposal(&mut tx, &proposal).await?;
        queries::replace_proposal_lines(&mut tx, proposal.id, &proposal.lines).await?;
        queries::insert_status_history(
            &mut tx,
            &StatusHistoryEntry {
                proposal_id: proposal.id,
                from_status: None,
                to_status: proposal.status,
                actor: actor.to_string(),
                comment: None,
                changed_at: proposal.created_at,
            },
        )
        .await?;
        tx.commit().await?;

        Ok(proposal)
    }

    async fn proposal(&self, id: ProposalId) -> Result<Option<Proposal>> {
        self.load_proposal(id).await
    }

    async fn update_proposal(&self, update: ProposalUpdate) -> Result<Proposal> {
        let id = update.proposal.id;
        let mut tx = self.pool.begin().await?;
        write_proposal_update(&mut tx, &update).await?;
        tx.commit().await?;

        self.load_proposal(id)
            .await?
            .ok_or_else(|| ContractError::not_found("Proposal", id))
    }

    async fn status_history(&self, id: ProposalId) -> Result<Vec<StatusHistoryEntry>> {
        queries::get_status_history(&self.pool, id)
            .await?
            .into_iter()
            .map(|row| row.into_entry())
            .collect()
    }
}
