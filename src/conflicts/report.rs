//! Explainable conflict reports built from engine overlaps.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::engine::Overlap;
use crate::cache::ReferenceCache;
use crate::error::Result;
use crate::models::{
    AssignmentKind, ContractId, EntityId, OpCoId, ProductId, ProposalId, VersionNumber,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpCoRef {
    pub op_co_id: OpCoId,
    pub op_co_name: Option<String>,
}

/// One product colliding with one existing contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetail {
    pub product_id: ProductId,
    pub product_name: Option<String>,
    pub manufacturer_product_code: Option<String>,
    pub conflicting_contract_id: ContractId,
    pub conflicting_contract_name: String,
    pub conflicting_contract_version_number: VersionNumber,
    pub conflicting_contract_foreign_id: Option<String>,
    pub conflicting_manufacturer_name: Option<String>,
    #[serde(rename = "overlappingOpCos")]
    pub overlapping_opcos: Vec<OpCoRef>,
    pub is_nationwide_conflict: bool,
    pub proposal_start_date: NaiveDate,
    pub proposal_end_date: Option<NaiveDate>,
    pub contract_start_date: NaiveDate,
    pub contract_end_date: Option<NaiveDate>,
    pub overlap_start_date: NaiveDate,
    /// `None` when both sides are open-ended
    pub overlap_end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub proposal_id: Option<ProposalId>,
    pub has_conflicts: bool,
    pub total_conflict_count: usize,
    pub conflicts: Vec<ConflictDetail>,
}

impl ConflictReport {
    pub fn empty(proposal_id: Option<ProposalId>) -> Self {
        Self {
            proposal_id,
            has_conflicts: false,
            total_conflict_count: 0,
            conflicts: Vec::new(),
        }
    }

    /// Conflicts keyed by the contract they collide with
    pub fn grouped_by_contract(&self) -> BTreeMap<ContractId, Vec<&ConflictDetail>> {
        let mut groups: BTreeMap<ContractId, Vec<&ConflictDetail>> = BTreeMap::new();
        for detail in &self.conflicts {
            groups
                .entry(detail.conflicting_contract_id)
                .or_default()
                .push(detail);
        }
        groups
    }

    /// Distinct contracts the candidate collides with
    pub fn conflicting_contract_ids(&self) -> BTreeSet<ContractId> {
        self.conflicts
            .iter()
            .map(|c| c.conflicting_contract_id)
            .collect()
    }
}

/// Resolves names for overlaps and assembles the report
pub struct ConflictReporter {
    references: ReferenceCache,
}

impl ConflictReporter {
    pub fn new(references: ReferenceCache) -> Self {
        Self { references }
    }

    /// Every overlap becomes exactly one detail, ordered by conflicting
    /// contract then product.
    pub async fn build_report(
        &self,
        proposal_id: Option<ProposalId>,
        overlaps: &[Overlap],
    ) -> Result<ConflictReport> {
        if overlaps.is_empty() {
            return Ok(ConflictReport::empty(proposal_id));
        }

        let products: BTreeSet<EntityId> = overlaps.iter().map(|o| o.claim.product_id).collect();
        let opcos: BTreeSet<EntityId> = overlaps.iter().flat_map(|o| o.opcos.iter().copied()).collect();
        let manufacturers: BTreeSet<EntityId> = overlaps
            .iter()
            .filter_map(|o| o.existing.manufacturer_ids.iter().next().copied())
            .collect();

        let product_rows = self.lookup(AssignmentKind::Product, &products).await?;
        let opco_names = self.lookup(AssignmentKind::OpCo, &opcos).await?;
        let manufacturer_names = self.lookup(AssignmentKind::Manufacturer, &manufacturers).await?;

        let mut conflicts: Vec<ConflictDetail> = overlaps
            .iter()
            .map(|o| {
                let product = product_rows.get(&o.claim.product_id);
                // The first manufacturer stands for the contract
                let manufacturer = o
                    .existing
                    .manufacturer_ids
                    .iter()
                    .next()
                    .and_then(|id| manufacturer_names.get(id));
                ConflictDetail {
                    product_id: o.claim.product_id,
                    product_name: product.map(|(name, _)| name.clone()),
                    manufacturer_product_code: product.and_then(|(_, code)| code.clone()),
                    conflicting_contract_id: o.existing.contract_id,
                    conflicting_contract_name: o.existing.name.clone(),
                    conflicting_contract_version_number: o.existing.version_number,
                    conflicting_contract_foreign_id: o.existing.foreign_id.clone(),
                    conflicting_manufacturer_name: manufacturer.map(|(name, _)| name.clone()),
                    overlapping_opcos: o
                        .opcos
                        .iter()
                        .map(|id| OpCoRef {
                            op_co_id: *id,
                            op_co_name: opco_names.get(id).map(|(name, _)| name.clone()),
                        })
                        .collect(),
                    is_nationwide_conflict: o.is_nationwide,
                    proposal_start_date: o.claim.start_date,
                    proposal_end_date: o.claim.end_date,
                    contract_start_date: o.existing.start_date,
                    contract_end_date: o.existing.end_date,
                    overlap_start_date: o.window.start,
                    overlap_end_date: o.window.end,
                }
            })
            .collect();

        conflicts.sort_by(|a, b| {
            (a.conflicting_contract_id, a.product_id, a.proposal_start_date).cmp(&(
                b.conflicting_contract_id,
                b.product_id,
                b.proposal_start_date,
            ))
        });

        Ok(ConflictReport {
            proposal_id,
            has_conflicts: true,
            total_conflict_count: conflicts.len(),
            conflicts,
        })
    }

    async fn lookup(
        &self,
        kind: AssignmentKind,
        ids: &BTreeSet<EntityId>,
    ) -> Result<BTreeMap<EntityId, (String, Option<String>)>> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(self
            .references
            .get_many(kind, ids)
            .await?
            .into_iter()
            .map(|e| (e.id, (e.name.clone(), e.code.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::calculators::DateWindow;
    use crate::conflicts::engine::Claim;
    use crate::models::ReferenceEntity;
    use crate::store::{ExistingClaim, MemoryStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn reporter() -> ConflictReporter {
        let store = Arc::new(MemoryStore::new().with_references([
            ReferenceEntity::new(AssignmentKind::Product, 10, "Chicken Breast").with_code("CB-10"),
            ReferenceEntity::new(AssignmentKind::OpCo, 1, "Denver"),
            ReferenceEntity::new(AssignmentKind::Manufacturer, 50, "Acme Foods"),
            ReferenceEntity::new(AssignmentKind::Manufacturer, 51, "Zenith Farms"),
        ]));
        ConflictReporter::new(ReferenceCache::new(store, Duration::from_secs(60), 100))
    }

    fn overlap(contract_id: ContractId, product_id: ProductId, end: Option<NaiveDate>) -> Overlap {
        let claim = Claim {
            product_id,
            opcos: [1].into_iter().collect(),
            start_date: date(2025, 6, 1),
            end_date: end,
        };
        let existing = ExistingClaim {
            contract_id,
            version_number: 2,
            name: format!("Contract {}", contract_id),
            foreign_id: Some(format!("F-{}", contract_id)),
            start_date: date(2025, 1, 1),
            end_date: None,
            is_suspended: false,
            manufacturer_ids: [51, 50].into_iter().collect(),
            opcos: [1].into_iter().collect(),
        };
        Overlap {
            window: DateWindow::new(date(2025, 6, 1), end),
            claim,
            existing,
            opcos: [1].into_iter().collect(),
            is_nationwide: false,
        }
    }

    #[tokio::test]
    async fn test_report_resolves_names_and_orders_by_contract() {
        let overlaps = vec![
            overlap(7, 10, Some(date(2025, 12, 31))),
            overlap(3, 10, None),
        ];
        let report = reporter().build_report(Some(42), &overlaps).await.unwrap();

        assert!(report.has_conflicts);
        assert_eq!(report.total_conflict_count, 2);
        assert_eq!(report.proposal_id, Some(42));

        let first = &report.conflicts[0];
        assert_eq!(first.conflicting_contract_id, 3);
        assert_eq!(first.product_name.as_deref(), Some("Chicken Breast"));
        assert_eq!(first.manufacturer_product_code.as_deref(), Some("CB-10"));
        assert_eq!(first.conflicting_manufacturer_name.as_deref(), Some("Acme Foods"));
        assert_eq!(first.overlapping_opcos[0].op_co_name.as_deref(), Some("Denver"));
        assert_eq!(first.overlap_end_date, None);
        assert_eq!(report.conflicts[1].overlap_end_date, Some(date(2025, 12, 31)));
        assert_eq!(report.grouped_by_contract().len(), 2);
    }

    #[tokio::test]
    async fn test_explicit_far_future_end_is_reported() {
        let report = reporter()
            .build_report(None, &[overlap(3, 10, Some(date(9999, 12, 31)))])
            .await
            .unwrap();
        assert_eq!(report.conflicts[0].overlap_end_date, Some(date(9999, 12, 31)));
    }

    #[tokio::test]
    async fn test_report_json_shape() {
        let report = reporter()
            .build_report(None, &[overlap(3, 10, None)])
            .await
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["hasConflicts"], true);
        assert_eq!(json["totalConflictCount"], 1);
        let detail = &json["conflicts"][0];
        assert_eq!(detail["conflictingContractVersionNumber"], 2);
        assert_eq!(detail["overlappingOpCos"][0]["opCoId"], 1);
        assert_eq!(detail["isNationwideConflict"], false);
        assert_eq!(detail["overlapStartDate"], "2025-06-01");
    }

    #[tokio::test]
    async fn test_empty_report() {
        let report = reporter().build_report(Some(1), &[]).await.unwrap();
        assert_eq!(report, ConflictReport::empty(Some(1)));
        assert!(report.conflicting_contract_ids().is_empty());
    }
}
