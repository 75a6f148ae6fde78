//! Scans existing contracts for claims overlapping a candidate set.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use super::calculators::{intersect_scopes, overlap_window, DateWindow};
use crate::error::{ContractError, Result};
use crate::models::{ContractId, OpCoId, ProductId};
use crate::repository::ContractRepository;
use crate::store::ExistingClaim;

/// A product claim to test against existing contracts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub product_id: ProductId,
    /// Empty means nationwide
    #[serde(default, rename = "opCoIds")]
    pub opcos: BTreeSet<OpCoId>,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl Claim {
    pub fn window(&self) -> DateWindow {
        DateWindow::new(self.start_date, self.end_date)
    }
}

/// One candidate claim colliding with one existing contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    pub claim: Claim,
    pub existing: ExistingClaim,
    pub window: DateWindow,
    pub opcos: BTreeSet<OpCoId>,
    pub is_nationwide: bool,
}

/// Overlaps between one claim and a set of existing contract claims
pub fn evaluate_claim(claim: &Claim, existing: &[ExistingClaim]) -> Vec<Overlap> {
    let candidate = claim.window();
    existing
        .iter()
        .filter_map(|other| {
            let window = overlap_window(&candidate, &DateWindow::new(other.start_date, other.end_date))?;
            let scope = intersect_scopes(&claim.opcos, &other.opcos)?;
            Some(Overlap {
                claim: claim.clone(),
                existing: other.clone(),
                window,
                opcos: scope.opcos,
                is_nationwide: scope.is_nationwide,
            })
        })
        .collect()
}

pub struct OverlapEngine {
    repository: Arc<ContractRepository>,
    include_suspended: bool,
}

impl OverlapEngine {
    /// `include_suspended` decides whether suspended contracts still block
    /// new claims
    pub fn new(repository: Arc<ContractRepository>, include_suspended: bool) -> Self {
        Self {
            repository,
            include_suspended,
        }
    }

    pub fn include_suspended(&self) -> bool {
        self.include_suspended
    }

    /// Every (claim, existing contract) pair that overlaps in product, dates
    /// and OpCo scope.
    ///
    /// Only current versions are scanned. `exclude_contract_id` is the
    /// contract being amended.
    pub async fn find_overlaps(
        &self,
        claims: &[Claim],
        exclude_contract_id: Option<ContractId>,
    ) -> Result<Vec<Overlap>> {
        let errors: Vec<String> = claims
            .iter()
            .filter(|c| !c.window().is_valid())
            .map(|c| {
                format!(
                    "claim on product {} ends before it starts",
                    c.product_id
                )
            })
            .collect();
        if !errors.is_empty() {
            return Err(ContractError::Validation(errors));
        }

        let mut existing_by_product: BTreeMap<ProductId, Vec<ExistingClaim>> = BTreeMap::new();
        let mut overlaps = Vec::new();
        for claim in claims {
            if !existing_by_product.contains_key(&claim.product_id) {
                let existing = self
                    .repository
                    .claims_for_product(claim.product_id, exclude_contract_id, self.include_suspended)
                    .await?;
                existing_by_product.insert(claim.product_id, existing);
            }
            let existing = &existing_by_product[&claim.product_id];
            overlaps.extend(evaluate_claim(claim, existing));
        }

        debug!(
            claims = claims.len(),
            overlaps = overlaps.len(),
            ?exclude_contract_id,
            "Overlap scan finished"
        );
        Ok(overlaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn set(v: &[OpCoId]) -> BTreeSet<OpCoId> {
        v.iter().copied().collect()
    }

    fn existing(id: ContractId, opcos: &[OpCoId], start: NaiveDate, end: Option<NaiveDate>) -> ExistingClaim {
        ExistingClaim {
            contract_id: id,
            version_number: 1,
            name: format!("Contract {}", id),
            foreign_id: None,
            start_date: start,
            end_date: end,
            is_suspended: false,
            manufacturer_ids: BTreeSet::new(),
            opcos: set(opcos),
        }
    }

    fn claim(opcos: &[OpCoId], start: NaiveDate, end: Option<NaiveDate>) -> Claim {
        Claim {
            product_id: 10,
            opcos: set(opcos),
            start_date: start,
            end_date: end,
        }
    }

    #[test]
    fn test_restricted_claim_against_restricted_contract() {
        let a = existing(1, &[1], date(2025, 1, 1), Some(date(2025, 6, 30)));
        let c = claim(&[1], date(2025, 6, 1), Some(date(2025, 12, 31)));

        let overlaps = evaluate_claim(&c, &[a]);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].window.start, date(2025, 6, 1));
        assert_eq!(overlaps[0].window.end, Some(date(2025, 6, 30)));
        assert!(!overlaps[0].is_nationwide);
        assert_eq!(overlaps[0].opcos, set(&[1]));
    }

    #[test]
    fn test_nationwide_claim_conflicts_with_every_contract_on_product() {
        let contracts = [
            existing(1, &[1], date(2025, 1, 1), Some(date(2025, 6, 30))),
            existing(2, &[7, 8], date(2025, 1, 1), None),
            existing(3, &[], date(2024, 1, 1), Some(date(2025, 12, 31))),
        ];
        let c = claim(&[], date(2025, 6, 1), Some(date(2025, 12, 31)));

        let overlaps = evaluate_claim(&c, &contracts);
        assert_eq!(overlaps.len(), 3);
        assert!(overlaps.iter().all(|o| o.is_nationwide));
        assert_eq!(overlaps[1].opcos, set(&[7, 8]));
        assert!(overlaps[2].opcos.is_empty());
    }

    #[test]
    fn test_disjoint_opcos_or_dates_do_not_conflict() {
        let contracts = [
            existing(1, &[2], date(2025, 1, 1), None),
            existing(2, &[1], date(2026, 1, 1), None),
        ];
        let c = claim(&[1], date(2025, 1, 1), Some(date(2025, 12, 31)));
        assert!(evaluate_claim(&c, &contracts).is_empty());
    }

    #[test]
    fn test_overlap_symmetry_between_two_contracts() {
        let a = existing(1, &[1, 2], date(2025, 1, 1), Some(date(2025, 6, 30)));
        let b = existing(2, &[2, 3], date(2025, 4, 1), None);
        let as_claim = |e: &ExistingClaim| Claim {
            product_id: 10,
            opcos: e.opcos.clone(),
            start_date: e.start_date,
            end_date: e.end_date,
        };

        let ab = evaluate_claim(&as_claim(&a), std::slice::from_ref(&b));
        let ba = evaluate_claim(&as_claim(&b), std::slice::from_ref(&a));
        assert_eq!(ab.len(), 1);
        assert_eq!(ba.len(), 1);
        assert_eq!(ab[0].window, ba[0].window);
        assert_eq!(ab[0].opcos, ba[0].opcos);
        assert_eq!(ab[0].is_nationwide, ba[0].is_nationwide);
    }

    #[test]
    fn test_boundary_day_is_a_conflict() {
        let a = existing(1, &[1], date(2025, 1, 1), Some(date(2025, 6, 30)));
        let c = claim(&[1], date(2025, 6, 30), Some(date(2025, 12, 31)));
        let overlaps = evaluate_claim(&c, &[a]);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].window.days(), Some(1));
    }
}
