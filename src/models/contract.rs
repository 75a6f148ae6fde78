//! Contract identity, attribute snapshots and versioned assignments.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::price::PriceTerms;
use super::proposal::ProposalId;
use super::reference::{EntityId, ProductId};

pub type ContractId = i64;
pub type VersionNumber = i32;

/// Entity kinds a contract version can be assigned to.
///
/// Each kind owns a current table and a version-history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssignmentKind {
    Distributor,
    Industry,
    Manufacturer,
    OpCo,
    Product,
}

impl AssignmentKind {
    pub const ALL: [AssignmentKind; 5] = [
        AssignmentKind::Distributor,
        AssignmentKind::Industry,
        AssignmentKind::Manufacturer,
        AssignmentKind::OpCo,
        AssignmentKind::Product,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentKind::Distributor => "distributor",
            AssignmentKind::Industry => "industry",
            AssignmentKind::Manufacturer => "manufacturer",
            AssignmentKind::OpCo => "opco",
            AssignmentKind::Product => "product",
        }
    }
}

impl fmt::Display for AssignmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable attributes captured by every contract version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAttributes {
    pub name: String,
    #[serde(default)]
    pub foreign_id: Option<String>,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_suspended: bool,
    #[serde(default)]
    pub suspended_date: Option<NaiveDate>,
    #[serde(default)]
    pub reference_number: Option<String>,
    #[serde(default)]
    pub billback_name: Option<String>,
    #[serde(default)]
    pub terms: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub contact_person: Option<String>,
    #[serde(default)]
    pub program_type_codes: Vec<String>,
}

impl ContractAttributes {
    pub fn new(name: impl Into<String>, start_date: NaiveDate, end_date: Option<NaiveDate>) -> Self {
        Self {
            name: name.into(),
            foreign_id: None,
            start_date,
            end_date,
            is_suspended: false,
            suspended_date: None,
            reference_number: None,
            billback_name: None,
            terms: None,
            notes: None,
            contact_person: None,
            program_type_codes: Vec::new(),
        }
    }

    /// Check if the contract term includes the given day
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && self.end_date.map_or(true, |end| date <= end)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push("contract name is required".to_string());
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                errors.push(format!(
                    "contract end date {} is before start date {}",
                    end, self.start_date
                ));
            }
        }
        errors
    }
}

/// Contract identity row with its mirrored current version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: ContractId,
    #[serde(flatten)]
    pub attributes: ContractAttributes,
    pub current_version_number: VersionNumber,
    pub proposal_id: Option<ProposalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    /// Active on a day: not suspended and the term includes the day
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        !self.attributes.is_suspended && self.attributes.covers(date)
    }
}

/// One row of the contract version table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractVersion {
    pub contract_id: ContractId,
    pub version_number: VersionNumber,
    #[serde(flatten)]
    pub attributes: ContractAttributes,
    pub created_at: DateTime<Utc>,
}

/// Related entity ids assigned to one contract version.
///
/// An empty OpCo set means the contract is nationwide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAssignments {
    #[serde(default)]
    pub distributors: BTreeSet<EntityId>,
    #[serde(default)]
    pub industries: BTreeSet<EntityId>,
    #[serde(default)]
    pub manufacturers: BTreeSet<EntityId>,
    #[serde(default, rename = "opCos")]
    pub opcos: BTreeSet<EntityId>,
    #[serde(default)]
    pub products: BTreeSet<ProductId>,
}

impl ContractAssignments {
    pub fn ids(&self, kind: AssignmentKind) -> &BTreeSet<EntityId> {
        match kind {
            AssignmentKind::Distributor => &self.distributors,
            AssignmentKind::Industry => &self.industries,
            AssignmentKind::Manufacturer => &self.manufacturers,
            AssignmentKind::OpCo => &self.opcos,
            AssignmentKind::Product => &self.products,
        }
    }

    pub fn ids_mut(&mut self, kind: AssignmentKind) -> &mut BTreeSet<EntityId> {
        match kind {
            AssignmentKind::Distributor => &mut self.distributors,
            AssignmentKind::Industry => &mut self.industries,
            AssignmentKind::Manufacturer => &mut self.manufacturers,
            AssignmentKind::OpCo => &mut self.opcos,
            AssignmentKind::Product => &mut self.products,
        }
    }

    /// Every (kind, id) pair, in kind order
    pub fn iter(&self) -> impl Iterator<Item = (AssignmentKind, EntityId)> + '_ {
        AssignmentKind::ALL
            .into_iter()
            .flat_map(move |kind| self.ids(kind).iter().map(move |id| (kind, *id)))
    }

    pub fn contains(&self, kind: AssignmentKind, id: EntityId) -> bool {
        self.ids(kind).contains(&id)
    }

    pub fn is_nationwide(&self) -> bool {
        self.opcos.is_empty()
    }
}

/// Full state of a contract at one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSnapshot {
    pub contract_id: ContractId,
    pub version_number: VersionNumber,
    pub attributes: ContractAttributes,
    pub assignments: ContractAssignments,
    pub prices: BTreeMap<ProductId, PriceTerms>,
    pub created_at: DateTime<Utc>,
}

/// Administrative suspension change, applied without a version bump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    Suspend(NaiveDate),
    Unsuspend,
}

impl Suspension {
    /// Apply to an attribute set in place
    pub fn apply(&self, attributes: &mut ContractAttributes) {
        match self {
            Suspension::Suspend(date) => {
                attributes.is_suspended = true;
                attributes.suspended_date = Some(*date);
            }
            Suspension::Unsuspend => {
                attributes.is_suspended = false;
                attributes.suspended_date = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_attributes_covers_is_inclusive() {
        let attrs = ContractAttributes::new("A", date(2025, 1, 1), Some(date(2025, 6, 30)));
        assert!(attrs.covers(date(2025, 1, 1)));
        assert!(attrs.covers(date(2025, 6, 30)));
        assert!(!attrs.covers(date(2025, 7, 1)));
        assert!(!attrs.covers(date(2024, 12, 31)));
    }

    #[test]
    fn test_open_ended_contract_covers_far_future() {
        let attrs = ContractAttributes::new("A", date(2025, 1, 1), None);
        assert!(attrs.covers(date(2090, 1, 1)));
        assert!(attrs.covers(date(10000, 1, 1)));
    }

    #[test]
    fn test_attributes_validate() {
        let attrs = ContractAttributes::new(" ", date(2025, 6, 1), Some(date(2025, 1, 1)));
        let errors = attrs.validate();
        assert_eq!(errors.len(), 2);

        let attrs = ContractAttributes::new("A", date(2025, 1, 1), Some(date(2025, 1, 1)));
        assert!(attrs.validate().is_empty());
    }

    #[test]
    fn test_assignments_iter_and_nationwide() {
        let mut assignments = ContractAssignments::default();
        assert!(assignments.is_nationwide());

        assignments.ids_mut(AssignmentKind::OpCo).insert(3);
        assignments.ids_mut(AssignmentKind::Product).insert(10);
        assignments.ids_mut(AssignmentKind::Distributor).insert(1);

        let pairs: Vec<_> = assignments.iter().collect();
        assert_eq!(
            pairs,
            vec![
                (AssignmentKind::Distributor, 1),
                (AssignmentKind::OpCo, 3),
                (AssignmentKind::Product, 10),
            ]
        );
        assert!(!assignments.is_nationwide());
        assert!(assignments.contains(AssignmentKind::Product, 10));
    }

    #[test]
    fn test_suspension_apply() {
        let mut attrs = ContractAttributes::new("A", date(2025, 1, 1), None);
        Suspension::Suspend(date(2025, 3, 1)).apply(&mut attrs);
        assert!(attrs.is_suspended);
        assert_eq!(attrs.suspended_date, Some(date(2025, 3, 1)));

        Suspension::Unsuspend.apply(&mut attrs);
        assert!(!attrs.is_suspended);
        assert_eq!(attrs.suspended_date, None);
    }
}
