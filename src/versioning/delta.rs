//! Changes applied on top of a forward-copied contract version.
//!
//! Pure functions; no store access.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{
    AssignmentKind, ContractAssignments, ContractAttributes, EntityId, PriceTerms, ProductId,
};

/// Attribute overlay; `None` keeps the forward-copied value.
///
/// Suspension is not part of the overlay: it is administrative state and is
/// always carried forward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub foreign_id: Option<Option<String>>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub reference_number: Option<Option<String>>,
    #[serde(default)]
    pub billback_name: Option<Option<String>>,
    #[serde(default)]
    pub terms: Option<Option<String>>,
    #[serde(default)]
    pub notes: Option<Option<String>>,
    #[serde(default)]
    pub contact_person: Option<Option<String>>,
    #[serde(default)]
    pub program_type_codes: Option<Vec<String>>,
}

impl AttributeChanges {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, base: &ContractAttributes) -> ContractAttributes {
        let mut next = base.clone();
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(foreign_id) = &self.foreign_id {
            next.foreign_id = foreign_id.clone();
        }
        if let Some(start) = self.start_date {
            next.start_date = start;
        }
        if let Some(end) = self.end_date {
            next.end_date = end;
        }
        if let Some(v) = &self.reference_number {
            next.reference_number = v.clone();
        }
        if let Some(v) = &self.billback_name {
            next.billback_name = v.clone();
        }
        if let Some(v) = &self.terms {
            next.terms = v.clone();
        }
        if let Some(v) = &self.notes {
            next.notes = v.clone();
        }
        if let Some(v) = &self.contact_person {
            next.contact_person = v.clone();
        }
        if let Some(codes) = &self.program_type_codes {
            next.program_type_codes = codes.clone();
        }
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum AssignmentChange {
    Add { kind: AssignmentKind, id: EntityId },
    Remove { kind: AssignmentKind, id: EntityId },
}

/// Relationship additions and removals for the next version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDelta {
    #[serde(default)]
    pub changes: Vec<AssignmentChange>,
}

impl AssignmentDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, kind: AssignmentKind, id: EntityId) -> Self {
        self.changes.push(AssignmentChange::Add { kind, id });
        self
    }

    pub fn remove(mut self, kind: AssignmentKind, id: EntityId) -> Self {
        self.changes.push(AssignmentChange::Remove { kind, id });
        self
    }

    /// Add whatever moves `current` to `target` for one kind
    pub fn replace(mut self, current: &BTreeSet<EntityId>, kind: AssignmentKind, target: &BTreeSet<EntityId>) -> Self {
        for id in current.difference(target) {
            self.changes.push(AssignmentChange::Remove { kind, id: *id });
        }
        for id in target.difference(current) {
            self.changes.push(AssignmentChange::Add { kind, id: *id });
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Relationships newly added by this delta
    pub fn additions(&self) -> impl Iterator<Item = (AssignmentKind, EntityId)> + '_ {
        self.changes.iter().filter_map(|c| match c {
            AssignmentChange::Add { kind, id } => Some((*kind, *id)),
            AssignmentChange::Remove { .. } => None,
        })
    }

    /// Apply in order. Adding a present relationship or removing an absent
    /// one is an error.
    pub fn apply(&self, assignments: &mut ContractAssignments) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for change in &self.changes {
            match *change {
                AssignmentChange::Add { kind, id } => {
                    if !assignments.ids_mut(kind).insert(id) {
                        errors.push(format!("{} {} is already assigned", kind, id));
                    }
                }
                AssignmentChange::Remove { kind, id } => {
                    if !assignments.ids_mut(kind).remove(&id) {
                        errors.push(format!("{} {} is not assigned", kind, id));
                    }
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Price upserts and removals for the next version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceDelta {
    #[serde(default)]
    pub upserts: BTreeMap<ProductId, PriceTerms>,
    #[serde(default)]
    pub removals: BTreeSet<ProductId>,
}

impl PriceDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(mut self, product_id: ProductId, price: PriceTerms) -> Self {
        self.upserts.insert(product_id, price);
        self
    }

    pub fn remove(mut self, product_id: ProductId) -> Self {
        self.removals.insert(product_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }

    /// Apply against the already-updated product set.
    ///
    /// Prices of products no longer assigned are dropped first; upserts
    /// require the product to be assigned.
    pub fn apply(
        &self,
        prices: &mut BTreeMap<ProductId, PriceTerms>,
        products: &BTreeSet<ProductId>,
    ) -> Result<(), Vec<String>> {
        prices.retain(|product_id, _| products.contains(product_id));

        let mut errors = Vec::new();
        for product_id in &self.removals {
            if prices.remove(product_id).is_none() && products.contains(product_id) {
                errors.push(format!("product {} has no price to remove", product_id));
            }
        }
        for (product_id, price) in &self.upserts {
            if !products.contains(product_id) {
                errors.push(format!(
                    "product {} must be assigned before it can be priced",
                    product_id
                ));
                continue;
            }
            errors.extend(price.validate(&format!("product {}", product_id)));
            prices.insert(*product_id, price.normalized());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
