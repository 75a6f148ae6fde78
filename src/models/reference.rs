//! Read-only reference data owned by the lookup collaborators.

use serde::{Deserialize, Serialize};

use super::contract::AssignmentKind;

pub type EntityId = i64;
pub type ProductId = i64;
pub type OpCoId = i64;

/// A product, OpCo, distributor, manufacturer or industry row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntity {
    pub kind: AssignmentKind,
    pub id: EntityId,
    pub name: String,
    /// Manufacturer product code for products, unset for everything else
    pub code: Option<String>,
    pub is_active: bool,
}

impl ReferenceEntity {
    pub fn new(kind: AssignmentKind, id: EntityId, name: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            name: name.into(),
            code: None,
            is_active: true,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}
