//! Database row models.
//!
//! These use sqlx's FromRow derive and convert into the domain models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::FromRow;
use std::str::FromStr;

use crate::error::{ContractError, Result};
use crate::models::{
    AssignmentKind, Contract, ContractAttributes, ContractTerms, ContractVersion, EntityId,
    OpCoScope, PriceTerms, ProductId, Proposal, ProposalProduct, ReferenceEntity,
    StatusHistoryEntry,
};

/// Parse an enum stored as text; a bad value is a decode failure
pub(crate) fn decode<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| ContractError::Database(sqlx::Error::Decode(e.into())))
}

/// Attribute columns shared by `contract` and `contract_version`
#[derive(Debug, Clone, FromRow)]
pub struct AttributesRow {
    pub name: String,
    pub foreign_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_suspended: bool,
    pub suspended_date: Option<NaiveDate>,
    pub reference_number: Option<String>,
    pub billback_name: Option<String>,
    pub terms: Option<String>,
    pub notes: Option<String>,
    pub contact_person: Option<String>,
    pub program_type_codes: Vec<String>,
}

impl From<AttributesRow> for ContractAttributes {
    fn from(row: AttributesRow) -> Self {
        ContractAttributes {
            name: row.name,
            foreign_id: row.foreign_id,
            start_date: row.start_date,
            end_date: row.end_date,
            is_suspended: row.is_suspended,
            suspended_date: row.suspended_date,
            reference_number: row.reference_number,
            billback_name: row.billback_name,
            terms: row.terms,
            notes: row.notes,
            contact_person: row.contact_person,
            program_type_codes: row.program_type_codes,
        }
    }
}

/// Contract from `contract`
#[derive(Debug, Clone, FromRow)]
pub struct ContractRow {
    pub id: i64,
    #[sqlx(flatten)]
    pub attributes: AttributesRow,
    pub current_version_number: i32,
    pub proposal_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ContractRow> for Contract {
    fn from(row: ContractRow) -> Self {
        Contract {
            id: row.id,
            attributes: row.attributes.into(),
            current_version_number: row.current_version_number,
            proposal_id: row.proposal_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Version from `contract_version`
#[derive(Debug, Clone, FromRow)]
pub struct VersionRow {
    pub contract_id: i64,
    pub version_number: i32,
    #[sqlx(flatten)]
    pub attributes: AttributesRow,
    pub created_at: DateTime<Utc>,
}

impl From<VersionRow> for ContractVersion {
    fn from(row: VersionRow) -> Self {
        ContractVersion {
            contract_id: row.contract_id,
            version_number: row.version_number,
            attributes: row.attributes.into(),
            created_at: row.created_at,
        }
    }
}

/// Price columns shared by contract prices and proposal lines
#[derive(Debug, Clone, FromRow)]
pub struct PriceColumns {
    pub price_type: Option<String>,
    pub allowance: Option<Decimal>,
    pub commercial_fob: Option<Decimal>,
    pub commercial_del: Option<Decimal>,
    pub commodity_fob: Option<Decimal>,
    pub commodity_del: Option<Decimal>,
    pub pua: Option<Decimal>,
    pub ffs: Option<Decimal>,
    pub noi: Option<Decimal>,
    pub ptv: Option<Decimal>,
    pub uom: Option<String>,
    pub estimated_quantity: Option<i32>,
    pub billback_allowed: bool,
}

impl From<PriceColumns> for PriceTerms {
    fn from(row: PriceColumns) -> Self {
        PriceTerms {
            price_type: row.price_type,
            allowance: row.allowance,
            commercial_fob: row.commercial_fob,
            commercial_del: row.commercial_del,
            commodity_fob: row.commodity_fob,
            commodity_del: row.commodity_del,
            pua: row.pua,
            ffs: row.ffs,
            noi: row.noi,
            ptv: row.ptv,
            uom: row.uom,
            estimated_quantity: row.estimated_quantity,
            billback_allowed: row.billback_allowed,
        }
    }
}

/// Price from `contract_price_version`
#[derive(Debug, Clone, FromRow)]
pub struct PriceRow {
    pub product_id: ProductId,
    #[sqlx(flatten)]
    pub price: PriceColumns,
}

/// (contract, related entity) pair from a current assignment table
#[derive(Debug, Clone, FromRow)]
pub struct AssignmentRow {
    pub contract_id: i64,
    pub related_id: EntityId,
}

/// Lookup row from one of the reference tables
#[derive(Debug, Clone, FromRow)]
pub struct ReferenceRow {
    pub id: EntityId,
    pub name: String,
    pub code: Option<String>,
    pub is_active: bool,
}

impl ReferenceRow {
    pub fn into_entity(self, kind: AssignmentKind) -> ReferenceEntity {
        ReferenceEntity {
            kind,
            id: self.id,
            name: self.name,
            code: self.code,
            is_active: self.is_active,
        }
    }
}

/// Proposal header from `proposal`
#[derive(Debug, Clone, FromRow)]
pub struct ProposalRow {
    pub id: i64,
    pub proposal_type: String,
    pub status: String,
    pub reject_reason: Option<String>,
    pub manufacturer_id: i64,
    pub distributor_ids: Option<Vec<i64>>,
    pub industry_ids: Option<Vec<i64>>,
    pub opco_scope: Json<OpCoScope>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub amended_contract_id: Option<i64>,
    pub terms: Option<Json<ContractTerms>>,
    pub contract_id: Option<i64>,
    pub contract_version_number: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProposalRow {
    pub fn into_proposal(self, lines: Vec<ProposalProduct>) -> Result<Proposal> {
        Ok(Proposal {
            id: self.id,
            proposal_type: decode(&self.proposal_type)?,
            status: decode(&self.status)?,
            reject_reason: self.reject_reason,
            manufacturer_id: self.manufacturer_id,
            distributor_ids: self.distributor_ids.map(|ids| ids.into_iter().collect()),
            industry_ids: self.industry_ids.map(|ids| ids.into_iter().collect()),
            opco_scope: self.opco_scope.0,
            start_date: self.start_date,
            end_date: self.end_date,
            due_date: self.due_date,
            amended_contract_id: self.amended_contract_id,
            terms: self.terms.map(|t| t.0),
            lines,
            contract_id: self.contract_id,
            contract_version_number: self.contract_version_number,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Proposal line from `proposal_product`
#[derive(Debug, Clone, FromRow)]
pub struct ProposalLineRow {
    pub line_id: i32,
    pub product_id: i64,
    #[sqlx(flatten)]
    pub price: PriceColumns,
    pub quantity: Option<i32>,
    pub amendment_action: Option<String>,
    pub status: String,
}

impl ProposalLineRow {
    pub fn into_line(self) -> Result<ProposalProduct> {
        Ok(ProposalProduct {
            line_id: self.line_id,
            product_id: self.product_id,
            price: self.price.into(),
            quantity: self.quantity,
            amendment_action: self.amendment_action.as_deref().map(decode).transpose()?,
            status: decode(&self.status)?,
        })
    }
}

/// Row from `proposal_status_history`
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    pub proposal_id: i64,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor: String,
    pub comment: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl HistoryRow {
    pub fn into_entry(self) -> Result<StatusHistoryEntry> {
        Ok(StatusHistoryEntry {
            proposal_id: self.proposal_id,
            from_status: self.from_status.as_deref().map(decode).transpose()?,
            to_status: decode(&self.to_status)?,
            actor: self.actor,
            comment: self.comment,
            changed_at: self.changed_at,
        })
    }
}
