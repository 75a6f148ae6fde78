//! Proposals: requests to create or amend a contract.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::contract::{ContractAttributes, ContractId, VersionNumber};
use super::price::PriceTerms;
use super::reference::{EntityId, OpCoId, ProductId};

pub type ProposalId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalType {
    NewContract,
    Amendment,
}

impl ProposalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalType::NewContract => "NewContract",
            ProposalType::Amendment => "Amendment",
        }
    }
}

impl FromStr for ProposalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NewContract" => Ok(ProposalType::NewContract),
            "Amendment" => Ok(ProposalType::Amendment),
            other => Err(format!("unknown proposal type '{}'", other)),
        }
    }
}

/// Proposal workflow status.
///
/// The ordinal of the non-terminal stages defines "forward".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalStatus {
    Requested,
    Pending,
    Saved,
    Submitted,
    Completed,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Requested => "Requested",
            ProposalStatus::Pending => "Pending",
            ProposalStatus::Saved => "Saved",
            ProposalStatus::Submitted => "Submitted",
            ProposalStatus::Completed => "Completed",
            ProposalStatus::Rejected => "Rejected",
        }
    }

    /// Position in the Requested..Completed pipeline; Rejected sits outside it
    pub fn stage(&self) -> Option<u8> {
        match self {
            ProposalStatus::Requested => Some(0),
            ProposalStatus::Pending => Some(1),
            ProposalStatus::Saved => Some(2),
            ProposalStatus::Submitted => Some(3),
            ProposalStatus::Completed => Some(4),
            ProposalStatus::Rejected => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Completed | ProposalStatus::Rejected)
    }

    /// Statuses in which lines and terms may still be edited
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Requested | ProposalStatus::Pending | ProposalStatus::Saved
        )
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Requested" => Ok(ProposalStatus::Requested),
            "Pending" => Ok(ProposalStatus::Pending),
            "Saved" => Ok(ProposalStatus::Saved),
            "Submitted" => Ok(ProposalStatus::Submitted),
            "Completed" => Ok(ProposalStatus::Completed),
            "Rejected" => Ok(ProposalStatus::Rejected),
            other => Err(format!("unknown proposal status '{}'", other)),
        }
    }
}

/// How an amendment line changes the amended contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmendmentAction {
    Add,
    Update,
    Remove,
}

impl AmendmentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmendmentAction::Add => "Add",
            AmendmentAction::Update => "Update",
            AmendmentAction::Remove => "Remove",
        }
    }
}

impl FromStr for AmendmentAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Add" => Ok(AmendmentAction::Add),
            "Update" => Ok(AmendmentAction::Update),
            "Remove" => Ok(AmendmentAction::Remove),
            other => Err(format!("unknown amendment action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductProposalStatus {
    Requested,
    Accepted,
    Rejected,
    Proposed,
}

impl ProductProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductProposalStatus::Requested => "Requested",
            ProductProposalStatus::Accepted => "Accepted",
            ProductProposalStatus::Rejected => "Rejected",
            ProductProposalStatus::Proposed => "Proposed",
        }
    }
}

impl FromStr for ProductProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Requested" => Ok(ProductProposalStatus::Requested),
            "Accepted" => Ok(ProductProposalStatus::Accepted),
            "Rejected" => Ok(ProductProposalStatus::Rejected),
            "Proposed" => Ok(ProductProposalStatus::Proposed),
            other => Err(format!("unknown product proposal status '{}'", other)),
        }
    }
}

/// OpCo coverage requested by a proposal.
///
/// `Unset` means nobody chose yet; it never matches as nationwide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "opCoIds", rename_all = "camelCase")]
pub enum OpCoScope {
    Nationwide,
    Restricted(BTreeSet<OpCoId>),
    #[default]
    Unset,
}

impl OpCoScope {
    /// OpCo set in contract encoding (empty = nationwide)
    pub fn resolve(&self) -> Result<BTreeSet<OpCoId>, String> {
        match self {
            OpCoScope::Nationwide => Ok(BTreeSet::new()),
            OpCoScope::Restricted(ids) if ids.is_empty() => {
                Err("restricted OpCo scope must name at least one OpCo".to_string())
            }
            OpCoScope::Restricted(ids) => Ok(ids.clone()),
            OpCoScope::Unset => Err("OpCo scope has not been chosen".to_string()),
        }
    }

    /// Scope for a stored OpCo set
    pub fn from_assigned(ids: &BTreeSet<OpCoId>) -> Self {
        if ids.is_empty() {
            OpCoScope::Nationwide
        } else {
            OpCoScope::Restricted(ids.clone())
        }
    }
}

/// Manufacturer-facing contract terms carried by a proposal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractTerms {
    pub name: String,
    #[serde(default)]
    pub foreign_id: Option<String>,
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

impl ContractTerms {
    /// Attribute set for a fresh contract
    pub fn to_attributes(&self, start_date: NaiveDate, end_date: Option<NaiveDate>) -> ContractAttributes {
        ContractAttributes {
            name: self.name.clone(),
            foreign_id: self.foreign_id.clone(),
            start_date,
            end_date,
            is_suspended: false,
            suspended_date: None,
            reference_number: self.reference_number.clone(),
            billback_name: self.billback_name.clone(),
            terms: self.terms.clone(),
            notes: self.notes.clone(),
            contact_person: self.contact_person.clone(),
            program_type_codes: self.program_type_codes.clone(),
        }
    }
}

/// One product line on a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalProduct {
    /// Line number, unique within the proposal
    pub line_id: i32,
    pub product_id: ProductId,
    #[serde(flatten)]
    pub price: PriceTerms,
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub amendment_action: Option<AmendmentAction>,
    #[serde(default = "default_line_status")]
    pub status: ProductProposalStatus,
}

fn default_line_status() -> ProductProposalStatus {
    ProductProposalStatus::Requested
}

impl ProposalProduct {
    pub fn new(line_id: i32, product_id: ProductId) -> Self {
        Self {
            line_id,
            product_id,
            price: PriceTerms::default(),
            quantity: None,
            amendment_action: None,
            status: ProductProposalStatus::Requested,
        }
    }

    pub fn with_action(mut self, action: AmendmentAction) -> Self {
        self.amendment_action = Some(action);
        self
    }

    pub fn with_price(mut self, price: PriceTerms) -> Self {
        self.price = price;
        self
    }

    /// Lines that put a claim on the product once the proposal completes
    pub fn claims_product(&self) -> bool {
        self.status != ProductProposalStatus::Rejected
            && self.amendment_action != Some(AmendmentAction::Remove)
    }
}

/// Proposal header and lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: ProposalId,
    pub proposal_type: ProposalType,
    pub status: ProposalStatus,
    pub reject_reason: Option<String>,
    pub manufacturer_id: EntityId,
    /// Replacement distributor set; unset keeps the amended contract's
    pub distributor_ids: Option<BTreeSet<EntityId>>,
    /// Replacement industry set; unset keeps the amended contract's
    pub industry_ids: Option<BTreeSet<EntityId>>,
    pub opco_scope: OpCoScope,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub amended_contract_id: Option<ContractId>,
    pub terms: Option<ContractTerms>,
    pub lines: Vec<ProposalProduct>,
    /// Contract and version produced on completion
    pub contract_id: Option<ContractId>,
    pub contract_version_number: Option<VersionNumber>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn line(&self, line_id: i32) -> Option<&ProposalProduct> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }

    /// Structural checks that do not need the store
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(end) = self.end_date {
            if end < self.start_date {
                errors.push(format!(
                    "proposal end date {} is before start date {}",
                    end, self.start_date
                ));
            }
        }

        let mut line_ids = BTreeSet::new();
        for line in &self.lines {
            if !line_ids.insert(line.line_id) {
                errors.push(format!("duplicate proposal line {}", line.line_id));
            }
            errors.extend(line.price.validate(&format!("line {}", line.line_id)));
        }

        match self.proposal_type {
            ProposalType::NewContract => {
                if self.amended_contract_id.is_some() {
                    errors.push("new contract proposals cannot amend a contract".to_string());
                }
                match &self.terms {
                    Some(terms) if !terms.name.trim().is_empty() => {}
                    _ => errors.push("new contract proposals need a contract name".to_string()),
                }
                for line in &self.lines {
                    if matches!(
                        line.amendment_action,
                        Some(AmendmentAction::Update) | Some(AmendmentAction::Remove)
                    ) {
                        errors.push(format!(
                            "line {}: only Add is allowed on a new contract",
                            line.line_id
                        ));
                    }
                }
            }
            ProposalType::Amendment => {
                if self.amended_contract_id.is_none() {
                    errors.push("amendment proposals need an amended contract".to_string());
                }
                for line in &self.lines {
                    if line.amendment_action.is_none() {
                        errors.push(format!(
                            "line {}: amendment lines need an action",
                            line.line_id
                        ));
                    }
                }
            }
        }

        errors
    }
}

/// Fields supplied when a proposal is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProposal {
    pub proposal_type: ProposalType,
    pub manufacturer_id: EntityId,
    #[serde(default)]
    pub distributor_ids: Option<BTreeSet<EntityId>>,
    #[serde(default)]
    pub industry_ids: Option<BTreeSet<EntityId>>,
    #[serde(default)]
    pub opco_scope: OpCoScope,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub amended_contract_id: Option<ContractId>,
    #[serde(default)]
    pub terms: Option<ContractTerms>,
    #[serde(default)]
    pub lines: Vec<ProposalProduct>,
}

impl NewProposal {
    /// Proposal row in Requested status
    pub fn into_proposal(self, id: ProposalId, now: DateTime<Utc>) -> Proposal {
        Proposal {
            id,
            proposal_type: self.proposal_type,
            status: ProposalStatus::Requested,
            reject_reason: None,
            manufacturer_id: self.manufacturer_id,
            distributor_ids: self.distributor_ids,
            industry_ids: self.industry_ids,
            opco_scope: self.opco_scope,
            start_date: self.start_date,
            end_date: self.end_date,
            due_date: self.due_date,
            amended_contract_id: self.amended_contract_id,
            terms: self.terms,
            lines: self.lines,
            contract_id: None,
            contract_version_number: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Edits applied to a proposal that is still editable; unset fields are kept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRevision {
    #[serde(default)]
    pub opco_scope: Option<OpCoScope>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub distributor_ids: Option<BTreeSet<EntityId>>,
    #[serde(default)]
    pub industry_ids: Option<BTreeSet<EntityId>>,
    #[serde(default)]
    pub terms: Option<ContractTerms>,
    #[serde(default)]
    pub lines: Option<Vec<ProposalProduct>>,
}

impl ProposalRevision {
    pub fn apply(self, proposal: &mut Proposal) {
        if let Some(scope) = self.opco_scope {
            proposal.opco_scope = scope;
        }
        if let Some(start) = self.start_date {
            proposal.start_date = start;
        }
        if let Some(end) = self.end_date {
            proposal.end_date = end;
        }
        if let Some(due) = self.due_date {
            proposal.due_date = due;
        }
        if let Some(ids) = self.distributor_ids {
            proposal.distributor_ids = Some(ids);
        }
        if let Some(ids) = self.industry_ids {
            proposal.industry_ids = Some(ids);
        }
        if let Some(terms) = self.terms {
            proposal.terms = Some(terms);
        }
        if let Some(lines) = self.lines {
            proposal.lines = lines;
        }
    }
}

/// Append-only status history row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub proposal_id: ProposalId,
    pub from_status: Option<ProposalStatus>,
    pub to_status: ProposalStatus,
    pub actor: String,
    pub comment: Option<String>,
    pub changed_at: DateTime<Utc>,
}
