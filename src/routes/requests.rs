//! Request DTOs for the JSON API.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::conflicts::Claim;
use crate::models::{
    ContractId, NewProposal, ProductProposalStatus, ProposalRevision, ProposalStatus,
    VersionNumber,
};

/// Ad-hoc conflict check for claims not tied to a stored proposal
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConflictsRequest {
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub exclude_contract_id: Option<ContractId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalRequest {
    pub actor: String,
    pub proposal: NewProposal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviseProposalRequest {
    pub actor: String,
    pub revision: ProposalRevision,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub to: ProposalStatus,
    pub actor: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub admin_override: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub reason: String,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineStatusRequest {
    pub status: ProductProposalStatus,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub actor: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveContractsQuery {
    pub as_of: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub from: VersionNumber,
    pub to: VersionNumber,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendRequest {
    pub suspended_date: NaiveDate,
}
