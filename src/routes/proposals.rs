//! Proposal workflow and conflict-check handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::requests::{
    CheckConflictsRequest, CompleteRequest, CreateProposalRequest, LineStatusRequest,
    RejectRequest, ReviseProposalRequest, TransitionRequest,
};
use crate::conflicts::ConflictReport;
use crate::error::Result;
use crate::models::{Proposal, ProposalId, StatusHistoryEntry};
use crate::proposals::{CompletionOutcome, TransitionMode};
use crate::AppState;

/// Conflict check for arbitrary claims
pub async fn check_conflicts(
    State(state): State<AppState>,
    Json(req): Json<CheckConflictsRequest>,
) -> Result<Json<ConflictReport>> {
    let overlaps = state
        .engine
        .find_overlaps(&req.claims, req.exclude_contract_id)
        .await?;
    Ok(Json(state.reporter.build_report(None, &overlaps).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateProposalRequest>,
) -> Result<(StatusCode, Json<Proposal>)> {
    let proposal = state
        .lifecycle
        .create_proposal(req.proposal, &req.actor)
        .await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<ProposalId>,
) -> Result<Json<Proposal>> {
    Ok(Json(state.lifecycle.get_proposal(id).await?))
}

pub async fn revise(
    State(state): State<AppState>,
    Path(id): Path<ProposalId>,
    Json(req): Json<ReviseProposalRequest>,
) -> Result<Json<Proposal>> {
    Ok(Json(
        state
            .lifecycle
            .revise_proposal(id, req.revision, &req.actor)
            .await?,
    ))
}

pub async fn transition(
    State(state): State<AppState>,
    Path(id): Path<ProposalId>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Proposal>> {
    let mode = if req.admin_override {
        TransitionMode::AdministrativeOverride
    } else {
        TransitionMode::Standard
    };
    Ok(Json(
        state
            .lifecycle
            .transition(id, req.to, mode, &req.actor, req.comment)
            .await?,
    ))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<ProposalId>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<Proposal>> {
    Ok(Json(state.lifecycle.reject(id, &req.reason, &req.actor).await?))
}

pub async fn set_line_status(
    State(state): State<AppState>,
    Path((id, line_id)): Path<(ProposalId, i32)>,
    Json(req): Json<LineStatusRequest>,
) -> Result<Json<Proposal>> {
    Ok(Json(
        state
            .lifecycle
            .set_line_status(id, line_id, req.status, &req.actor)
            .await?,
    ))
}

/// Early, non-authoritative conflict check for a stored proposal
pub async fn conflicts(
    State(state): State<AppState>,
    Path(id): Path<ProposalId>,
) -> Result<Json<ConflictReport>> {
    Ok(Json(state.lifecycle.check_conflicts(id).await?))
}

/// Re-check and commit; a 409 carries the conflict report
pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<ProposalId>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<CompletionOutcome>> {
    Ok(Json(
        state
            .lifecycle
            .submit_for_completion(id, &req.actor)
            .await?,
    ))
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<ProposalId>,
) -> Result<Json<Vec<StatusHistoryEntry>>> {
    Ok(Json(state.lifecycle.status_history(id).await?))
}
