//! Contract read and suspension handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::requests::{ActiveContractsQuery, DiffQuery, SuspendRequest};
use super::responses::VersionListResponse;
use crate::error::Result;
use crate::models::{Contract, ContractId, ContractSnapshot, VersionNumber};
use crate::versioning::VersionDiff;
use crate::AppState;

/// Contracts active on a date
pub async fn active(
    State(state): State<AppState>,
    Query(query): Query<ActiveContractsQuery>,
) -> Result<Json<Vec<Contract>>> {
    Ok(Json(state.repository.get_active_contracts(query.as_of).await?))
}

/// Current version with assignments and prices
pub async fn current(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
) -> Result<Json<ContractSnapshot>> {
    Ok(Json(state.repository.get_current_snapshot(id).await?))
}

pub async fn versions(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
) -> Result<Json<VersionListResponse>> {
    let contract = state.repository.get_contract(id).await?;
    let versions = state.repository.list_versions(id).await?;
    Ok(Json(VersionListResponse {
        contract_id: id,
        current_version_number: contract.current_version_number,
        versions,
    }))
}

/// Point-in-time reconstruction
pub async fn version(
    State(state): State<AppState>,
    Path((id, version)): Path<(ContractId, VersionNumber)>,
) -> Result<Json<ContractSnapshot>> {
    Ok(Json(state.repository.snapshot_as_of(id, version).await?))
}

pub async fn diff(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<VersionDiff>> {
    Ok(Json(
        state
            .repository
            .diff_versions(id, query.from, query.to)
            .await?,
    ))
}

pub async fn suspend(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
    Json(req): Json<SuspendRequest>,
) -> Result<Json<Contract>> {
    Ok(Json(state.repository.suspend(id, req.suspended_date).await?))
}

pub async fn unsuspend(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
) -> Result<Json<Contract>> {
    Ok(Json(state.repository.unsuspend(id).await?))
}
