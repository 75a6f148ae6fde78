//! Response DTOs for the JSON API.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::models::{ContractId, ContractVersion, VersionNumber};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub reference_cache: CacheStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionListResponse {
    pub contract_id: ContractId,
    pub current_version_number: VersionNumber,
    pub versions: Vec<ContractVersion>,
}
