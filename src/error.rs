//! Error handling for the contract engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::conflicts::{ConflictReport, Overlap};
use crate::models::ProposalStatus;

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{entity} {id} changed concurrently (expected {expected}, found {found})")]
    Concurrency {
        entity: &'static str,
        id: i64,
        expected: String,
        found: String,
    },

    #[error("Proposal has {} conflicting claim(s)", .0.total_conflict_count)]
    Conflict(Box<ConflictReport>),

    /// Overlaps found by the store while committing, before names are
    /// resolved into a report
    #[error("{} claim(s) overlap existing contracts", .0.len())]
    Overlapping(Vec<Overlap>),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid proposal transition from {from} to {to}")]
    InvalidTransition {
        from: ProposalStatus,
        to: ProposalStatus,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl ContractError {
    /// Single-message validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(vec![msg.into()])
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Version race lost on a contract
    pub fn version_race(contract_id: i64, expected: i32, found: i32) -> Self {
        Self::Concurrency {
            entity: "Contract",
            id: contract_id,
            expected: format!("version {}", expected),
            found: format!("version {}", found),
        }
    }

    /// Short machine-readable tag used in API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            ContractError::Validation(_) => "validation_error",
            ContractError::Concurrency { .. } => "concurrency_error",
            ContractError::Conflict(_) | ContractError::Overlapping(_) => "conflict_error",
            ContractError::NotFound { .. } => "not_found",
            ContractError::InvalidTransition { .. } => "invalid_transition",
            ContractError::Database(_) | ContractError::Migration(_) => "internal_error",
        }
    }
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ContractError {
    fn into_response(self) -> Response {
        let status = match &self {
            ContractError::Validation(_) | ContractError::InvalidTransition { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ContractError::NotFound { .. } => StatusCode::NOT_FOUND,
            ContractError::Concurrency { .. }
            | ContractError::Conflict(_)
            | ContractError::Overlapping(_) => StatusCode::CONFLICT,
            ContractError::Database(e) => {
                tracing::error!("Database error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ContractError::Migration(e) => {
                tracing::error!("Migration error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let details = match &self {
            ContractError::Validation(errors) => Some(serde_json::json!(errors)),
            ContractError::Conflict(report) => serde_json::to_value(report.as_ref()).ok(),
            _ => None,
        };

        // Infrastructure details stay in the logs
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error_type: self.error_type().to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ContractError>;
