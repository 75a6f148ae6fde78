//! Contract versioning and conflict detection for food-distribution supply
//! contracts.
//!
//! Every committed change to a contract produces an immutable version;
//! proposals move through a small workflow and are checked for overlapping
//! product claims before they may complete.

pub mod cache;
pub mod config;
pub mod conflicts;
pub mod db;
pub mod error;
pub mod models;
pub mod proposals;
pub mod repository;
pub mod routes;
pub mod state;
pub mod store;
pub mod versioning;

pub use error::{ContractError, Result};
pub use state::{AppState, EngineSettings};
