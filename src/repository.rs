//! Domain-level reads over contracts and their versions.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::error::{ContractError, Result};
use crate::models::{
    Contract, ContractAssignments, ContractId, ContractSnapshot, ContractVersion, PriceTerms,
    ProductId, Suspension, VersionNumber,
};
use crate::store::{ContractStore, ExistingClaim};
use crate::versioning::{VersionDiff, VersionStore};

pub struct ContractRepository {
    store: Arc<dyn ContractStore>,
    versions: Arc<VersionStore>,
}

impl ContractRepository {
    pub fn new(store: Arc<dyn ContractStore>, versions: Arc<VersionStore>) -> Self {
        Self { store, versions }
    }

    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    pub async fn get_contract(&self, contract_id: ContractId) -> Result<Contract> {
        self.store
            .contract(contract_id)
            .await?
            .ok_or_else(|| ContractError::not_found("Contract", contract_id))
    }

    /// Not suspended, and the term includes `as_of` (open ends included)
    pub async fn get_active_contracts(&self, as_of: NaiveDate) -> Result<Vec<Contract>> {
        self.store.active_contracts(as_of).await
    }

    pub async fn get_current_snapshot(&self, contract_id: ContractId) -> Result<ContractSnapshot> {
        let contract = self.get_contract(contract_id).await?;
        self.versions
            .reconstruct_as_of(contract_id, contract.current_version_number)
            .await
    }

    pub async fn get_current_assignments(
        &self,
        contract_id: ContractId,
    ) -> Result<ContractAssignments> {
        Ok(self.get_current_snapshot(contract_id).await?.assignments)
    }

    pub async fn get_current_prices(
        &self,
        contract_id: ContractId,
    ) -> Result<BTreeMap<ProductId, PriceTerms>> {
        Ok(self.get_current_snapshot(contract_id).await?.prices)
    }

    pub async fn snapshot_as_of(
        &self,
        contract_id: ContractId,
        version: VersionNumber,
    ) -> Result<ContractSnapshot> {
        self.versions.reconstruct_as_of(contract_id, version).await
    }

    pub async fn list_versions(&self, contract_id: ContractId) -> Result<Vec<ContractVersion>> {
        self.get_contract(contract_id).await?;
        self.store.versions(contract_id).await
    }

    pub async fn diff_versions(
        &self,
        contract_id: ContractId,
        from: VersionNumber,
        to: VersionNumber,
    ) -> Result<VersionDiff> {
        self.versions.diff_versions(contract_id, from, to).await
    }

    /// Current-version claims on a product, for overlap scanning
    pub async fn claims_for_product(
        &self,
        product_id: ProductId,
        exclude_contract_id: Option<ContractId>,
        include_suspended: bool,
    ) -> Result<Vec<ExistingClaim>> {
        self.store
            .claims_for_product(product_id, exclude_contract_id, include_suspended)
            .await
    }

    /// Suspend without creating a new version
    pub async fn suspend(&self, contract_id: ContractId, date: NaiveDate) -> Result<Contract> {
        let contract = self
            .store
            .set_suspension(contract_id, Suspension::Suspend(date))
            .await?;
        info!(contract_id, %date, "Contract suspended");
        Ok(contract)
    }

    pub async fn unsuspend(&self, contract_id: ContractId) -> Result<Contract> {
        let contract = self
            .store
            .set_suspension(contract_id, Suspension::Unsuspend)
            .await?;
        info!(contract_id, "Contract unsuspended");
        Ok(contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssignmentKind, ContractAttributes, ReferenceEntity};
    use crate::store::MemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn setup() -> ContractRepository {
        let store = Arc::new(MemoryStore::new().with_references([
            ReferenceEntity::new(AssignmentKind::Product, 10, "Chicken Breast"),
            ReferenceEntity::new(AssignmentKind::OpCo, 1, "Denver"),
        ]));
        let versions = Arc::new(VersionStore::new(store.clone(), store.clone()));

        let contracts = [
            (1, date(2025, 1, 1), Some(date(2025, 6, 30))),
            (2, date(2025, 3, 1), None),
            (3, date(2026, 1, 1), Some(date(2026, 12, 31))),
        ];
        for (id, start, end) in contracts {
            let mut assignments = ContractAssignments::default();
            assignments.products.insert(10);
            versions
                .create_initial_version(
                    id,
                    ContractAttributes::new(format!("C{}", id), start, end),
                    assignments,
                    BTreeMap::new(),
                )
                .await
                .unwrap();
        }
        ContractRepository::new(store, versions)
    }

    #[tokio::test]
    async fn test_active_contracts_filter_dates_and_suspension() {
        let repo = setup().await;

        let ids = |contracts: Vec<Contract>| contracts.iter().map(|c| c.id).collect::<Vec<_>>();
        assert_eq!(ids(repo.get_active_contracts(date(2025, 4, 1)).await.unwrap()), vec![1, 2]);
        assert_eq!(ids(repo.get_active_contracts(date(2025, 6, 30)).await.unwrap()), vec![1, 2]);
        assert_eq!(ids(repo.get_active_contracts(date(2025, 7, 1)).await.unwrap()), vec![2]);
        assert_eq!(ids(repo.get_active_contracts(date(2026, 2, 1)).await.unwrap()), vec![2, 3]);

        repo.suspend(2, date(2025, 5, 1)).await.unwrap();
        assert_eq!(ids(repo.get_active_contracts(date(2025, 7, 1)).await.unwrap()), Vec::<i64>::new());

        let contract = repo.unsuspend(2).await.unwrap();
        assert_eq!(contract.current_version_number, 1);
        assert_eq!(ids(repo.get_active_contracts(date(2025, 7, 1)).await.unwrap()), vec![2]);
    }

    #[tokio::test]
    async fn test_current_reads() {
        let repo = setup().await;
        let assignments = repo.get_current_assignments(1).await.unwrap();
        assert!(assignments.products.contains(&10));
        assert!(repo.get_current_prices(1).await.unwrap().is_empty());
        assert_eq!(repo.list_versions(1).await.unwrap().len(), 1);
        assert!(matches!(
            repo.list_versions(42).await,
            Err(ContractError::NotFound { .. })
        ));
    }
}
