//! Dataset listing and creation.
//!
//! Failed requests are reported through the notifier and also returned, so
//! callers can both show the notice and branch on the error.

use std::sync::Arc;

use thiserror::Error;
use tidetable_sdk::{ApiError, CreateDataset, DatasetApi, DatasetMeta, DatasetSummary};
use tracing::{debug, warn};

use crate::identity::ClientIdentity;
use crate::notify::{Notice, Notifier};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("dataset name is required")]
    NameRequired,
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub struct Catalog {
    api: Arc<dyn DatasetApi>,
    notifier: Arc<dyn Notifier>,
    identity: ClientIdentity,
}

impl Catalog {
    pub fn new(
        api: Arc<dyn DatasetApi>,
        notifier: Arc<dyn Notifier>,
        identity: ClientIdentity,
    ) -> Self {
        Self {
            api,
            notifier,
            identity,
        }
    }

    /// Catalog bound to [`ClientIdentity::global`].
    pub fn with_global_identity(api: Arc<dyn DatasetApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(api, notifier, ClientIdentity::global().clone())
    }

    pub fn client_id(&self) -> &str {
        self.identity.id()
    }

    pub async fn list_all(&self) -> Result<Vec<DatasetSummary>, CatalogError> {
        let result = self.api.list_all().await;
        self.reported("list_all", result)
    }

    /// Datasets created by this client.
    pub async fn list_mine(&self) -> Result<Vec<DatasetSummary>, CatalogError> {
        let result = self.api.list_mine(self.identity.id()).await;
        self.reported("list_mine", result)
    }

    /// Create a dataset owned by this client. Column names are trimmed and
    /// blanks dropped.
    pub async fn create(&self, name: &str, columns: &[&str]) -> Result<DatasetMeta, CatalogError> {
        let name = name.trim();
        if name.is_empty() {
            self.notifier
                .notify(Notice::validation("Dataset name is required"));
            return Err(CatalogError::NameRequired);
        }
        let columns: Vec<String> = columns
            .iter()
            .map(|column| column.trim())
            .filter(|column| !column.is_empty())
            .map(str::to_string)
            .collect();
        let request = CreateDataset {
            name: name.to_string(),
            columns: (!columns.is_empty()).then_some(columns),
            created_by_client: Some(self.identity.id().to_string()),
        };
        let result = self.api.create_dataset(&request).await;
        let meta = self.reported("create_dataset", result)?;
        debug!(
            target = "tidetable::catalog",
            dataset = meta.id,
            name = %meta.name,
            "dataset created"
        );
        Ok(meta)
    }

    /// Whether the API answers its health probe. Not reported to the user.
    pub async fn api_reachable(&self) -> bool {
        match self.api.health().await {
            Ok(()) => true,
            Err(err) => {
                debug!(target = "tidetable::catalog", error = %err, "health probe failed");
                false
            }
        }
    }

    fn reported<T>(
        &self,
        operation: &'static str,
        result: Result<T, ApiError>,
    ) -> Result<T, CatalogError> {
        result.map_err(|err| {
            warn!(
                target = "tidetable::catalog",
                operation,
                error = %err,
                "request failed"
            );
            self.notifier.notify(Notice::error(err.user_message()));
            CatalogError::Api(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Schema;
    use crate::notify::{ChannelNotifier, NoticeLevel};
    use pretty_assertions::assert_eq;
    use tidetable_sdk::{ApiCall, InMemoryDatasetApi};

    fn catalog(api: Arc<InMemoryDatasetApi>) -> (Catalog, tokio::sync::mpsc::UnboundedReceiver<Notice>) {
        let (notifier, notices) = ChannelNotifier::new();
        let identity = ClientIdentity::ephemeral();
        (Catalog::new(api, Arc::new(notifier), identity), notices)
    }

    #[test_timeout::tokio_timeout_test]
    async fn created_datasets_are_listed_as_mine() {
        let api = Arc::new(InMemoryDatasetApi::new());
        api.seed("someone else's", Schema::default(), Vec::new());
        let (catalog, _notices) = catalog(api.clone());

        let meta = catalog.create("  Inventory ", &["sku", " ", "qty "]).await.unwrap();
        assert_eq!(meta.name, "Inventory");
        assert_eq!(meta.schema.keys().collect::<Vec<_>>(), vec!["sku", "qty"]);
        assert_eq!(
            api.calls()[0],
            ApiCall::CreateDataset(CreateDataset {
                name: "Inventory".into(),
                columns: Some(vec!["sku".into(), "qty".into()]),
                created_by_client: Some(catalog.client_id().to_string()),
            })
        );

        let mine = catalog.list_mine().await.unwrap();
        assert_eq!(mine.iter().map(|d| d.id).collect::<Vec<_>>(), vec![meta.id]);
        assert_eq!(catalog.list_all().await.unwrap().len(), 2);
    }

    #[test_timeout::tokio_timeout_test]
    async fn blank_name_is_a_validation_notice() {
        let api = Arc::new(InMemoryDatasetApi::new());
        let (catalog, mut notices) = catalog(api.clone());
        assert!(matches!(
            catalog.create("   ", &[]).await,
            Err(CatalogError::NameRequired)
        ));
        assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Validation);
        assert!(api.calls().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn failures_are_notified_and_returned() {
        let api = Arc::new(InMemoryDatasetApi::new());
        api.fail_operation("list_all");
        api.fail_operation("health");
        let (catalog, mut notices) = catalog(api);

        assert!(matches!(catalog.list_all().await, Err(CatalogError::Api(_))));
        assert_eq!(notices.try_recv().unwrap(), Notice::error("list_all failed"));

        assert!(!catalog.api_reachable().await);
        assert!(notices.try_recv().is_err());
    }
}
