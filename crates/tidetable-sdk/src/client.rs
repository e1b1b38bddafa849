use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::model::{
    CellPatch, CreateDataset, DatasetId, DatasetMeta, DatasetSummary, ExportFormat,
    ExportPayload, RowFields, RowId, RowsPage, Schema, UpsertResult,
};
use crate::{ApiError, DatasetApi};

#[derive(Clone)]
pub struct HttpDatasetApi {
    http: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct AllDatasets {
    #[serde(default)]
    all: Vec<DatasetSummary>,
}

#[derive(Deserialize)]
struct SchemaEnvelope {
    #[serde(default)]
    schema: Schema,
}

#[derive(Deserialize)]
struct Deleted {
    #[serde(default)]
    deleted: u64,
}

impl HttpDatasetApi {
    pub fn new(base_url: Url) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }

    async fn read_json<T>(res: Response) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        if res.status().is_success() {
            Ok(res.json::<T>().await?)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(ApiError::UnexpectedStatus { status, body })
        }
    }

    async fn expect_success(res: Response) -> Result<(), ApiError> {
        if res.status().is_success() {
            Ok(())
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(ApiError::UnexpectedStatus { status, body })
        }
    }
}

#[async_trait]
impl DatasetApi for HttpDatasetApi {
    async fn dataset(&self, dataset: DatasetId) -> Result<DatasetMeta, ApiError> {
        let url = self.endpoint(&format!("/datasets/{dataset}"))?;
        let res = self.http.get(url).send().await?;
        Self::read_json(res).await
    }

    async fn rows(&self, dataset: DatasetId, query: Option<&str>) -> Result<RowsPage, ApiError> {
        let url = self.endpoint(&format!("/datasets/{dataset}/rows"))?;
        let mut request = self.http.get(url);
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            request = request.query(&[("q", q)]);
        }
        let res = request.send().await?;
        let page: RowsPage = Self::read_json(res).await?;
        debug!(
            target = "tidetable::api",
            dataset,
            rows = page.rows.len(),
            total = page.total,
            "fetched rows"
        );
        Ok(page)
    }

    async fn patch_cell(&self, dataset: DatasetId, patch: &CellPatch) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("/datasets/{dataset}/rows/patch"))?;
        let res = self.http.post(url).json(patch).send().await?;
        Self::expect_success(res).await
    }

    async fn upsert_rows(
        &self,
        dataset: DatasetId,
        rows: Vec<RowFields>,
    ) -> Result<UpsertResult, ApiError> {
        let url = self.endpoint(&format!("/datasets/{dataset}/rows/upsert"))?;
        let res = self
            .http
            .post(url)
            .json(&json!({ "rows": rows }))
            .send()
            .await?;
        Self::read_json(res).await
    }

    async fn add_column(&self, dataset: DatasetId, key: &str) -> Result<Schema, ApiError> {
        let url = self.endpoint(&format!("/datasets/{dataset}/columns/add"))?;
        let res = self
            .http
            .post(url)
            .json(&json!({ "key": key }))
            .send()
            .await?;
        let envelope: SchemaEnvelope = Self::read_json(res).await?;
        Ok(envelope.schema)
    }

    async fn delete_rows(&self, dataset: DatasetId, ids: &[RowId]) -> Result<u64, ApiError> {
        let url = self.endpoint(&format!("/datasets/{dataset}/rows"))?;
        let params: Vec<(&str, RowId)> = ids.iter().map(|id| ("ids", *id)).collect();
        let res = self.http.delete(url).query(&params).send().await?;
        let deleted: Deleted = Self::read_json(res).await?;
        Ok(deleted.deleted)
    }

    async fn export(
        &self,
        dataset: DatasetId,
        format: ExportFormat,
    ) -> Result<ExportPayload, ApiError> {
        let url = self.endpoint(&format!("/datasets/{dataset}/export"))?;
        let res = self
            .http
            .get(url)
            .query(&[("fmt", format.as_str())])
            .send()
            .await?;
        Self::read_json(res).await
    }

    async fn list_all(&self) -> Result<Vec<DatasetSummary>, ApiError> {
        let url = self.endpoint("/datasets/all")?;
        let res = self.http.get(url).send().await?;
        let all: AllDatasets = Self::read_json(res).await?;
        Ok(all.all)
    }

    async fn list_mine(&self, client_id: &str) -> Result<Vec<DatasetSummary>, ApiError> {
        let url = self.endpoint("/datasets/mine-local")?;
        let res = self
            .http
            .get(url)
            .query(&[("client_id", client_id)])
            .send()
            .await?;
        Self::read_json(res).await
    }

    async fn create_dataset(&self, request: &CreateDataset) -> Result<DatasetMeta, ApiError> {
        let url = self.endpoint("/datasets")?;
        let res = self.http.post(url).json(request).send().await?;
        Self::read_json(res).await
    }

    async fn health(&self) -> Result<(), ApiError> {
        let url = self.endpoint("/healthz")?;
        let res = self.http.get(url).send().await?;
        Self::expect_success(res).await
    }
}
