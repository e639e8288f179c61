//! NodeResourceInfo record persistence.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::client::Client;
use tokio::time::timeout;

use crate::error::AppError;
use crate::k8s::{Page, API_TIMEOUT};
use opsflow_core::crd::{NodeResourceInfo, RequiredMetadata};

/// The reason reported by the K8s API when a created object already exists.
const REASON_ALREADY_EXISTS: &str = "AlreadyExists";

/// A store of NodeResourceInfo records keyed by node name.
///
/// Implementations must map store failures onto `AppError`: `NotFound`, `AlreadyExists` and
/// `Conflict` for the respective conditions, `Query` for anything else.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the named record, `None` if it does not exist.
    async fn get(&self, name: &str) -> Result<Option<NodeResourceInfo>>;

    /// List a page of records.
    async fn list(&self, continue_token: Option<String>, limit: u32) -> Result<Page<NodeResourceInfo>>;

    /// Create the given record.
    async fn create(&self, record: &NodeResourceInfo) -> Result<NodeResourceInfo>;

    /// Replace the given record, provided the stored record is still at `resource_version`.
    async fn update(&self, record: &NodeResourceInfo, resource_version: &str) -> Result<NodeResourceInfo>;

    /// Delete the named record.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// List the names of all stored records, paging through the store.
pub async fn list_all_names(store: &dyn RecordStore, page_size: u32) -> Result<Vec<String>> {
    let (mut names, mut continue_token) = (vec![], None);
    loop {
        let page = store.list(continue_token, page_size).await.context("error listing NodeResourceInfo records")?;
        names.extend(page.items.iter().map(|record| record.spec.node_name.clone()));
        match page.continue_token {
            Some(token) => continue_token = Some(token),
            None => break,
        }
    }
    Ok(names)
}

/// A `RecordStore` backed by the NodeResourceInfo CRD.
pub struct KubeRecordStore {
    api: Api<NodeResourceInfo>,
}

impl KubeRecordStore {
    /// Create a new instance.
    pub fn new(client: Client) -> Self {
        Self { api: Api::all(client) }
    }
}

#[async_trait]
impl RecordStore for KubeRecordStore {
    async fn get(&self, name: &str) -> Result<Option<NodeResourceInfo>> {
        timeout(API_TIMEOUT, self.api.get_opt(name))
            .await
            .context("timeout fetching NodeResourceInfo")?
            .map_err(|err| api_error(err, name))
    }

    async fn list(&self, continue_token: Option<String>, limit: u32) -> Result<Page<NodeResourceInfo>> {
        let mut params = ListParams::default().limit(limit);
        params.continue_token = continue_token;
        let list = timeout(API_TIMEOUT, self.api.list(&params))
            .await
            .context("timeout listing NodeResourceInfo records")?
            .map_err(|err| api_error(err, "*"))?;
        Ok(Page {
            continue_token: list.metadata.continue_.filter(|token| !token.is_empty()),
            items: list.items,
        })
    }

    async fn create(&self, record: &NodeResourceInfo) -> Result<NodeResourceInfo> {
        timeout(API_TIMEOUT, self.api.create(&PostParams::default(), record))
            .await
            .context("timeout creating NodeResourceInfo")?
            .map_err(|err| api_error(err, record.name()))
    }

    async fn update(&self, record: &NodeResourceInfo, resource_version: &str) -> Result<NodeResourceInfo> {
        let mut record = record.clone();
        record.metadata.resource_version = Some(resource_version.into());
        record.metadata.managed_fields = None;
        timeout(API_TIMEOUT, self.api.replace(record.name(), &PostParams::default(), &record))
            .await
            .context("timeout updating NodeResourceInfo")?
            .map_err(|err| api_error(err, record.name()))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        timeout(API_TIMEOUT, self.api.delete(name, &DeleteParams::default()))
            .await
            .context("timeout deleting NodeResourceInfo")?
            .map(|_| ())
            .map_err(|err| api_error(err, name))
    }
}

/// Map a K8s API error onto the application error taxonomy.
fn api_error(err: kube::Error, name: &str) -> anyhow::Error {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => AppError::NotFound(name.into()).into(),
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == REASON_ALREADY_EXISTS => AppError::AlreadyExists(name.into()).into(),
        kube::Error::Api(resp) if resp.code == 409 => AppError::Conflict(name.into()).into(),
        err => AppError::Query(anyhow::Error::new(err).context(format!("error accessing NodeResourceInfo {}", name))).into(),
    }
}
