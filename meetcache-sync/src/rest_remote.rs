//! HTTP client for the PostgREST-style data API.
//!
//! Every table maps to `/rest/v1/{resource}`; rows are addressed with
//! `{key}=eq.{id}` filters. The bearer token is supplied by the auth layer via
//! [`RestRemoteStore::set_access_token`]. Uses reqwest with JSON serialization.

use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use async_trait::async_trait;
use meetcache_store::Table;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

const PREFER_REPRESENTATION: &str = "return=representation";
const PREFER_MERGE: &str = "resolution=merge-duplicates,return=representation";

/// `RemoteStore` over HTTP.
pub struct RestRemoteStore {
    client: Client,
    config: RemoteConfig,
    access_token: Arc<RwLock<Option<String>>>,
}

impl RestRemoteStore {
    pub fn new(config: RemoteConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Sets the bearer token (after login or refresh).
    pub async fn set_access_token(&self, token: String) {
        *self.access_token.write().await = Some(token);
    }

    pub async fn clear_access_token(&self) {
        *self.access_token.write().await = None;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.access_token.read().await.is_some()
    }

    fn resource_url(&self, table: Table) -> SyncResult<String> {
        let resource = table
            .remote_resource()
            .ok_or(SyncError::LocalOnlyTable(table))?;
        Ok(format!(
            "{}/rest/v1/{resource}",
            self.config.api_base_url.trim_end_matches('/')
        ))
    }

    /// Builds an authenticated request against a table.
    async fn request(&self, method: Method, table: Table) -> SyncResult<RequestBuilder> {
        let url = self.resource_url(table)?;
        let token = self
            .access_token
            .read()
            .await
            .clone()
            .ok_or(SyncError::AuthRequired)?;

        let mut req = self.client.request(method, &url).bearer_auth(token);
        if let Some(key) = &self.config.api_key {
            req = req.header("apikey", key);
        }
        Ok(req)
    }

    fn key_filter(table: Table, id: &str) -> (String, String) {
        (table.key_path().to_string(), format!("eq.{id}"))
    }
}

/// Maps non-2xx responses to `SyncError::Remote`, keeping the body as the
/// message.
async fn check_status(resp: Response) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(SyncError::Remote {
        status: status.as_u16(),
        message: if message.is_empty() {
            status.to_string()
        } else {
            message
        },
    })
}

/// Extracts the single returned row, falling back to what was sent when the
/// server returned no representation.
async fn representation(resp: Response, sent: &Value) -> SyncResult<Value> {
    let body = resp.text().await?;
    if body.trim().is_empty() {
        return Ok(sent.clone());
    }
    match serde_json::from_str::<Value>(&body)? {
        Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
        Value::Array(_) => Ok(sent.clone()),
        row @ Value::Object(_) => Ok(row),
        other => Err(SyncError::InvalidPayload(format!(
            "unexpected response body: {other}"
        ))),
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn insert(&self, table: Table, payload: &Value) -> SyncResult<Value> {
        debug!("POST {table}");
        let resp = self
            .request(Method::POST, table)
            .await?
            .header("Prefer", PREFER_REPRESENTATION)
            .json(payload)
            .send()
            .await?;
        representation(check_status(resp).await?, payload).await
    }

    async fn upsert_by_key(&self, table: Table, payload: &Value) -> SyncResult<Value> {
        debug!("POST {table} (upsert)");
        let resp = self
            .request(Method::POST, table)
            .await?
            .query(&[("on_conflict", table.key_path())])
            .header("Prefer", PREFER_MERGE)
            .json(payload)
            .send()
            .await?;
        representation(check_status(resp).await?, payload).await
    }

    async fn fetch_by_key_and_version(
        &self,
        table: Table,
        id: &str,
        lower_version: i64,
    ) -> SyncResult<Option<Value>> {
        debug!("GET {table}/{id} (version > {lower_version})");
        let resp = self
            .request(Method::GET, table)
            .await?
            .query(&[
                Self::key_filter(table, id),
                ("version".to_string(), format!("gt.{lower_version}")),
                ("select".to_string(), "*".to_string()),
            ])
            .send()
            .await?;
        let rows: Vec<Value> = check_status(resp).await?.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn patch(&self, table: Table, id: &str, payload: &Value) -> SyncResult<()> {
        debug!("PATCH {table}/{id}");
        let resp = self
            .request(Method::PATCH, table)
            .await?
            .query(&[Self::key_filter(table, id)])
            .json(payload)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn delete(&self, table: Table, id: &str) -> SyncResult<()> {
        debug!("DELETE {table}/{id}");
        let resp = self
            .request(Method::DELETE, table)
            .await?
            .query(&[Self::key_filter(table, id)])
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}
