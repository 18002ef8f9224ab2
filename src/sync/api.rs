//! Sync API client
//!
//! HTTP client for the journal sync service plus the [`RemoteApi`] trait the
//! orchestrator, queue processor and conflict manager are written against.
//! Tests swap in an in-memory implementation; production uses
//! [`SyncApiClient`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use super::models::{Conflict, EncryptedMetric, ResolutionChoice, SyncOp};

const REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncApiError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("rate limited")]
    RateLimited,

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for SyncApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            SyncApiError::Network(err.to_string())
        } else {
            SyncApiError::Request(err.to_string())
        }
    }
}

pub type ApiResult<T> = Result<T, SyncApiError>;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SetTierRequest {
    pub tier: String,
    pub consented_at: DateTime<Utc>,
    /// Public context for metric aggregation, sent when entering a tier that
    /// uploads metrics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRecordRequest {
    pub id: String,
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveConflictRequest {
    pub chosen_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_ciphertext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConflictListResponse {
    conflicts: Vec<Conflict>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

// ============================================================================
// Remote API trait
// ============================================================================

/// Everything the sync layer needs from the server, behind one seam so tests
/// can run against an in-memory store.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Whether an auth token is currently held. Callers use this to decide
    /// between deferring server work and performing it.
    async fn has_token(&self) -> bool;

    /// Record the user's tier choice server-side before any data moves.
    async fn set_privacy_tier(&self, req: SetTierRequest) -> ApiResult<()>;

    /// Idempotent upload of one encrypted entry, keyed by record id.
    async fn upload_encrypted_record(&self, req: UploadRecordRequest) -> ApiResult<()>;

    async fn upload_encrypted_metrics(&self, metrics: Vec<EncryptedMetric>) -> ApiResult<()>;

    async fn delete_all_user_data(&self) -> ApiResult<()>;

    async fn delete_encrypted_content(&self) -> ApiResult<()>;

    async fn delete_all_metrics(&self) -> ApiResult<()>;

    async fn list_conflicts(&self) -> ApiResult<Vec<Conflict>>;

    async fn resolve_conflict(
        &self,
        conflict_id: &str,
        choice: ResolutionChoice,
        req: ResolveConflictRequest,
    ) -> ApiResult<()>;

    /// Replay one queued mutation against the collection endpoint.
    async fn push_mutation(
        &self,
        op: SyncOp,
        collection: &str,
        record_id: &str,
        payload: &str,
    ) -> ApiResult<()>;
}

// ============================================================================
// HTTP client
// ============================================================================

pub struct SyncApiClient {
    client: Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl SyncApiClient {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncApiError::Request(format!("invalid base url: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| SyncApiError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: RwLock::new(None),
        })
    }

    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SyncApiError::Request(format!("invalid endpoint {}: {}", path, e)))
    }

    async fn authed(&self, builder: reqwest::RequestBuilder) -> ApiResult<reqwest::RequestBuilder> {
        match self.token.read().await.as_deref() {
            Some(token) => Ok(builder.bearer_auth(token)),
            None => Err(SyncApiError::Unauthorized),
        }
    }

    async fn handle_response(&self, response: Response) -> ApiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.message)
            .unwrap_or_default();

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncApiError::Unauthorized,
            StatusCode::NOT_FOUND => SyncApiError::NotFound,
            StatusCode::TOO_MANY_REQUESTS => SyncApiError::RateLimited,
            _ => SyncApiError::Server {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn send_empty(&self, builder: reqwest::RequestBuilder) -> ApiResult<()> {
        let builder = self.authed(builder).await?;
        let response = builder.send().await?;
        self.handle_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for SyncApiClient {
    async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn set_privacy_tier(&self, req: SetTierRequest) -> ApiResult<()> {
        let url = self.endpoint("user/privacy-tier")?;
        self.send_empty(self.client.put(url).json(&req)).await
    }

    async fn upload_encrypted_record(&self, req: UploadRecordRequest) -> ApiResult<()> {
        let url = self.endpoint(&format!("entries/{}", req.id))?;
        self.send_empty(self.client.put(url).json(&req)).await
    }

    async fn upload_encrypted_metrics(&self, metrics: Vec<EncryptedMetric>) -> ApiResult<()> {
        let url = self.endpoint("metrics/batch")?;
        self.send_empty(self.client.post(url).json(&metrics)).await
    }

    async fn delete_all_user_data(&self) -> ApiResult<()> {
        let url = self.endpoint("user/data")?;
        self.send_empty(self.client.delete(url)).await
    }

    async fn delete_encrypted_content(&self) -> ApiResult<()> {
        let url = self.endpoint("entries")?;
        self.send_empty(self.client.delete(url)).await
    }

    async fn delete_all_metrics(&self) -> ApiResult<()> {
        let url = self.endpoint("metrics")?;
        self.send_empty(self.client.delete(url)).await
    }

    async fn list_conflicts(&self) -> ApiResult<Vec<Conflict>> {
        let url = self.endpoint("conflicts")?;
        let builder = self.authed(self.client.get(url)).await?;
        let response = builder.send().await?;
        let response = self.handle_response(response).await?;

        let body: ConflictListResponse = response
            .json()
            .await
            .map_err(|e| SyncApiError::InvalidResponse(e.to_string()))?;
        Ok(body.conflicts)
    }

    async fn resolve_conflict(
        &self,
        conflict_id: &str,
        _choice: ResolutionChoice,
        req: ResolveConflictRequest,
    ) -> ApiResult<()> {
        let url = self.endpoint(&format!("conflicts/{}/resolve", conflict_id))?;
        self.send_empty(self.client.post(url).json(&req)).await
    }

    async fn push_mutation(
        &self,
        op: SyncOp,
        collection: &str,
        record_id: &str,
        payload: &str,
    ) -> ApiResult<()> {
        let url = self.endpoint(&format!("{}/{}", collection, record_id))?;
        match op {
            SyncOp::Create | SyncOp::Update => {
                let body: serde_json::Value = serde_json::from_str(payload)
                    .map_err(|e| SyncApiError::Request(format!("invalid payload: {}", e)))?;
                self.send_empty(self.client.put(url).json(&body)).await
            }
            SyncOp::Delete => self.send_empty(self.client.delete(url)).await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
