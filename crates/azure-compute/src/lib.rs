//! Typed Rust client for the Azure Resource Manager compute API.
//!
//! Covers the subset needed for parking game-server VMs:
//! instance view, start, deallocate, and long-running operation status.

mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::CONTENT_LENGTH;
use tokio::sync::Mutex;

pub use types::*;

const LOGIN_URL: &str = "https://login.microsoftonline.com";
const MANAGEMENT_URL: &str = "https://management.azure.com";
const API_VERSION: &str = "2024-07-01";

/// Upper bound on any single HTTP exchange with the control plane.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens are refreshed this long before they expire.
const TOKEN_SLACK: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("azure request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("azure {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Service principal used for the client-credentials flow.
#[derive(Clone)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Client for virtual machines in one subscription.
#[derive(Clone)]
pub struct ComputeClient {
    credentials: Credentials,
    subscription_id: String,
    login_url: String,
    management_url: String,
    http: reqwest::Client,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl ComputeClient {
    pub fn new(credentials: Credentials, subscription_id: impl Into<String>) -> Self {
        Self {
            credentials,
            subscription_id: subscription_id.into(),
            login_url: LOGIN_URL.into(),
            management_url: MANAGEMENT_URL.into(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            token: Arc::new(Mutex::new(None)),
        }
    }

    /// Point the client at a different cloud (sovereign clouds, local fakes).
    pub fn with_endpoints(
        mut self,
        login_url: impl Into<String>,
        management_url: impl Into<String>,
    ) -> Self {
        self.login_url = login_url.into().trim_end_matches('/').to_string();
        self.management_url = management_url.into().trim_end_matches('/').to_string();
        self
    }

    fn vm_url(&self, resource_group: &str, vm: &str, path: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachines/{vm}{path}?api-version={API_VERSION}",
            self.management_url, self.subscription_id,
        )
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    /// Tokens are requested for whichever management endpoint is in use.
    fn scope(&self) -> String {
        format!("{}/.default", self.management_url)
    }

    /// Bearer header value, fetching a fresh token when the cached one is near expiry.
    async fn auth(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(format!("Bearer {}", token.value));
        }

        let scope = self.scope();
        let resp = self
            .http
            .post(format!(
                "{}/{}/oauth2/v2.0/token",
                self.login_url, self.credentials.tenant_id
            ))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;

        let token: TokenResponse = Self::check(resp, "token").await?.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SLACK);
        let header = format!("Bearer {}", token.access_token);
        *cached = Some(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime,
        });
        Ok(header)
    }

    // ── Virtual machines ─────────────────────────────────────────────

    pub async fn instance_view(&self, resource_group: &str, vm: &str) -> Result<InstanceView> {
        let resp = self
            .http
            .get(self.vm_url(resource_group, vm, "/instanceView"))
            .header("Authorization", self.auth().await?)
            .send()
            .await?;

        Self::check(resp, "instance view")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    pub async fn begin_start(&self, resource_group: &str, vm: &str) -> Result<AsyncOperation> {
        self.begin_action(resource_group, vm, "/start", "start").await
    }

    pub async fn begin_deallocate(&self, resource_group: &str, vm: &str) -> Result<AsyncOperation> {
        self.begin_action(resource_group, vm, "/deallocate", "deallocate")
            .await
    }

    async fn begin_action(
        &self,
        resource_group: &str,
        vm: &str,
        path: &str,
        endpoint: &'static str,
    ) -> Result<AsyncOperation> {
        let resp = self
            .http
            .post(self.vm_url(resource_group, vm, path))
            .header("Authorization", self.auth().await?)
            .header(CONTENT_LENGTH, "0")
            .send()
            .await?;

        let resp = Self::check(resp, endpoint).await?;
        Ok(AsyncOperation::from_headers(resp.headers()))
    }

    // ── Long-running operations ──────────────────────────────────────

    pub async fn operation_status(&self, op: &AsyncOperation) -> Result<OperationStatus> {
        match &op.poll {
            PollTarget::Completed => Ok(OperationStatus::Succeeded),
            PollTarget::AsyncOperation(url) => {
                let resp = self
                    .http
                    .get(url)
                    .header("Authorization", self.auth().await?)
                    .send()
                    .await?;

                let body: OperationBody = Self::check(resp, "operation status")
                    .await?
                    .json()
                    .await?;
                Ok(body.into())
            }
            PollTarget::Location(url) => {
                let resp = self
                    .http
                    .get(url)
                    .header("Authorization", self.auth().await?)
                    .send()
                    .await?;

                if resp.status() == reqwest::StatusCode::ACCEPTED {
                    return Ok(OperationStatus::InProgress);
                }
                Self::check(resp, "operation location").await?;
                Ok(OperationStatus::Succeeded)
            }
        }
    }
}
