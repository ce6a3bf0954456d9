pub mod azure;
pub mod operation;
pub mod types;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use operation::{OperationStatus, PendingOperation, Poller};
use types::{InstanceId, InstanceView};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("azure api error: {0}")]
    Azure(#[from] azure_compute::Error),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("operation was canceled by the provider")]
    OperationCanceled,

    #[error("operation did not finish within {0:?}")]
    OperationTimeout(Duration),

    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Known compute provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderName {
    Azure,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "azure" => Ok(Self::Azure),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

/// Backend-agnostic interface to the cloud control plane hosting game servers.
///
/// Start and deallocate are slow: they return as soon as the provider accepts
/// the request, handing back a [`Poller`] the caller drives to completion.
#[async_trait]
pub trait ComputeProvider: Send + Sync + 'static {
    /// Current provisioning and power state.
    async fn instance_view(&self, id: &InstanceId) -> Result<InstanceView>;

    /// Ask the provider to power on a stopped VM.
    async fn begin_start(&self, id: &InstanceId) -> Result<Poller>;

    /// Ask the provider to stop a VM and release its compute, keeping the disk.
    async fn begin_deallocate(&self, id: &InstanceId) -> Result<Poller>;

    /// Provider identifier.
    fn name(&self) -> ProviderName;
}

/// Build the provider selected by `COMPUTE_PROVIDER` (default `azure`).
pub fn build_provider() -> Result<Arc<dyn ComputeProvider>> {
    dotenvy::dotenv().ok();

    let name: ProviderName = std::env::var("COMPUTE_PROVIDER")
        .unwrap_or_else(|_| "azure".into())
        .parse()?;

    let provider: Arc<dyn ComputeProvider> = match name {
        ProviderName::Azure => Arc::new(azure::AzureProvider::from_env()?),
    };
    tracing::info!(provider = %name, "registered compute provider");

    Ok(provider)
}
