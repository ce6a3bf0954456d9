use async_trait::async_trait;
use azure_compute::{AsyncOperation, ComputeClient, Credentials};
use tracing::info;

use crate::operation::{OperationStatus, PendingOperation, Poller};
use crate::types::{InstanceId, InstanceView};
use crate::{ComputeProvider, Error, ProviderName, Result};

/// Azure Resource Manager provider using the `azure-compute` client.
///
/// All configuration is loaded from environment variables via `from_env()`.
pub struct AzureProvider {
    client: ComputeClient,
}

impl AzureProvider {
    /// Create from env vars:
    ///
    /// - `AZURE_TENANT_ID` (required)
    /// - `AZURE_CLIENT_ID` (required)
    /// - `AZURE_CLIENT_SECRET` (required)
    /// - `AZURE_SUBSCRIPTION_ID` (required)
    /// - `AZURE_AUTHORITY_HOST`, `AZURE_RESOURCE_MANAGER_URL` (optional, both
    ///   together, for clouds other than the public one)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::MissingEnv(name.into()))
        };

        let credentials = Credentials {
            tenant_id: var("AZURE_TENANT_ID")?,
            client_id: var("AZURE_CLIENT_ID")?,
            client_secret: var("AZURE_CLIENT_SECRET")?,
        };
        let mut client = ComputeClient::new(credentials, var("AZURE_SUBSCRIPTION_ID")?);

        if let Some(authority) = lookup("AZURE_AUTHORITY_HOST").filter(|v| !v.trim().is_empty()) {
            let management = var("AZURE_RESOURCE_MANAGER_URL")?;
            info!(%authority, %management, "azure: using custom endpoints");
            client = client.with_endpoints(authority, management);
        }

        Ok(Self::new(client))
    }

    pub fn new(client: ComputeClient) -> Self {
        Self { client }
    }

    fn poller(&self, op: AsyncOperation) -> Poller {
        Poller::new(AzureOperation {
            client: self.client.clone(),
            op,
        })
    }
}

#[async_trait]
impl ComputeProvider for AzureProvider {
    async fn instance_view(&self, id: &InstanceId) -> Result<InstanceView> {
        let view = self
            .client
            .instance_view(&id.resource_group, &id.name)
            .await?;
        Ok(InstanceView::from_codes(view.codes()))
    }

    async fn begin_start(&self, id: &InstanceId) -> Result<Poller> {
        let op = self
            .client
            .begin_start(&id.resource_group, &id.name)
            .await?;

        info!(vm = %id, "azure: start accepted");
        Ok(self.poller(op))
    }

    async fn begin_deallocate(&self, id: &InstanceId) -> Result<Poller> {
        let op = self
            .client
            .begin_deallocate(&id.resource_group, &id.name)
            .await?;

        info!(vm = %id, "azure: deallocate accepted");
        Ok(self.poller(op))
    }

    fn name(&self) -> ProviderName {
        ProviderName::Azure
    }
}

/// A long-running Resource Manager operation.
struct AzureOperation {
    client: ComputeClient,
    op: AsyncOperation,
}

#[async_trait]
impl PendingOperation for AzureOperation {
    async fn poll(&mut self) -> Result<OperationStatus> {
        match self.client.operation_status(&self.op).await? {
            azure_compute::OperationStatus::Succeeded => Ok(OperationStatus::Done),
            azure_compute::OperationStatus::InProgress => Ok(OperationStatus::InProgress),
            azure_compute::OperationStatus::Failed(msg) => Err(Error::OperationFailed(msg)),
            azure_compute::OperationStatus::Canceled => Err(Error::OperationCanceled),
        }
    }

    fn poll_interval(&self) -> Option<std::time::Duration> {
        self.op.retry_after
    }
}
