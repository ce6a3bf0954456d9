//! Idempotent start/deallocate against the compute provider.
//!
//! Every entry point looks before it leaps: probe the game server, read the
//! VM's power state, and only then decide whether a cloud call is needed.
//! Operations are serialized per server through the server's lifecycle slot,
//! and each one as a whole is bounded by the operation timeout and abandoned
//! on shutdown.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mcm_infra::ComputeProvider;
use mcm_infra::types::{InstanceView, PowerState};
use tracing::{info, warn};

use crate::error::LifecycleError;
use crate::probe::Prober;
use crate::server::{OperationGuard, Server, ServerStatus};
use crate::shutdown::{self, Shutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Deallocate,
}

impl Operation {
    /// Status held while the operation is in flight.
    fn in_flight(&self) -> ServerStatus {
        match self {
            Self::Start => ServerStatus::Starting,
            Self::Deallocate => ServerStatus::Stopping,
        }
    }

    /// Status once the provider reports completion.
    fn settled(&self) -> ServerStatus {
        match self {
            Self::Start => ServerStatus::Online,
            Self::Deallocate => ServerStatus::Offline,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Deallocate => "deallocate",
        })
    }
}

pub struct Lifecycle {
    provider: Arc<dyn ComputeProvider>,
    prober: Arc<dyn Prober>,
    operation_timeout: Duration,
    shutdown: Shutdown,
}

impl Lifecycle {
    pub fn new(
        provider: Arc<dyn ComputeProvider>,
        prober: Arc<dyn Prober>,
        operation_timeout: Duration,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            provider,
            prober,
            operation_timeout,
            shutdown,
        }
    }

    /// Power a server on unless it is already up or on its way.
    pub async fn start(&self, server: &Server) -> Result<String, LifecycleError> {
        let Some(_guard) = server.try_claim() else {
            return Ok(busy_message(server).await);
        };
        self.bounded(server, Operation::Start, self.start_steps(server))
            .await
    }

    /// Deallocate a server unless it has players or is already going down.
    pub async fn deallocate(&self, server: &Server) -> Result<String, LifecycleError> {
        match server.try_claim() {
            Some(guard) => self.deallocate_claimed(server, guard).await,
            None => Ok(busy_message(server).await),
        }
    }

    /// Deallocate with the lifecycle slot already held by the caller.
    pub async fn deallocate_claimed(
        &self,
        server: &Server,
        _guard: OperationGuard,
    ) -> Result<String, LifecycleError> {
        self.bounded(server, Operation::Deallocate, self.deallocate_steps(server))
            .await
    }

    /// Run `steps` under the operation timeout, giving up early on shutdown.
    /// An abandoned operation leaves the status unknown for reconciliation.
    async fn bounded<F>(
        &self,
        server: &Server,
        operation: Operation,
        steps: F,
    ) -> Result<String, LifecycleError>
    where
        F: Future<Output = Result<String, LifecycleError>>,
    {
        let mut stop = self.shutdown.clone();
        let abandoned = tokio::select! {
            outcome = tokio::time::timeout(self.operation_timeout, steps) => match outcome {
                Ok(result) => return result,
                Err(_) => LifecycleError::TimedOut {
                    server: server.host.clone(),
                    operation,
                    after: self.operation_timeout,
                },
            },
            _ = shutdown::requested(&mut stop) => LifecycleError::Cancelled {
                server: server.host.clone(),
                operation,
            },
        };

        warn!(server = %server.host, %operation, error = %abandoned, "abandoning cloud operation");
        server.set_status(ServerStatus::Unknown).await;
        Err(abandoned)
    }

    async fn start_steps(&self, server: &Server) -> Result<String, LifecycleError> {
        let host = &server.host;

        if let Ok(pong) = server.probe(&*self.prober).await {
            server.settle(ServerStatus::Online).await;
            return Ok(format!(
                "{host} is already running with {} players",
                pong.player_count
            ));
        }

        let view = self.instance_view(server, Operation::Start).await?;
        if view.is_updating() {
            server.release_transient().await;
            return Ok(format!(
                "{host} is currently updating, wait for it to finish whatever it's doing"
            ));
        }

        if view.is_stopped() {
            self.run(server, Operation::Start).await?;
            return Ok(format!("{host} started"));
        }

        match &view.power {
            // Hand the server to the fast loop: if the game never comes up,
            // the error streak deallocates it again.
            Some(PowerState::Starting) => {
                server.settle(ServerStatus::Online).await;
                Ok(format!("{host} is already starting, please wait"))
            }
            Some(PowerState::Running) => {
                server.settle(ServerStatus::Online).await;
                Ok(format!("{host} is running, but Minecraft isn't up yet"))
            }
            Some(PowerState::Stopping | PowerState::Deallocating) => {
                server.release_transient().await;
                Ok(format!(
                    "{host} is still shutting down, try again once it has stopped"
                ))
            }
            Some(state) => {
                server.release_transient().await;
                Ok(format!("{host} is in an unexpected state ({state}), not starting it"))
            }
            None => {
                server.release_transient().await;
                Ok(format!("{host} reported no power state, not starting it"))
            }
        }
    }

    async fn deallocate_steps(&self, server: &Server) -> Result<String, LifecycleError> {
        let host = &server.host;

        if let Ok(pong) = server.probe(&*self.prober).await
            && pong.player_count > 0
        {
            server.settle(ServerStatus::Online).await;
            return Ok(format!(
                "{host} has {} active players, not deallocating",
                pong.player_count
            ));
        }

        let view = self.instance_view(server, Operation::Deallocate).await?;
        if view.is_updating() {
            server.release_transient().await;
            return Ok(format!(
                "{host} is currently updating, wait for it to finish whatever it's doing"
            ));
        }

        match &view.power {
            Some(PowerState::Deallocating) => {
                server.settle(ServerStatus::Offline).await;
                Ok(format!("{host} is already deallocating"))
            }
            Some(PowerState::Deallocated) => {
                server.settle(ServerStatus::Offline).await;
                Ok(format!("{host} is already deallocated"))
            }
            _ => {
                self.run(server, Operation::Deallocate).await?;
                Ok(format!("{host} deallocated"))
            }
        }
    }

    async fn instance_view(
        &self,
        server: &Server,
        operation: Operation,
    ) -> Result<InstanceView, LifecycleError> {
        match self.provider.instance_view(&server.instance_id()).await {
            Ok(view) => Ok(view),
            Err(source) => {
                server.release_transient().await;
                Err(LifecycleError::Cloud {
                    server: server.host.clone(),
                    operation,
                    stage: "instance view",
                    source,
                })
            }
        }
    }

    /// Issue the operation and wait for the provider to finish it.
    async fn run(&self, server: &Server, operation: Operation) -> Result<(), LifecycleError> {
        let id = server.instance_id();
        server.set_status(operation.in_flight()).await;
        info!(server = %server.host, vm = %id, %operation, "issuing cloud operation");

        let begun = match operation {
            Operation::Start => self.provider.begin_start(&id).await,
            Operation::Deallocate => self.provider.begin_deallocate(&id).await,
        };
        let poller = match begun {
            Ok(poller) => poller.with_timeout(self.operation_timeout),
            Err(source) => {
                server.set_status(ServerStatus::Unknown).await;
                return Err(LifecycleError::Cloud {
                    server: server.host.clone(),
                    operation,
                    stage: "begin",
                    source,
                });
            }
        };

        match poller.poll_until_done().await {
            Ok(()) => {
                server.settle(operation.settled()).await;
                info!(server = %server.host, %operation, "cloud operation complete");
                Ok(())
            }
            Err(source) => {
                server.set_status(ServerStatus::Unknown).await;
                Err(LifecycleError::Cloud {
                    server: server.host.clone(),
                    operation,
                    stage: "poll",
                    source,
                })
            }
        }
    }
}

async fn busy_message(server: &Server) -> String {
    match server.status().await {
        ServerStatus::Starting => format!("{} is already being started", server.host),
        ServerStatus::Stopping => format!("{} is already being deallocated", server.host),
        _ => format!("{} has an operation in progress, try again shortly", server.host),
    }
}
