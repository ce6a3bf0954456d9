//! Per-server state shared by the monitor loops and operator commands.
//!
//! Two locks per server:
//! - `state` guards status and counters; held only for a decide step, never
//!   across a probe or a cloud call.
//! - `operation` is the lifecycle slot; whoever holds it owns the one start
//!   or deallocate allowed in flight for this server.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bedrock_ping::Pong;
use mcm_infra::types::InstanceId;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

use crate::probe::Prober;

/// Held for the whole of one lifecycle operation.
pub type OperationGuard = OwnedMutexGuard<()>;

/// Monitoring policy, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckPolicy {
    pub check_interval: Duration,
    pub check_timeout: Duration,
    pub deallocation_threshold: u32,
}

/// Fully resolved server entry from the fleet config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub resource_group: String,
    pub host: String,
    pub port: u16,
    pub policy: CheckPolicy,
}

/// What the controller believes about a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Offline,
    Starting,
    Online,
    Stopping,
    /// Needs reconciliation: an operation was interrupted or failed midway.
    Unknown,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Starting => "starting",
            Self::Online => "online",
            Self::Stopping => "stopping",
            Self::Unknown => "unknown",
        }
    }

    /// Held only while a lifecycle operation is in flight.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one probe, as far as the hysteresis policy cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Players(u32),
    Failed,
}

impl<E> From<&Result<Pong, E>> for ProbeOutcome {
    fn from(result: &Result<Pong, E>) -> Self {
        match result {
            Ok(pong) => Self::Players(pong.player_count),
            Err(_) => Self::Failed,
        }
    }
}

/// Which counter crossed the deallocation threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breach {
    Idle(u32),
    Errors(u32),
}

impl Breach {
    pub fn describe(&self, policy: &CheckPolicy) -> String {
        match self {
            Self::Idle(checks) => {
                let idle_for = policy.check_interval * *checks;
                format!(
                    "it had no players for {}",
                    humantime::format_duration(idle_for)
                )
            }
            Self::Errors(checks) => format!("it had {checks} consecutive errors"),
        }
    }
}

/// Mutable half of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerState {
    pub status: ServerStatus,
    pub consecutive_idle: u32,
    pub consecutive_errors: u32,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            status: ServerStatus::Unknown,
            consecutive_idle: 0,
            consecutive_errors: 0,
        }
    }
}

impl ServerState {
    /// Apply one probe outcome and report whether deallocation is due.
    ///
    /// Any answer resets the error streak; players reset both streaks.
    /// A failed probe says nothing about players, so it leaves the idle
    /// streak alone.
    pub fn record(&mut self, outcome: ProbeOutcome, threshold: u32) -> Option<Breach> {
        match outcome {
            ProbeOutcome::Players(0) => {
                self.consecutive_errors = 0;
                self.consecutive_idle += 1;
            }
            ProbeOutcome::Players(_) => {
                self.consecutive_errors = 0;
                self.consecutive_idle = 0;
            }
            ProbeOutcome::Failed => {
                self.consecutive_errors += 1;
            }
        }

        if self.consecutive_errors >= threshold {
            Some(Breach::Errors(self.consecutive_errors))
        } else if self.consecutive_idle >= threshold {
            Some(Breach::Idle(self.consecutive_idle))
        } else {
            None
        }
    }

    /// Set a definitive status and clear both streaks.
    pub fn settle(&mut self, status: ServerStatus) {
        self.status = status;
        self.consecutive_idle = 0;
        self.consecutive_errors = 0;
    }
}

/// Read-only view of a server for listings and the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub name: String,
    pub resource_group: String,
    pub host: String,
    pub port: u16,
    pub status: ServerStatus,
    pub consecutive_idle: u32,
    pub consecutive_errors: u32,
    pub deallocation_threshold: u32,
    pub check_interval_secs: u64,
    pub operation_in_flight: bool,
}

/// One configured game server.
pub struct Server {
    pub name: String,
    pub resource_group: String,
    pub host: String,
    pub port: u16,
    pub policy: CheckPolicy,
    state: Mutex<ServerState>,
    operation: Arc<Mutex<()>>,
}

impl Server {
    pub fn new(spec: ServerSpec) -> Self {
        Self {
            name: spec.name,
            resource_group: spec.resource_group,
            host: spec.host,
            port: spec.port,
            policy: spec.policy,
            state: Mutex::new(ServerState::default()),
            operation: Arc::new(Mutex::new(())),
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        InstanceId::new(&self.resource_group, &self.name)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Exclusive access to status and counters. Do not hold across awaits
    /// on the network.
    pub async fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().await
    }

    pub async fn status(&self) -> ServerStatus {
        self.state.lock().await.status
    }

    pub async fn set_status(&self, status: ServerStatus) {
        self.state.lock().await.status = status;
    }

    pub async fn settle(&self, status: ServerStatus) {
        self.state.lock().await.settle(status);
    }

    /// Turn a stale Starting/Stopping marker into Unknown.
    pub async fn release_transient(&self) {
        let mut state = self.state.lock().await;
        if state.status.is_transient() {
            state.status = ServerStatus::Unknown;
        }
    }

    /// Claim the lifecycle slot, or `None` if an operation is already running.
    pub fn try_claim(&self) -> Option<OperationGuard> {
        self.operation.clone().try_lock_owned().ok()
    }

    pub fn is_busy(&self) -> bool {
        self.operation.try_lock().is_err()
    }

    /// Probe this server once with its configured timeout.
    pub async fn probe(&self, prober: &dyn Prober) -> Result<Pong, bedrock_ping::Error> {
        prober
            .probe(&self.host, self.port, self.policy.check_timeout)
            .await
    }

    pub async fn snapshot(&self) -> ServerSnapshot {
        let state = self.state.lock().await.clone();
        ServerSnapshot {
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
            host: self.host.clone(),
            port: self.port,
            status: state.status,
            consecutive_idle: state.consecutive_idle,
            consecutive_errors: state.consecutive_errors,
            deallocation_threshold: self.policy.deallocation_threshold,
            check_interval_secs: self.policy.check_interval.as_secs(),
            operation_in_flight: self.is_busy(),
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}
