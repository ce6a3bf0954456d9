//! Background loops, two per server.
//!
//! The fast loop probes online servers every `check_interval` and
//! deallocates one once it has been idle (or unreachable) for
//! `deallocation_threshold` checks in a row. The slow loop reconciles the
//! believed status against reality every `reconcile_interval` so servers
//! started outside the controller get picked up.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::Lifecycle;
use crate::notify::Notifier;
use crate::probe::Prober;
use crate::server::{ProbeOutcome, Server, ServerStatus};
use crate::shutdown::{self, Shutdown};

#[derive(Clone)]
pub struct Monitor {
    lifecycle: Arc<Lifecycle>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn Notifier>,
    reconcile_interval: Duration,
}

impl Monitor {
    pub fn new(
        lifecycle: Arc<Lifecycle>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
        reconcile_interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            prober,
            notifier,
            reconcile_interval,
        }
    }

    /// One fast-loop iteration.
    pub async fn check(&self, server: &Server) {
        if server.status().await != ServerStatus::Online {
            return;
        }

        let result = server.probe(&*self.prober).await;
        match &result {
            Ok(pong) if pong.player_count == 0 => {}
            Ok(pong) => {
                tracing::debug!(server = %server.host, players = pong.player_count, "players online");
            }
            Err(e) if e.is_protocol() => {
                tracing::warn!(server = %server.host, error = %e, "server answered with an unreadable status");
            }
            Err(e) => tracing::warn!(server = %server.host, error = %e, "server not answering"),
        }

        let (guard, breach) = {
            let mut state = server.state().await;
            // An operator command may have changed things while we probed.
            if state.status != ServerStatus::Online {
                return;
            }

            let breach = state.record(ProbeOutcome::from(&result), server.policy.deallocation_threshold);
            if matches!(result, Ok(ref pong) if pong.player_count == 0) {
                tracing::info!(server = %server.host, checks = state.consecutive_idle, "no players online");
            }

            let Some(breach) = breach else { return };
            let Some(guard) = server.try_claim() else {
                tracing::debug!(server = %server.host, "threshold reached but an operation is in flight");
                return;
            };
            // Marked before the lock drops so nothing else sees Online.
            state.status = ServerStatus::Stopping;
            (guard, breach)
        };

        self.notifier
            .notify(&format!(
                "{} deallocating because {}",
                server.host,
                breach.describe(&server.policy)
            ))
            .await;

        let message = match self.lifecycle.deallocate_claimed(server, guard).await {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(server = %server.host, error = %e, "auto-deallocation failed");
                format!("error deallocating {}:\n{e}", server.host)
            }
        };
        self.notifier.notify(&message).await;
    }

    /// One slow-loop iteration.
    pub async fn reconcile(&self, server: &Server) {
        if server.is_busy() {
            return;
        }

        let answered = server.probe(&*self.prober).await.is_ok();

        let mut state = server.state().await;
        if server.is_busy() {
            return;
        }
        match (answered, state.status) {
            (true, ServerStatus::Online) => {}
            (true, previous) => {
                tracing::info!(server = %server.host, %previous, "server answering, marking online");
                state.settle(ServerStatus::Online);
            }
            (false, ServerStatus::Unknown) => {
                tracing::info!(server = %server.host, "server not answering, marking offline");
                state.settle(ServerStatus::Offline);
            }
            // Online servers that stop answering are the fast loop's business.
            (false, _) => {}
        }
    }
}

/// Spawn the fast and slow loop for every server. Both exit on shutdown.
pub fn spawn_monitors(
    monitor: &Monitor,
    servers: &[Arc<Server>],
    shutdown: Shutdown,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(servers.len() * 2);
    for server in servers {
        handles.push(tokio::spawn(fast_loop(
            monitor.clone(),
            server.clone(),
            shutdown.clone(),
        )));
        handles.push(tokio::spawn(slow_loop(
            monitor.clone(),
            server.clone(),
            shutdown.clone(),
        )));
    }
    tracing::info!(servers = servers.len(), "monitors started");
    handles
}

async fn fast_loop(monitor: Monitor, server: Arc<Server>, mut shutdown: Shutdown) {
    let mut interval = tokio::time::interval(server.policy.check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick is immediate; the slow loop covers startup.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => monitor.check(&server).await,
            _ = shutdown::requested(&mut shutdown) => break,
        }
    }
    tracing::debug!(server = %server.host, "fast loop stopped");
}

async fn slow_loop(monitor: Monitor, server: Arc<Server>, mut shutdown: Shutdown) {
    let mut interval = tokio::time::interval(monitor.reconcile_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => monitor.reconcile(&server).await,
            _ = shutdown::requested(&mut shutdown) => break,
        }
    }
    tracing::debug!(server = %server.host, "slow loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::sync::Notify;

    use super::*;
    use crate::lifecycle::tests::{FakeProvider, ScriptedProber, lifecycle};
    use crate::notify::tests::RecordingNotifier;
    use crate::server::tests::spec;

    const RUNNING: &[&str] = &["ProvisioningState/succeeded", "PowerState/running"];

    fn monitor(
        provider: Arc<FakeProvider>,
        prober: Arc<ScriptedProber>,
        notifier: Arc<RecordingNotifier>,
    ) -> (Monitor, tokio::sync::watch::Sender<bool>) {
        let (lifecycle, tx) = lifecycle(provider, prober.clone());
        let monitor = Monitor::new(Arc::new(lifecycle), prober, notifier, Duration::from_secs(3600));
        (monitor, tx)
    }

    async fn online(host: &str, threshold: u32) -> Arc<Server> {
        let server = Arc::new(Server::new(spec(host, threshold)));
        server.set_status(ServerStatus::Online).await;
        server
    }

    #[tokio::test]
    async fn deallocates_after_threshold_idle_checks() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(FakeProvider::new(RUNNING).gated(gate.clone()));
        let prober = Arc::new(ScriptedProber::always(Some(0)));
        let notifier = Arc::new(RecordingNotifier::default());
        let (monitor, _tx) = monitor(provider.clone(), prober, notifier.clone());
        let server = online("mc.example.com", 3).await;

        monitor.check(&server).await;
        monitor.check(&server).await;
        assert_eq!(server.snapshot().await.consecutive_idle, 2);
        assert_eq!(provider.deallocates.load(Ordering::SeqCst), 0);

        let third = tokio::spawn({
            let monitor = monitor.clone();
            let server = server.clone();
            async move { monitor.check(&server).await }
        });
        provider.begun.notified().await;
        assert_eq!(server.status().await, ServerStatus::Stopping);
        assert!(server.is_busy());

        gate.notify_one();
        third.await.unwrap();

        assert_eq!(provider.deallocates.load(Ordering::SeqCst), 1);
        let snap = server.snapshot().await;
        assert_eq!(snap.status, ServerStatus::Offline);
        assert_eq!((snap.consecutive_idle, snap.consecutive_errors), (0, 0));
        assert_eq!(
            notifier.messages(),
            vec![
                "mc.example.com deallocating because it had no players for 15m".to_string(),
                "mc.example.com deallocated".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn consecutive_errors_trigger_deallocation() {
        let provider = Arc::new(FakeProvider::new(RUNNING));
        let prober = Arc::new(ScriptedProber::always(None));
        let notifier = Arc::new(RecordingNotifier::default());
        let (monitor, _tx) = monitor(provider.clone(), prober, notifier.clone());
        let server = online("mc.example.com", 2).await;

        monitor.check(&server).await;
        monitor.check(&server).await;

        assert_eq!(provider.deallocates.load(Ordering::SeqCst), 1);
        assert_eq!(server.status().await, ServerStatus::Offline);
        assert_eq!(
            notifier.messages()[0],
            "mc.example.com deallocating because it had 2 consecutive errors"
        );
    }

    #[tokio::test]
    async fn players_keep_server_alive() {
        let provider = Arc::new(FakeProvider::new(RUNNING));
        let prober = Arc::new(ScriptedProber::new([Some(0), Some(0), Some(1), Some(0), Some(0)], Some(0)));
        let notifier = Arc::new(RecordingNotifier::default());
        let (monitor, _tx) = monitor(provider.clone(), prober, notifier.clone());
        let server = online("mc.example.com", 3).await;

        for _ in 0..5 {
            monitor.check(&server).await;
        }
        assert_eq!(provider.deallocates.load(Ordering::SeqCst), 0);
        assert_eq!(server.snapshot().await.consecutive_idle, 2);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn refusal_at_deallocation_time_keeps_server_online() {
        // Idle twice, then a player joins between the last check and the
        // lifecycle's own probe.
        let provider = Arc::new(FakeProvider::new(RUNNING));
        let prober = Arc::new(ScriptedProber::new([Some(0), Some(0)], Some(4)));
        let notifier = Arc::new(RecordingNotifier::default());
        let (monitor, _tx) = monitor(provider.clone(), prober, notifier.clone());
        let server = online("mc.example.com", 2).await;

        monitor.check(&server).await;
        monitor.check(&server).await;

        assert_eq!(provider.deallocates.load(Ordering::SeqCst), 0);
        assert_eq!(server.status().await, ServerStatus::Online);
        assert_eq!(
            notifier.messages().last().map(String::as_str),
            Some("mc.example.com has 4 active players, not deallocating")
        );
    }

    #[tokio::test]
    async fn only_online_servers_are_checked() {
        let provider = Arc::new(FakeProvider::new(RUNNING));
        let prober = Arc::new(ScriptedProber::always(Some(0)));
        let notifier = Arc::new(RecordingNotifier::default());
        let (monitor, _tx) = monitor(provider, prober.clone(), notifier);
        let server = Arc::new(Server::new(spec("mc.example.com", 1)));

        for status in [ServerStatus::Offline, ServerStatus::Starting, ServerStatus::Unknown] {
            server.set_status(status).await;
            monitor.check(&server).await;
        }
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reconcile_marks_answering_server_online() {
        let provider = Arc::new(FakeProvider::new(RUNNING));
        let prober = Arc::new(ScriptedProber::always(Some(0)));
        let notifier = Arc::new(RecordingNotifier::default());
        let (monitor, _tx) = monitor(provider, prober, notifier);
        let server = Arc::new(Server::new(spec("mc.example.com", 3)));
        server.set_status(ServerStatus::Offline).await;

        monitor.reconcile(&server).await;
        assert_eq!(server.status().await, ServerStatus::Online);
    }

    #[tokio::test]
    async fn reconcile_resolves_unknown_to_offline() {
        let provider = Arc::new(FakeProvider::new(RUNNING));
        let prober = Arc::new(ScriptedProber::always(None));
        let notifier = Arc::new(RecordingNotifier::default());
        let (monitor, _tx) = monitor(provider, prober, notifier);

        let unknown = Arc::new(Server::new(spec("mc.example.com", 3)));
        monitor.reconcile(&unknown).await;
        assert_eq!(unknown.status().await, ServerStatus::Offline);

        let online = online("other.example.com", 3).await;
        monitor.reconcile(&online).await;
        assert_eq!(online.status().await, ServerStatus::Online);
    }

    #[tokio::test]
    async fn reconcile_skips_busy_server() {
        let provider = Arc::new(FakeProvider::new(RUNNING));
        let prober = Arc::new(ScriptedProber::always(Some(0)));
        let notifier = Arc::new(RecordingNotifier::default());
        let (monitor, _tx) = monitor(provider, prober.clone(), notifier);
        let server = Arc::new(Server::new(spec("mc.example.com", 3)));
        server.set_status(ServerStatus::Starting).await;

        let _guard = server.try_claim().unwrap();
        monitor.reconcile(&server).await;
        assert_eq!(server.status().await, ServerStatus::Starting);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn loops_stop_on_shutdown() {
        let provider = Arc::new(FakeProvider::new(RUNNING));
        let prober = Arc::new(ScriptedProber::always(None));
        let notifier = Arc::new(RecordingNotifier::default());
        let (monitor, _tx) = monitor(provider, prober, notifier);
        let servers = vec![Arc::new(Server::new(spec("mc.example.com", 3)))];

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handles = spawn_monitors(&monitor, &servers, rx);
        assert_eq!(handles.len(), 2);

        tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("loop exits")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn threshold_waits_for_operator_deallocation_in_flight() {
        let view_gate = Arc::new(Notify::new());
        let provider = Arc::new(FakeProvider::new(RUNNING).holding_views(view_gate.clone()));
        let prober = Arc::new(ScriptedProber::always(Some(0)));
        let notifier = Arc::new(RecordingNotifier::default());
        let (monitor, _tx) = monitor(provider.clone(), prober, notifier.clone());
        let server = online("mc.example.com", 1).await;

        let operator = tokio::spawn({
            let lifecycle = monitor.lifecycle.clone();
            let server = server.clone();
            async move { lifecycle.deallocate(&server).await }
        });
        provider.viewed.notified().await;

        // Breaches the threshold while the operator holds the slot.
        monitor.check(&server).await;
        assert_eq!(server.status().await, ServerStatus::Online);
        assert!(notifier.messages().is_empty());
        assert_eq!(provider.deallocates.load(Ordering::SeqCst), 0);

        view_gate.notify_one();
        assert_eq!(operator.await.unwrap().unwrap(), "mc.example.com deallocated");
        assert_eq!(provider.deallocates.load(Ordering::SeqCst), 1);
        assert_eq!(server.status().await, ServerStatus::Offline);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn fast_loop_stops_while_cloud_call_hangs() {
        let provider = Arc::new(FakeProvider::new(RUNNING).holding_views(Arc::new(Notify::new())));
        let prober = Arc::new(ScriptedProber::always(Some(0)));
        let notifier = Arc::new(RecordingNotifier::default());
        let (monitor, tx) = monitor(provider.clone(), prober, notifier.clone());

        let mut quick = spec("mc.example.com", 1);
        quick.policy.check_interval = Duration::from_millis(10);
        let server = Arc::new(Server::new(quick));
        server.set_status(ServerStatus::Online).await;

        let handles = spawn_monitors(&monitor, &[server.clone()], tx.subscribe());
        tokio::time::timeout(Duration::from_secs(1), provider.viewed.notified())
            .await
            .expect("auto-deallocation reaches the cloud");
        assert!(server.is_busy());

        tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("loop exits")
                .unwrap();
        }
        assert!(!server.is_busy());
        assert_eq!(server.status().await, ServerStatus::Unknown);
        assert_eq!(provider.deallocates.load(Ordering::SeqCst), 0);
        assert_eq!(
            notifier.messages().last().map(String::as_str),
            Some("error deallocating mc.example.com:\ndeallocate mc.example.com: interrupted by shutdown")
        );
    }
}
