use tokio::sync::watch;

/// Process-wide stop flag; flips to `true` once.
pub type Shutdown = watch::Receiver<bool>;

/// Resolves once shutdown has been requested. Never resolves if the sender
/// is gone without having requested it.
pub async fn requested(shutdown: &mut Shutdown) {
    let observed = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !observed {
        std::future::pending::<()>().await;
    }
}

/// Ctrl-C or SIGTERM.
pub async fn signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
