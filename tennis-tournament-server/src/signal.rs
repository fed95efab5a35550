use tokio::sync::watch;

/// Spawns a task listening for termination signals. The returned receiver changes once the
/// process should shut down.
pub fn spawn() -> watch::Receiver<()> {
    let (tx, rx) = watch::channel(());

    tokio::task::spawn(async move {
        terminate().await;

        log::info!("Received termination signal, shutting down");
        let _ = tx.send(());
    });

    rx
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            log::warn!("Failed to install SIGTERM handler: {}", err);

            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn terminate() {
    let _ = tokio::signal::ctrl_c().await;
}
