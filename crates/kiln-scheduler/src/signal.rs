//! Process shutdown signals.

use tracing::{info, warn};

/// Resolves on the first ctrl-c (SIGINT) or SIGTERM.
///
/// A signal that cannot be listened for is logged and never fires; the
/// other one still does.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::signal::unix::{SignalKind, signal};

    #[tokio::test]
    async fn test_sigterm_resolves_shutdown() {
        // Keeps SIGTERM routed to tokio for the rest of the test process.
        let _handler = signal(SignalKind::terminate()).unwrap();

        let waiter = tokio::spawn(shutdown_signal());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let status = std::process::Command::new("sh")
            .args(["-c", "kill -TERM $PPID"])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("shutdown_signal did not resolve on SIGTERM")
            .unwrap();
    }
}
