use tokio::sync::watch;

/// Resolve once the shutdown flag is `true`.
///
/// If every sender is gone without ever signalling, this never resolves:
/// a dropped controller is not a shutdown request.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await
}
