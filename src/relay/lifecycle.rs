//! Listener socket lifecycle: cold start, debounced restart, teardown

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::dispatch::NotificationSink;
use super::server;

/// Quiet period after a port change before the listener restarts.
///
/// Collapses a burst of configuration edits into a single restart so the
/// user is not flooded with restart confirmations.
pub const RESTART_DEBOUNCE: Duration = Duration::from_secs(1);

/// The live listening socket: accept loop task plus its shutdown trigger
///
/// At most one exists at a time; the lifecycle always closes the old handle
/// before creating a replacement.
struct ServerHandle {
    port: u16,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    fn spawn(listener: TcpListener, sink: Arc<dyn NotificationSink>, port: u16) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, sink, shutdown_rx));
        Self {
            port,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn close(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    sink: Arc<dyn NotificationSink>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let sink = sink.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server::handle_connection(stream, sink).await {
                            tracing::warn!("Error handling connection: {e}");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {e}");
                }
            }
        }
    }
}

/// Owns the listening socket across its whole life.
///
/// Exclusive owner of the [`ServerHandle`]: cold start binds it, each
/// debounced port change replaces it (close first, then re-bind), teardown
/// closes it. Bind failures are reported through the sink and leave the
/// listener stopped; there is no automatic retry.
pub struct ListenerLifecycle {
    sink: Arc<dyn NotificationSink>,
    ports: watch::Receiver<u16>,
    handle: Option<ServerHandle>,
}

impl ListenerLifecycle {
    pub fn new(sink: Arc<dyn NotificationSink>, ports: watch::Receiver<u16>) -> Self {
        Self {
            sink,
            ports,
            handle: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.handle.is_some()
    }

    /// Port currently bound, if listening
    pub fn port(&self) -> Option<u16> {
        self.handle.as_ref().map(|h| h.port)
    }

    /// Cold start. Bind failures are reported, not returned; unlike a
    /// restart, a successful cold start emits no user-visible confirmation.
    pub async fn start(&mut self) {
        let port = *self.ports.borrow_and_update();
        self.bind(port, false).await;
    }

    /// React to port changes until the configuration bridge goes away.
    ///
    /// Each change arms the debounce timer; further changes within the quiet
    /// period supersede the pending restart rather than queueing another.
    /// The port is re-read when the timer fires, so the restart always uses
    /// the most recent value.
    pub async fn watch_config(&mut self) {
        loop {
            if self.ports.changed().await.is_err() {
                break;
            }
            if !self.debounce().await {
                break;
            }
            let port = *self.ports.borrow_and_update();
            self.bind(port, true).await;
        }
    }

    /// Wait out one quiet period. Returns false when the sender side closed.
    async fn debounce(&mut self) -> bool {
        loop {
            let timer = tokio::time::sleep(RESTART_DEBOUNCE);
            tokio::pin!(timer);
            tokio::select! {
                _ = &mut timer => return true,
                changed = self.ports.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    // Superseded: a fresh change restarts the quiet period
                }
            }
        }
    }

    async fn bind(&mut self, port: u16, was_restart: bool) {
        // Close-before-replace: never two live listeners
        if let Some(handle) = self.handle.take() {
            handle.close().await;
        }

        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                self.handle = Some(ServerHandle::spawn(listener, self.sink.clone(), port));
                if was_restart {
                    self.sink.report_success(
                        "notify-relay restarted",
                        &format!("Now listening on port {port}"),
                    );
                } else {
                    tracing::info!(port, "Notification listener started");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                self.sink.report_warning(
                    "Failed to start notify-relay",
                    &format!(
                        "Unable to bind to port ({port}). This port is already in use by \
                         another service. Please change the port in your configuration."
                    ),
                );
            }
            Err(e) => {
                self.sink.report_error(
                    "Failed to start notify-relay",
                    &format!(
                        "Unable to bind to port ({port}) for an unknown reason. \
                         Please report this to the maintainer: {e}"
                    ),
                );
            }
        }
    }

    /// Teardown: close the active handle. Dropping the lifecycle afterwards
    /// releases the configuration subscription and any pending timer.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close().await;
        }
        tracing::info!("Notification listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::dispatch::testing::RecordingSink;
    use crate::relay::protocol::Severity;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_cold_start_serves_notifications() {
        let sink = Arc::new(RecordingSink::default());
        let port = free_port().await;
        let (_tx, rx) = watch::channel(port);

        let mut lifecycle = ListenerLifecycle::new(sink.clone(), rx);
        lifecycle.start().await;
        assert!(lifecycle.is_listening());
        assert_eq!(lifecycle.port(), Some(port));
        // A successful cold start stays quiet
        assert!(sink.reported().is_empty());

        let body = r#"{"type":"info","message":"ping"}"#;
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(
                format!(
                    "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        let notified = sink.notified();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].1, "ping");
        assert_eq!(Severity::from_wire(notified[0].0), Some(Severity::Info));

        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_failure_port_in_use_reports_warning() {
        let occupier = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupier.local_addr().unwrap().port();

        let sink = Arc::new(RecordingSink::default());
        let (_tx, rx) = watch::channel(port);
        let mut lifecycle = ListenerLifecycle::new(sink.clone(), rx);
        lifecycle.start().await;

        assert!(!lifecycle.is_listening());
        let reported = sink.reported();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].0, "warning");
        assert!(reported[0].2.contains(&format!("({port})")));
        assert!(reported[0].2.contains("already in use"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_port_changes_coalesce_into_one_restart() {
        let sink = Arc::new(RecordingSink::default());
        let port_a = free_port().await;
        let port_b = free_port().await;
        let port_c = free_port().await;

        let (tx, rx) = watch::channel(port_a);
        let mut lifecycle = ListenerLifecycle::new(sink.clone(), rx);
        lifecycle.start().await;
        assert_eq!(lifecycle.port(), Some(port_a));

        let task = tokio::spawn(async move {
            lifecycle.watch_config().await;
            lifecycle
        });

        // Two changes inside the debounce window; only the latest should win
        tx.send(port_b).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(port_c).unwrap();
        tokio::time::sleep(RESTART_DEBOUNCE + Duration::from_millis(500)).await;
        drop(tx);

        let lifecycle = task.await.unwrap();
        assert_eq!(lifecycle.port(), Some(port_c));

        let restarts: Vec<_> = sink
            .reported()
            .into_iter()
            .filter(|r| r.0 == "success")
            .collect();
        assert_eq!(restarts.len(), 1);
        assert!(restarts[0].2.contains(&port_c.to_string()));

        lifecycle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_rebinds_and_frees_old_port() {
        let sink = Arc::new(RecordingSink::default());
        let port_a = free_port().await;
        let port_b = free_port().await;

        let (tx, rx) = watch::channel(port_a);
        let mut lifecycle = ListenerLifecycle::new(sink.clone(), rx);
        lifecycle.start().await;

        let task = tokio::spawn(async move {
            lifecycle.watch_config().await;
            lifecycle
        });
        tx.send(port_b).unwrap();
        tokio::time::sleep(RESTART_DEBOUNCE + Duration::from_millis(500)).await;
        drop(tx);

        let lifecycle = task.await.unwrap();
        assert_eq!(lifecycle.port(), Some(port_b));
        // The old handle was closed before the new bind, so the old port is
        // free again
        assert!(TcpListener::bind(("127.0.0.1", port_a)).await.is_ok());

        lifecycle.shutdown().await;
    }
}
