//! A single backend and the health-checker task that tracks its liveness.

use std::time::Duration;

use relay_id::BackendName;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Dial/request timeout for a health-check probe.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// A registered backend within one frontend.
#[derive(Debug, Clone)]
pub struct Backend {
    pub name: BackendName,
    /// `host:port`, no scheme.
    pub endpoint: String,
    pub ttl: Option<Duration>,
}

impl Backend {
    pub fn new(name: BackendName, endpoint: String, ttl: Option<Duration>) -> Self {
        Self { name, endpoint, ttl }
    }

    fn check_url(&self) -> String {
        format!("http://{}/", self.endpoint)
    }
}

/// A liveness transition, emitted by a health checker to its owning frontend.
#[derive(Debug, Clone)]
pub struct BackendStatus {
    pub name: BackendName,
    pub alive: bool,
}

/// One health-checker task per backend.
///
/// Probes on an interval, reporting only when liveness actually changes (initial state is
/// always "dead", so the first successful probe always emits an event).
pub struct BackendHealthChecker {
    quit_tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl BackendHealthChecker {
    /// Spawns the checker task and returns a handle that can stop it.
    pub fn spawn(
        backend: Backend,
        interval: Duration,
        client: reqwest::Client,
        updates: mpsc::Sender<BackendStatus>,
    ) -> Self {
        let (quit_tx, mut quit_rx) = mpsc::channel::<oneshot::Sender<()>>(1);

        tokio::spawn(async move {
            let mut alive = false;
            loop {
                let result = probe(&client, &backend.check_url()).await;
                if result != alive {
                    alive = result;
                    debug!(backend = %backend.name, alive, "backend liveness changed");
                    if updates
                        .send(BackendStatus {
                            name: backend.name.clone(),
                            alive,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    ack = quit_rx.recv() => {
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                        break;
                    }
                }
            }
        });

        Self { quit_tx }
    }

    /// Stops the checker, waiting for its acknowledgement.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.quit_tx.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn probe(client: &reqwest::Client, url: &str) -> bool {
    let request = client.get(url).header(reqwest::header::CONNECTION, "close");
    match tokio::time::timeout(CHECK_TIMEOUT, request.send()).await {
        Ok(Ok(resp)) => resp.status().as_u16() < 400,
        Ok(Err(err)) => {
            warn!(url, error = %err, "health check request failed");
            false
        }
        Err(_) => {
            warn!(url, "health check timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn_responder(status: u16) -> (std::net::SocketAddr, Arc<AtomicUsize>) {
        let (addr, hits, _status) = spawn_toggleable_responder(status).await;
        (addr, hits)
    }

    /// Like [`spawn_responder`], but the returned `AtomicU16` lets the test flip the status
    /// code a running checker observes on its next probe.
    async fn spawn_toggleable_responder(
        status: u16,
    ) -> (std::net::SocketAddr, Arc<AtomicUsize>, Arc<std::sync::atomic::AtomicU16>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let current_status = Arc::new(std::sync::atomic::AtomicU16::new(status));
        let status_clone = current_status.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                hits_clone.fetch_add(1, Ordering::SeqCst);
                let status = status_clone.load(Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let _ = stream.read(&mut buf).await;
                let body =
                    format!("HTTP/1.1 {status} OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = stream.write_all(body.as_bytes()).await;
            }
        });

        (addr, hits, current_status)
    }

    #[tokio::test]
    async fn first_successful_probe_emits_alive() {
        let (addr, _hits) = spawn_responder(200).await;
        let (tx, mut rx) = mpsc::channel(8);
        let backend = Backend::new("b1".parse().unwrap(), addr.to_string(), None);
        let checker = BackendHealthChecker::spawn(
            backend,
            Duration::from_millis(20),
            reqwest::Client::new(),
            tx,
        );

        let status = rx.recv().await.unwrap();
        assert!(status.alive);
        checker.stop().await;
    }

    #[tokio::test]
    async fn dead_backend_emits_no_event_on_repeat_failures() {
        let (tx, mut rx) = mpsc::channel(8);
        let backend = Backend::new(
            "b1".parse().unwrap(),
            "127.0.0.1:1".to_string(),
            None,
        );
        let checker = BackendHealthChecker::spawn(
            backend,
            Duration::from_millis(10),
            reqwest::Client::new(),
            tx,
        );

        let got = tokio::time::timeout(Duration::from_millis(60), rx.recv()).await;
        assert!(got.is_err(), "no event should fire when liveness never changes from dead");
        checker.stop().await;
    }

    #[tokio::test]
    async fn status_code_500_marks_dead_after_alive() {
        let (addr, _hits, status) = spawn_toggleable_responder(200).await;
        let (tx, mut rx) = mpsc::channel(8);
        let backend = Backend::new("b1".parse().unwrap(), addr.to_string(), None);
        let checker = BackendHealthChecker::spawn(
            backend,
            Duration::from_millis(20),
            reqwest::Client::new(),
            tx,
        );

        let first = rx.recv().await.unwrap();
        assert!(first.alive);

        status.store(500, Ordering::SeqCst);
        let second = rx.recv().await.unwrap();
        assert!(!second.alive, "a 500 response must mark the backend dead");

        checker.stop().await;
    }
}
