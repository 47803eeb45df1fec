//! A frontend: one application's backends, their aggregated liveness, and random selection.

use std::collections::HashMap;
use std::time::Duration;

use rand::seq::IteratorRandom;
use relay_id::{ApplicationName, BackendName};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use super::backend::{Backend, BackendHealthChecker, BackendStatus};
use crate::error::RoutingError;

struct FrontendState {
    backends: HashMap<BackendName, Backend>,
    checkers: HashMap<BackendName, BackendHealthChecker>,
    alive: HashMap<BackendName, bool>,
    live_backends: Vec<Backend>,
    stopped: bool,
}

impl FrontendState {
    fn rebuild_live(&mut self) {
        self.live_backends = self
            .backends
            .iter()
            .filter(|(name, _)| *self.alive.get(*name).unwrap_or(&false))
            .map(|(_, backend)| backend.clone())
            .collect();
    }
}

/// Groups the backends of one application and serves random live-backend selection to the
/// forwarder. Status events from each backend's health checker flow through a single consumer
/// (the task spawned by [`Frontend::start`]), so `live_backends` never observes a half-updated
/// slice (invariant F2).
pub struct Frontend {
    pub name: ApplicationName,
    state: Mutex<FrontendState>,
    status_tx: mpsc::Sender<BackendStatus>,
    status_rx: Mutex<Option<mpsc::Receiver<BackendStatus>>>,
    quit_tx: mpsc::Sender<oneshot::Sender<()>>,
    quit_rx: Mutex<Option<mpsc::Receiver<oneshot::Sender<()>>>>,
    health_interval: Duration,
    client: reqwest::Client,
}

impl Frontend {
    pub fn new(name: ApplicationName, health_interval: Duration, client: reqwest::Client) -> Self {
        let (status_tx, status_rx) = mpsc::channel(32);
        let (quit_tx, quit_rx) = mpsc::channel(1);
        Self {
            name,
            state: Mutex::new(FrontendState {
                backends: HashMap::new(),
                checkers: HashMap::new(),
                alive: HashMap::new(),
                live_backends: Vec::new(),
                stopped: false,
            }),
            status_tx,
            status_rx: Mutex::new(Some(status_rx)),
            quit_tx,
            quit_rx: Mutex::new(Some(quit_rx)),
            health_interval,
            client,
        }
    }

    /// Registers and starts a backend's health checker. Errors on a duplicate name or after
    /// `stop()`.
    pub async fn add_backend(&self, backend: Backend) -> Result<(), RoutingError> {
        let mut state = self.state.lock().await;
        if state.stopped {
            return Err(RoutingError::FrontendStopped);
        }
        if state.backends.contains_key(&backend.name) {
            return Err(RoutingError::BackendAlreadyExists(backend.name.to_string()));
        }

        let checker = BackendHealthChecker::spawn(
            backend.clone(),
            self.health_interval,
            self.client.clone(),
            self.status_tx.clone(),
        );
        state.alive.insert(backend.name.clone(), false);
        state.checkers.insert(backend.name.clone(), checker);
        state.backends.insert(backend.name.clone(), backend);
        Ok(())
    }

    /// Returns a uniformly random live backend, or `NoBackend` when none are live.
    pub async fn pick_backend(&self) -> Result<Backend, RoutingError> {
        let state = self.state.lock().await;
        state
            .live_backends
            .iter()
            .cloned()
            .choose(&mut rand::rng())
            .ok_or(RoutingError::NoBackend)
    }

    pub async fn registered_count(&self) -> usize {
        self.state.lock().await.backends.len()
    }

    /// Consumes status events, rebuilding `live_backends` on every liveness change, until
    /// `stop()` is called.
    pub async fn start(self: std::sync::Arc<Self>) {
        let mut status_rx = self
            .status_rx
            .lock()
            .await
            .take()
            .expect("start() called more than once");
        let mut quit_rx = self
            .quit_rx
            .lock()
            .await
            .take()
            .expect("start() called more than once");

        loop {
            tokio::select! {
                event = status_rx.recv() => {
                    let Some(event) = event else { break };
                    let mut state = self.state.lock().await;
                    debug!(frontend = %self.name, backend = %event.name, alive = event.alive, "liveness changed");
                    state.alive.insert(event.name, event.alive);
                    state.rebuild_live();
                }
                ack = quit_rx.recv() => {
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    break;
                }
            }
        }
    }

    /// Ends `start`'s event loop, stops every registered backend's health checker, and marks
    /// the frontend closed to further registration.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.quit_tx.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }

        let mut state = self.state.lock().await;
        state.stopped = true;
        for (_, checker) in state.checkers.drain() {
            checker.stop().await;
        }
    }
}
