//! The immutable routing table published by the reload pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use super::frontend::Frontend;

/// `hostname → frontend`, plus the full frontend list (for start/stop). Immutable after
/// construction; readers clone the containing `Arc<Snapshot>` once per request and never
/// re-load it mid-request (invariant: one consistent snapshot per request, §8 property 1).
pub struct Snapshot {
    host_map: HashMap<String, Arc<Frontend>>,
    frontends: Vec<Arc<Frontend>>,
}

impl Snapshot {
    pub fn new(host_map: HashMap<String, Arc<Frontend>>, frontends: Vec<Arc<Frontend>>) -> Self {
        Self {
            host_map,
            frontends,
        }
    }

    pub fn empty() -> Self {
        Self {
            host_map: HashMap::new(),
            frontends: Vec::new(),
        }
    }

    pub fn frontend_for_hostname(&self, hostname: &str) -> Option<Arc<Frontend>> {
        self.host_map.get(hostname).cloned()
    }

    pub fn frontends(&self) -> &[Arc<Frontend>] {
        &self.frontends
    }

    /// Starts every frontend's event loop. Called before publication so a reader never observes
    /// a freshly-swapped-in snapshot with empty live-backend sets.
    pub fn start_all(self: &Arc<Self>) {
        for frontend in &self.frontends {
            tokio::spawn(frontend.clone().start());
        }
    }

    /// Stops every frontend (and in turn every backend checker). Called on the old snapshot
    /// only after the new one has already been published.
    pub async fn stop_all(&self) {
        for frontend in &self.frontends {
            frontend.stop().await;
        }
    }
}
