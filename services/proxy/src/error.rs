//! Error taxonomy for the routing table, store, and forwarder.

use relay_id::Hostname;
use thiserror::Error;

/// Errors returned by a [`crate::store::Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no application registered for hostname {0}")]
    NoHostname(Hostname),

    #[error("application {0} has no live backend")]
    NoBackend(String),

    #[error("backend {backend} for application {app} has expired")]
    DeadBackend { app: String, backend: String },

    #[error("store transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

/// Errors surfaced by the routing table at request time.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no hostname")]
    NoHostname,

    #[error("no backend")]
    NoBackend,

    #[error("backend already exists: {0}")]
    BackendAlreadyExists(String),

    #[error("frontend has been stopped")]
    FrontendStopped,
}

/// Errors surfaced while forwarding or upgrading a single request.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("upstream transport error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("upgrade failed: {0}")]
    Upgrade(#[from] std::io::Error),
}

impl ForwardError {
    /// The redirect reason string appended as `?err=<reason>`.
    pub fn reason(&self) -> &'static str {
        match self {
            ForwardError::Routing(RoutingError::NoHostname) => "no hostname",
            ForwardError::Routing(RoutingError::NoBackend) => "no backend",
            ForwardError::Routing(RoutingError::BackendAlreadyExists(_)) => "internal error",
            ForwardError::Routing(RoutingError::FrontendStopped) => "internal error",
            ForwardError::Upstream(_) => "upstream error",
            ForwardError::Upgrade(_) => "upgrade error",
        }
    }
}
