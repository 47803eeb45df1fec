//! The external routing-table store.
//!
//! The data plane never talks to a concrete KV driver directly; it depends only on the
//! [`Store`] trait. The administrative CRUD API (out of scope for this crate) is the only
//! caller of the mutation methods — the reload pipeline and health checker only ever call the
//! read methods.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use relay_id::{ApplicationName, BackendName, Hostname};

use crate::error::StoreError;

/// A backend's dial target, as resolved from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub application: ApplicationName,
    pub backend: BackendName,
    /// `host:port`, no scheme.
    pub address: String,
}

/// Everything known about one application at snapshot-build time.
#[derive(Debug, Clone, Default)]
pub struct ApplicationSnapshot {
    pub hostnames: Vec<Hostname>,
    /// Registered backends and their store-reported last-known liveness. The health checker
    /// re-derives the authoritative liveness; this flag is informational only.
    pub backends: HashMap<BackendName, (String, bool)>,
}

/// The routing-table store: a system of record plus a change-notification bus.
///
/// Implementations only need to honor the read contract faithfully; the mutation methods exist
/// so the trait documents the full contract the (out-of-scope) administrative API relies on.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_applications(&self) -> Result<Vec<ApplicationName>, StoreError>;

    async fn describe_application(
        &self,
        app: &ApplicationName,
    ) -> Result<ApplicationSnapshot, StoreError>;

    /// Resolves a hostname straight to a dial target, per §6.1's endpoint resolution contract:
    /// look up the owning application, pick a random live backend, verify its TTL sentinel is
    /// still present, pruning it if not.
    async fn endpoint_for_hostname(&self, hostname: &Hostname) -> Result<Endpoint, StoreError>;

    async fn add_application(&self, app: ApplicationName) -> Result<(), StoreError>;
    async fn remove_application(&self, app: &ApplicationName) -> Result<(), StoreError>;

    async fn add_hostname(
        &self,
        app: &ApplicationName,
        hostname: Hostname,
    ) -> Result<(), StoreError>;
    async fn remove_hostname(&self, hostname: &Hostname) -> Result<(), StoreError>;

    async fn add_backend(
        &self,
        app: &ApplicationName,
        backend: BackendName,
        address: String,
        ttl: std::time::Duration,
    ) -> Result<(), StoreError>;
    async fn remove_backend(
        &self,
        app: &ApplicationName,
        backend: &BackendName,
    ) -> Result<(), StoreError>;

    /// Refreshes a backend's TTL sentinel (keep-alive).
    async fn touch_backend(
        &self,
        app: &ApplicationName,
        backend: &BackendName,
        ttl: std::time::Duration,
    ) -> Result<(), StoreError>;

    async fn set_backend_live(
        &self,
        app: &ApplicationName,
        backend: &BackendName,
        live: bool,
    ) -> Result<(), StoreError>;
}
