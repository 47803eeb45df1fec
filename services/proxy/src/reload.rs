//! Builds a new [`Snapshot`] from the store, starts it, and publishes it via `ArcSwap`.
//!
//! The swap itself is the only synchronization point readers need (§4.4/§9): build off the
//! writer path, start the new frontends so no reader ever observes an empty live set, publish
//! by pointer replacement, then stop the old frontends — by which point any request still
//! holding the old snapshot via its own `Arc` clone is left to finish undisturbed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::routing::{Backend, Frontend, Snapshot};
use crate::store::Store;

pub type SnapshotHandle = Arc<ArcSwap<Snapshot>>;

pub fn empty_handle() -> SnapshotHandle {
    Arc::new(ArcSwap::new(Arc::new(Snapshot::empty())))
}

pub struct ReloadPipeline {
    store: Arc<dyn Store>,
    handle: SnapshotHandle,
    health_interval: Duration,
    http_client: reqwest::Client,
}

impl ReloadPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        handle: SnapshotHandle,
        health_interval: Duration,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            store,
            handle,
            health_interval,
            http_client,
        }
    }

    pub fn handle(&self) -> SnapshotHandle {
        self.handle.clone()
    }

    /// Runs one full build-start-swap-drain cycle. Store errors abort the reload and keep the
    /// previous snapshot (never leave the proxy half-loaded).
    pub async fn reload(&self) -> anyhow::Result<()> {
        let apps = match self.store.list_applications().await {
            Ok(apps) => apps,
            Err(err) => {
                warn!(error = %err, "reload: failed to list applications, keeping previous snapshot");
                return Ok(());
            }
        };

        let mut host_map: HashMap<String, Arc<Frontend>> = HashMap::new();
        let mut frontends = Vec::new();

        for app in apps {
            let described = match self.store.describe_application(&app).await {
                Ok(s) => s,
                Err(err) => {
                    warn!(application = %app, error = %err, "reload: skipping application");
                    continue;
                }
            };

            if described.hostnames.is_empty() || described.backends.is_empty() {
                debug_skip(&app, &described);
                continue;
            }

            let mut claimed_hostnames = Vec::new();
            for hostname in &described.hostnames {
                let key = hostname.as_str().to_string();
                if host_map.contains_key(&key) {
                    warn!(hostname = %key, application = %app, "reload: duplicate hostname, dropping");
                    continue;
                }
                claimed_hostnames.push(key);
            }
            if claimed_hostnames.is_empty() {
                continue;
            }

            let frontend = Arc::new(Frontend::new(
                app.clone(),
                self.health_interval,
                self.http_client.clone(),
            ));
            for (name, (address, _)) in described.backends {
                let backend = Backend::new(name, address, None);
                if let Err(err) = frontend.add_backend(backend).await {
                    warn!(application = %app, error = %err, "reload: failed to register backend");
                }
            }

            for key in claimed_hostnames {
                host_map.insert(key, frontend.clone());
            }
            frontends.push(frontend);
        }

        let new_snapshot = Arc::new(Snapshot::new(host_map, frontends));
        new_snapshot.start_all();

        let old_snapshot = self.handle.swap(new_snapshot);
        info!("reload: published new snapshot");

        old_snapshot.stop_all().await;
        Ok(())
    }
}

fn debug_skip(app: &relay_id::ApplicationName, described: &crate::store::ApplicationSnapshot) {
    warn!(
        application = %app,
        hostnames = described.hostnames.len(),
        backends = described.backends.len(),
        "reload: skipping application with no hostnames or no backends"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn reload_publishes_resolvable_snapshot() {
        let (store, _rx) = MemoryStore::new();
        let app: relay_id::ApplicationName = "demo".parse().unwrap();
        store.add_application(app.clone()).await.unwrap();
        store
            .add_hostname(&app, "demo.local".parse().unwrap())
            .await
            .unwrap();
        store
            .add_backend(
                &app,
                "b1".parse().unwrap(),
                "127.0.0.1:9001".into(),
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        let pipeline = ReloadPipeline::new(
            store,
            empty_handle(),
            Duration::from_secs(30),
            reqwest::Client::new(),
        );
        pipeline.reload().await.unwrap();

        let snapshot = pipeline.handle().load_full();
        let frontend = snapshot.frontend_for_hostname("demo.local").unwrap();
        assert_eq!(frontend.registered_count().await, 1);
    }

    #[tokio::test]
    async fn reload_skips_application_with_no_backends() {
        let (store, _rx) = MemoryStore::new();
        let app: relay_id::ApplicationName = "demo".parse().unwrap();
        store.add_application(app.clone()).await.unwrap();
        store
            .add_hostname(&app, "demo.local".parse().unwrap())
            .await
            .unwrap();

        let pipeline = ReloadPipeline::new(
            store,
            empty_handle(),
            Duration::from_secs(30),
            reqwest::Client::new(),
        );
        pipeline.reload().await.unwrap();

        let snapshot = pipeline.handle().load_full();
        assert!(snapshot.frontend_for_hostname("demo.local").is_none());
    }

    #[tokio::test]
    async fn store_error_keeps_previous_snapshot() {
        struct BrokenStore;

        #[async_trait::async_trait]
        impl Store for BrokenStore {
            async fn list_applications(
                &self,
            ) -> Result<Vec<relay_id::ApplicationName>, crate::error::StoreError> {
                Err(crate::error::StoreError::Transport(anyhow::anyhow!("down")))
            }
            async fn describe_application(
                &self,
                _app: &relay_id::ApplicationName,
            ) -> Result<crate::store::ApplicationSnapshot, crate::error::StoreError> {
                unreachable!()
            }
            async fn endpoint_for_hostname(
                &self,
                _hostname: &relay_id::Hostname,
            ) -> Result<crate::store::Endpoint, crate::error::StoreError> {
                unreachable!()
            }
            async fn add_application(
                &self,
                _app: relay_id::ApplicationName,
            ) -> Result<(), crate::error::StoreError> {
                unreachable!()
            }
            async fn remove_application(
                &self,
                _app: &relay_id::ApplicationName,
            ) -> Result<(), crate::error::StoreError> {
                unreachable!()
            }
            async fn add_hostname(
                &self,
                _app: &relay_id::ApplicationName,
                _hostname: relay_id::Hostname,
            ) -> Result<(), crate::error::StoreError> {
                unreachable!()
            }
            async fn remove_hostname(
                &self,
                _hostname: &relay_id::Hostname,
            ) -> Result<(), crate::error::StoreError> {
                unreachable!()
            }
            async fn add_backend(
                &self,
                _app: &relay_id::ApplicationName,
                _backend: relay_id::BackendName,
                _address: String,
                _ttl: Duration,
            ) -> Result<(), crate::error::StoreError> {
                unreachable!()
            }
            async fn remove_backend(
                &self,
                _app: &relay_id::ApplicationName,
                _backend: &relay_id::BackendName,
            ) -> Result<(), crate::error::StoreError> {
                unreachable!()
            }
            async fn touch_backend(
                &self,
                _app: &relay_id::ApplicationName,
                _backend: &relay_id::BackendName,
                _ttl: Duration,
            ) -> Result<(), crate::error::StoreError> {
                unreachable!()
            }
            async fn set_backend_live(
                &self,
                _app: &relay_id::ApplicationName,
                _backend: &relay_id::BackendName,
                _live: bool,
            ) -> Result<(), crate::error::StoreError> {
                unreachable!()
            }
        }

        let pipeline = ReloadPipeline::new(
            Arc::new(BrokenStore),
            empty_handle(),
            Duration::from_secs(30),
            reqwest::Client::new(),
        );
        pipeline.reload().await.unwrap();
        let snapshot = pipeline.handle().load_full();
        assert!(snapshot.frontend_for_hostname("anything").is_none());
    }
}
