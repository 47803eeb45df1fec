//! Reference in-memory [`Store`] honoring the TTL-sentinel persistence model.
//!
//! Used for local/dev runs and the integration tests; a production deployment points the
//! reload pipeline and discovery listener at a real KV-backed implementation instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::seq::IteratorRandom;
use relay_id::{ApplicationName, BackendName, Hostname};
use tokio::sync::{mpsc, RwLock};

use super::{ApplicationSnapshot, Endpoint, Store};
use crate::discovery::RawChange;
use crate::error::StoreError;

struct BackendEntry {
    address: String,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    apps: HashSet<ApplicationName>,
    hostnames: HashMap<ApplicationName, HashSet<Hostname>>,
    resolve: HashMap<Hostname, ApplicationName>,
    backends: HashMap<ApplicationName, HashMap<BackendName, BackendEntry>>,
    live_backends: HashMap<ApplicationName, HashSet<BackendName>>,
}

/// In-memory reference store. Emits a keyed change notification on every mutation so a
/// [`crate::discovery::DiscoveryListener`] driven by it behaves like a real watch stream,
/// including the ability to suppress a write that didn't actually change the value.
pub struct MemoryStore {
    state: RwLock<State>,
    changes: mpsc::Sender<RawChange>,
}

impl MemoryStore {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<RawChange>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Arc::new(Self {
                state: RwLock::new(State::default()),
                changes: tx,
            }),
            rx,
        )
    }

    fn notify(&self, key: impl Into<String>, value: impl Into<String>) {
        let _ = self.changes.try_send(RawChange {
            key: key.into(),
            value: value.into(),
        });
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_applications(&self) -> Result<Vec<ApplicationName>, StoreError> {
        Ok(self.state.read().await.apps.iter().cloned().collect())
    }

    async fn describe_application(
        &self,
        app: &ApplicationName,
    ) -> Result<ApplicationSnapshot, StoreError> {
        let state = self.state.read().await;
        let hostnames = state
            .hostnames
            .get(app)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let live = state.live_backends.get(app);
        let backends = state
            .backends
            .get(app)
            .map(|map| {
                map.iter()
                    .map(|(name, entry)| {
                        let alive = entry.expires_at > Instant::now()
                            && live.is_some_and(|l| l.contains(name));
                        (name.clone(), (entry.address.clone(), alive))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ApplicationSnapshot {
            hostnames,
            backends,
        })
    }

    async fn endpoint_for_hostname(&self, hostname: &Hostname) -> Result<Endpoint, StoreError> {
        let app = {
            let state = self.state.read().await;
            state
                .resolve
                .get(hostname)
                .cloned()
                .ok_or_else(|| StoreError::NoHostname(hostname.clone()))?
        };

        let mut state = self.state.write().await;
        let live = state
            .live_backends
            .get(&app)
            .into_iter()
            .flatten()
            .cloned()
            .choose(&mut rand::rng())
            .ok_or_else(|| StoreError::NoBackend(app.to_string()))?;

        let still_alive = state
            .backends
            .get(&app)
            .and_then(|m| m.get(&live))
            .map(|entry| entry.expires_at > Instant::now())
            .unwrap_or(false);

        if !still_alive {
            if let Some(set) = state.live_backends.get_mut(&app) {
                set.remove(&live);
            }
            if let Some(map) = state.backends.get_mut(&app) {
                map.remove(&live);
            }
            return Err(StoreError::DeadBackend {
                app: app.to_string(),
                backend: live.to_string(),
            });
        }

        let address = state.backends[&app][&live].address.clone();
        Ok(Endpoint {
            application: app,
            backend: live,
            address,
        })
    }

    async fn add_application(&self, app: ApplicationName) -> Result<(), StoreError> {
        self.state.write().await.apps.insert(app.clone());
        self.notify("apps", app.to_string());
        Ok(())
    }

    async fn remove_application(&self, app: &ApplicationName) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.apps.remove(app);
        if let Some(hosts) = state.hostnames.remove(app) {
            for host in hosts {
                state.resolve.remove(&host);
            }
        }
        state.backends.remove(app);
        state.live_backends.remove(app);
        drop(state);
        self.notify("apps", "");
        Ok(())
    }

    async fn add_hostname(
        &self,
        app: &ApplicationName,
        hostname: Hostname,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.resolve.insert(hostname.clone(), app.clone());
        state
            .hostnames
            .entry(app.clone())
            .or_default()
            .insert(hostname.clone());
        drop(state);
        self.notify(format!("resolve:{hostname}"), app.to_string());
        Ok(())
    }

    async fn remove_hostname(&self, hostname: &Hostname) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(app) = state.resolve.remove(hostname) {
            if let Some(set) = state.hostnames.get_mut(&app) {
                set.remove(hostname);
            }
        }
        drop(state);
        self.notify(format!("resolve:{hostname}"), "");
        Ok(())
    }

    async fn add_backend(
        &self,
        app: &ApplicationName,
        backend: BackendName,
        address: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.backends.entry(app.clone()).or_default().insert(
            backend.clone(),
            BackendEntry {
                address: address.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        drop(state);
        self.notify(format!("backend_ttl:{app}:{backend}"), address);
        Ok(())
    }

    async fn remove_backend(
        &self,
        app: &ApplicationName,
        backend: &BackendName,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(map) = state.backends.get_mut(app) {
            map.remove(backend);
        }
        if let Some(set) = state.live_backends.get_mut(app) {
            set.remove(backend);
        }
        drop(state);
        self.notify(format!("backend_ttl:{app}:{backend}"), "");
        Ok(())
    }

    async fn touch_backend(
        &self,
        app: &ApplicationName,
        backend: &BackendName,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let address = if let Some(entry) = state.backends.get_mut(app).and_then(|m| m.get_mut(backend)) {
            entry.expires_at = Instant::now() + ttl;
            Some(entry.address.clone())
        } else {
            None
        };
        drop(state);
        // A TTL keep-alive writes the same value back: the key/value pair is unchanged, so a
        // watch-style listener sees this as a no-op and must not trigger a reload.
        if let Some(address) = address {
            self.notify(format!("backend_ttl:{app}:{backend}"), address);
        }
        Ok(())
    }

    async fn set_backend_live(
        &self,
        app: &ApplicationName,
        backend: &BackendName,
        live: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let set = state.live_backends.entry(app.clone()).or_default();
        if live {
            set.insert(backend.clone());
        } else {
            set.remove(backend);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> Arc<MemoryStore> {
        let (store, _rx) = MemoryStore::new();
        let app: ApplicationName = "demo".parse().unwrap();
        store.add_application(app.clone()).await.unwrap();
        store
            .add_hostname(&app, "demo.local".parse().unwrap())
            .await
            .unwrap();
        let backend: BackendName = "b1".parse().unwrap();
        store
            .add_backend(&app, backend.clone(), "127.0.0.1:9001".into(), Duration::from_secs(30))
            .await
            .unwrap();
        store.set_backend_live(&app, &backend, true).await.unwrap();
        store
    }

    #[tokio::test]
    async fn resolves_hostname_to_live_backend() {
        let store = seeded().await;
        let endpoint = store
            .endpoint_for_hostname(&"demo.local".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(endpoint.address, "127.0.0.1:9001");
    }

    #[tokio::test]
    async fn unknown_hostname_errors() {
        let (store, _rx) = MemoryStore::new();
        let err = store
            .endpoint_for_hostname(&"nope.local".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoHostname(_)));
    }

    #[tokio::test]
    async fn no_live_backend_errors() {
        let store = seeded().await;
        let app: ApplicationName = "demo".parse().unwrap();
        let backend: BackendName = "b1".parse().unwrap();
        store.set_backend_live(&app, &backend, false).await.unwrap();
        let err = store
            .endpoint_for_hostname(&"demo.local".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoBackend(_)));
    }

    #[tokio::test]
    async fn expired_ttl_sentinel_is_pruned_on_resolve() {
        let (store, _rx) = MemoryStore::new();
        let app: ApplicationName = "demo".parse().unwrap();
        store.add_application(app.clone()).await.unwrap();
        store
            .add_hostname(&app, "demo.local".parse().unwrap())
            .await
            .unwrap();
        let backend: BackendName = "b1".parse().unwrap();
        store
            .add_backend(&app, backend.clone(), "127.0.0.1:9001".into(), Duration::from_millis(1))
            .await
            .unwrap();
        store.set_backend_live(&app, &backend, true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = store
            .endpoint_for_hostname(&"demo.local".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DeadBackend { .. }));

        let snapshot = store.describe_application(&app).await.unwrap();
        assert!(snapshot.backends.is_empty());
    }

    #[tokio::test]
    async fn remove_application_cleans_up_resolve_entry() {
        let store = seeded().await;
        let app: ApplicationName = "demo".parse().unwrap();
        store.remove_application(&app).await.unwrap();
        let err = store
            .endpoint_for_hostname(&"demo.local".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoHostname(_)));
    }
}
