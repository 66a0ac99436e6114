//! Connector Factory
//!
//! Resolves a connector configuration to a live, configured
//! [`ConnectorInstance`] and owns instance lifecycle. Instances are cached
//! per key (normally the resource OID) and rebuilt when the configuration
//! fingerprint changes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::{ConnectionSettings, ConnectorConfiguration};
use crate::error::{ConnectorError, ConnectorResult};
use crate::traits::{ConnectorBuilder, ConnectorInstance};
use crate::types::ConnectorType;

/// Shared handle to a cached connector instance.
///
/// The instance is used by one holder at a time; [`ConnectorHandle::acquire`]
/// waits until the current holder is done. Multi-call activities such as a
/// sync cycle additionally hold [`ConnectorHandle::reserve`] so that two of
/// them never interleave on one resource.
#[derive(Clone)]
pub struct ConnectorHandle {
    instance: Arc<Mutex<Box<dyn ConnectorInstance>>>,
    cycle: Arc<Mutex<()>>,
    connector_type: ConnectorType,
    settings: ConnectionSettings,
}

impl ConnectorHandle {
    fn new(instance: Box<dyn ConnectorInstance>, configuration: &ConnectorConfiguration) -> Self {
        Self {
            instance: Arc::new(Mutex::new(instance)),
            cycle: Arc::new(Mutex::new(())),
            connector_type: configuration.connector_type.clone(),
            settings: configuration.settings.clone(),
        }
    }

    /// Take exclusive use of the instance.
    pub async fn acquire(&self) -> OwnedMutexGuard<Box<dyn ConnectorInstance>> {
        self.instance.clone().lock_owned().await
    }

    /// Reserve the instance for a whole cycle of calls.
    ///
    /// Does not block [`ConnectorHandle::acquire`]; the holder still
    /// acquires the instance per call.
    pub async fn reserve(&self) -> OwnedMutexGuard<()> {
        self.cycle.clone().lock_owned().await
    }

    /// Connection settings the instance was configured with.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn connector_type(&self) -> &ConnectorType {
        &self.connector_type
    }
}

impl std::fmt::Debug for ConnectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorHandle")
            .field("connector_type", &self.connector_type)
            .finish_non_exhaustive()
    }
}

struct CachedInstance {
    fingerprint: u64,
    handle: ConnectorHandle,
}

/// Summary of a registered connector implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    pub connector_type: ConnectorType,
    pub display_name: String,
}

/// Registry of connector builders plus a cache of configured instances.
#[derive(Default)]
pub struct ConnectorFactory {
    builders: RwLock<HashMap<ConnectorType, Arc<dyn ConnectorBuilder>>>,
    instances: RwLock<HashMap<String, CachedInstance>>,
}

impl ConnectorFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector implementation. Replaces any previous builder
    /// for the same type.
    pub async fn register(&self, builder: Arc<dyn ConnectorBuilder>) {
        let connector_type = builder.connector_type();
        info!(connector_type = %connector_type, "Registering connector");
        self.builders.write().await.insert(connector_type, builder);
    }

    /// List registered connector implementations.
    pub async fn list_connectors(&self) -> Vec<ConnectorInfo> {
        let builders = self.builders.read().await;
        let mut infos: Vec<ConnectorInfo> = builders
            .values()
            .map(|b| ConnectorInfo {
                connector_type: b.connector_type(),
                display_name: b.display_name().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.connector_type.cmp(&b.connector_type));
        infos
    }

    /// Get a configured instance for `key`, creating it if needed.
    ///
    /// A cached instance is reused while the configuration is unchanged.
    #[instrument(skip(self, configuration), fields(connector_type = %configuration.connector_type))]
    pub async fn get_or_create(
        &self,
        key: &str,
        configuration: &ConnectorConfiguration,
    ) -> ConnectorResult<ConnectorHandle> {
        let fingerprint = configuration.fingerprint();

        if let Some(cached) = self.instances.read().await.get(key) {
            if cached.fingerprint == fingerprint {
                return Ok(cached.handle.clone());
            }
        }

        // Built without the cache lock held; a concurrent winner is kept.
        let handle = self.create(configuration).await?;

        let mut instances = self.instances.write().await;
        if let Some(cached) = instances.get(key) {
            if cached.fingerprint == fingerprint {
                let winner = cached.handle.clone();
                drop(instances);
                debug!(key = %key, "Concurrent creation won elsewhere, disposing duplicate instance");
                dispose_handle(&handle).await;
                return Ok(winner);
            }
        }
        let stale = instances.insert(
            key.to_string(),
            CachedInstance {
                fingerprint,
                handle: handle.clone(),
            },
        );
        drop(instances);

        if let Some(stale) = stale {
            debug!(key = %key, "Configuration changed, disposing previous connector instance");
            dispose_handle(&stale.handle).await;
        }
        Ok(handle)
    }

    /// Create a configured instance without caching it.
    pub async fn create(
        &self,
        configuration: &ConnectorConfiguration,
    ) -> ConnectorResult<ConnectorHandle> {
        let builder = self
            .builders
            .read()
            .await
            .get(&configuration.connector_type)
            .cloned()
            .ok_or_else(|| {
                ConnectorError::configuration(format!(
                    "no connector registered for type '{}'",
                    configuration.connector_type
                ))
            })?;

        let mut instance = builder.build().await?;
        instance.configure(configuration).await?;
        Ok(ConnectorHandle::new(instance, configuration))
    }

    /// Drop and dispose the cached instance for `key`.
    pub async fn invalidate(&self, key: &str) {
        let removed = self.instances.write().await.remove(key);
        if let Some(cached) = removed {
            dispose_handle(&cached.handle).await;
        }
    }

    /// Number of cached instances.
    pub async fn cached_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Dispose every cached instance.
    pub async fn dispose_all(&self) {
        let drained: Vec<CachedInstance> = self.instances.write().await.drain().map(|(_, v)| v).collect();
        for cached in drained {
            dispose_handle(&cached.handle).await;
        }
    }
}

async fn dispose_handle(handle: &ConnectorHandle) {
    let instance = handle.acquire().await;
    if let Err(e) = instance.dispose().await {
        warn!(connector_type = %handle.connector_type, error = %e, "Failed to dispose connector instance");
    }
}
