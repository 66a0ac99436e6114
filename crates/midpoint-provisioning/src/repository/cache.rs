//! Request-scoped repository cache.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use super::{ItemModification, ObjectQuery, ObjectType, Repository, StoredObject};
use crate::error::RepoResult;
use crate::ids::Oid;

/// Hit and miss counters of one cache scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Read-through cache in front of a repository.
///
/// Create one at the start of a request and drop it at the end; it is
/// never shared between requests. Reads by OID are served from the cache
/// after the first miss. Writes go straight to the repository and evict the
/// affected entry. Queries are not cached.
pub struct RepositoryCache<'a> {
    inner: &'a dyn Repository,
    entries: Mutex<HashMap<(ObjectType, Oid), StoredObject>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<'a> RepositoryCache<'a> {
    pub fn new(inner: &'a dyn Repository) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn evict(&self, object_type: ObjectType, oid: &Oid) {
        self.entries.lock().await.remove(&(object_type, *oid));
    }
}

impl Drop for RepositoryCache<'_> {
    fn drop(&mut self) {
        let stats = self.stats();
        debug!(hits = stats.hits, misses = stats.misses, "Repository cache released");
    }
}

#[async_trait]
impl<'a> Repository for RepositoryCache<'a> {
    async fn get_object_with_version(
        &self,
        object_type: ObjectType,
        oid: &Oid,
    ) -> RepoResult<StoredObject> {
        if let Some(cached) = self.entries.lock().await.get(&(object_type, *oid)) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let stored = self.inner.get_object_with_version(object_type, oid).await?;
        self.entries
            .lock()
            .await
            .insert((object_type, *oid), stored.clone());
        Ok(stored)
    }

    async fn add_object(
        &self,
        object_type: ObjectType,
        oid: Oid,
        document: serde_json::Value,
    ) -> RepoResult<Oid> {
        self.inner.add_object(object_type, oid, document).await
    }

    async fn modify_object(
        &self,
        object_type: ObjectType,
        oid: &Oid,
        modifications: &[ItemModification],
    ) -> RepoResult<u64> {
        self.evict(object_type, oid).await;
        self.inner.modify_object(object_type, oid, modifications).await
    }

    async fn modify_object_if_version(
        &self,
        object_type: ObjectType,
        oid: &Oid,
        expected_version: u64,
        modifications: &[ItemModification],
    ) -> RepoResult<u64> {
        self.evict(object_type, oid).await;
        self.inner
            .modify_object_if_version(object_type, oid, expected_version, modifications)
            .await
    }

    async fn delete_object(&self, object_type: ObjectType, oid: &Oid) -> RepoResult<()> {
        self.evict(object_type, oid).await;
        self.inner.delete_object(object_type, oid).await
    }

    async fn list_objects(
        &self,
        object_type: ObjectType,
        query: &ObjectQuery,
    ) -> RepoResult<Vec<StoredObject>> {
        self.inner.list_objects(object_type, query).await
    }
}
