//! In-memory repository.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{ItemModification, ObjectQuery, ObjectType, Repository, StoredObject};
use crate::error::{RepoError, RepoResult};
use crate::ids::Oid;

/// Strongly consistent in-process store.
///
/// Every operation takes the store lock, so reads always observe the
/// latest committed write and modifications are atomic per object.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    objects: RwLock<BTreeMap<(ObjectType, Oid), StoredObject>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects of a type.
    pub async fn count(&self, object_type: ObjectType) -> usize {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(t, _)| *t == object_type)
            .count()
    }

    fn apply_all(
        stored: &mut StoredObject,
        modifications: &[ItemModification],
    ) -> RepoResult<u64> {
        // Work on a copy so a failing modification leaves the object unchanged.
        let mut document = stored.document.clone();
        for modification in modifications {
            modification.apply(&mut document)?;
        }
        stored.document = document;
        stored.version += 1;
        Ok(stored.version)
    }
}

fn not_found(object_type: ObjectType, oid: &Oid) -> RepoError {
    RepoError::NotFound {
        object_type,
        oid: *oid,
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_object_with_version(
        &self,
        object_type: ObjectType,
        oid: &Oid,
    ) -> RepoResult<StoredObject> {
        self.objects
            .read()
            .await
            .get(&(object_type, *oid))
            .cloned()
            .ok_or_else(|| not_found(object_type, oid))
    }

    #[instrument(skip(self, document), fields(object_type = %object_type))]
    async fn add_object(
        &self,
        object_type: ObjectType,
        oid: Oid,
        document: serde_json::Value,
    ) -> RepoResult<Oid> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(&(object_type, oid)) {
            return Err(RepoError::AlreadyExists { object_type, oid });
        }
        objects.insert(
            (object_type, oid),
            StoredObject {
                oid,
                object_type,
                version: 1,
                document,
            },
        );
        debug!(oid = %oid, "Object added");
        Ok(oid)
    }

    async fn modify_object(
        &self,
        object_type: ObjectType,
        oid: &Oid,
        modifications: &[ItemModification],
    ) -> RepoResult<u64> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(&(object_type, *oid))
            .ok_or_else(|| not_found(object_type, oid))?;
        Self::apply_all(stored, modifications)
    }

    async fn modify_object_if_version(
        &self,
        object_type: ObjectType,
        oid: &Oid,
        expected_version: u64,
        modifications: &[ItemModification],
    ) -> RepoResult<u64> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(&(object_type, *oid))
            .ok_or_else(|| not_found(object_type, oid))?;
        if stored.version != expected_version {
            return Err(RepoError::VersionConflict {
                oid: *oid,
                expected: expected_version,
                actual: stored.version,
            });
        }
        Self::apply_all(stored, modifications)
    }

    #[instrument(skip(self), fields(object_type = %object_type, oid = %oid))]
    async fn delete_object(&self, object_type: ObjectType, oid: &Oid) -> RepoResult<()> {
        self.objects
            .write()
            .await
            .remove(&(object_type, *oid))
            .map(|_| debug!("Object deleted"))
            .ok_or_else(|| not_found(object_type, oid))
    }

    async fn list_objects(
        &self,
        object_type: ObjectType,
        query: &ObjectQuery,
    ) -> RepoResult<Vec<StoredObject>> {
        Ok(self
            .objects
            .read()
            .await
            .values()
            .filter(|o| o.object_type == object_type && query.matches(&o.document))
            .cloned()
            .collect())
    }
}
