//! Repository collaborator
//!
//! The provisioning core persists users, shadows, resources and tasks
//! through the [`Repository`] trait: a strongly consistent store of JSON
//! documents keyed by OID, each carrying a version that increases on every
//! write. [`RepositoryExt`] layers typed access on top.
//!
//! - [`InMemoryRepository`] - reference implementation
//! - [`RepositoryCache`] - request-scoped read-through cache

mod cache;
mod memory;
mod modification;
mod query;

pub use cache::{CacheStats, RepositoryCache};
pub use memory::InMemoryRepository;
pub use modification::ItemModification;
pub use query::ObjectQuery;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RepoError, RepoResult};
use crate::ids::Oid;

/// Kind of repository object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    User,
    Shadow,
    Resource,
    Task,
}

impl ObjectType {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::User => "user",
            ObjectType::Shadow => "shadow",
            ObjectType::Resource => "resource",
            ObjectType::Task => "task",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(ObjectType::User),
            "shadow" => Ok(ObjectType::Shadow),
            "resource" => Ok(ObjectType::Resource),
            "task" => Ok(ObjectType::Task),
            _ => Err(format!("Unknown object type: {s}")),
        }
    }
}

/// A stored document with its version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub oid: Oid,
    pub object_type: ObjectType,
    /// Starts at 1, incremented by every modification.
    pub version: u64,
    pub document: serde_json::Value,
}

impl StoredObject {
    /// Deserialize the document.
    pub fn parse<T: DeserializeOwned>(&self) -> RepoResult<T> {
        Ok(serde_json::from_value(self.document.clone())?)
    }
}

/// A type persisted in the repository.
pub trait RepositoryObject: Serialize + DeserializeOwned + Send + Sync {
    const OBJECT_TYPE: ObjectType;

    fn oid(&self) -> Oid;
}

/// Persistent object store.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Read a document and its current version.
    async fn get_object_with_version(
        &self,
        object_type: ObjectType,
        oid: &Oid,
    ) -> RepoResult<StoredObject>;

    /// Read a document. Fails with `NotFound` if absent.
    async fn get_object(&self, object_type: ObjectType, oid: &Oid) -> RepoResult<serde_json::Value> {
        Ok(self.get_object_with_version(object_type, oid).await?.document)
    }

    /// Store a new document. Fails with `AlreadyExists` if the OID is taken.
    async fn add_object(
        &self,
        object_type: ObjectType,
        oid: Oid,
        document: serde_json::Value,
    ) -> RepoResult<Oid>;

    /// Apply modifications atomically. Returns the new version.
    async fn modify_object(
        &self,
        object_type: ObjectType,
        oid: &Oid,
        modifications: &[ItemModification],
    ) -> RepoResult<u64>;

    /// Apply modifications only if the stored version still equals
    /// `expected_version`; otherwise fail with `VersionConflict`.
    async fn modify_object_if_version(
        &self,
        object_type: ObjectType,
        oid: &Oid,
        expected_version: u64,
        modifications: &[ItemModification],
    ) -> RepoResult<u64>;

    /// Remove a document. Fails with `NotFound` if absent.
    async fn delete_object(&self, object_type: ObjectType, oid: &Oid) -> RepoResult<()>;

    /// Documents of one type matching `query`.
    async fn list_objects(
        &self,
        object_type: ObjectType,
        query: &ObjectQuery,
    ) -> RepoResult<Vec<StoredObject>>;
}

/// Typed access to any [`Repository`].
#[async_trait]
pub trait RepositoryExt: Repository {
    async fn get<T: RepositoryObject>(&self, oid: &Oid) -> RepoResult<T> {
        self.get_object_with_version(T::OBJECT_TYPE, oid)
            .await?
            .parse()
    }

    async fn get_versioned<T: RepositoryObject>(&self, oid: &Oid) -> RepoResult<(T, u64)> {
        let stored = self.get_object_with_version(T::OBJECT_TYPE, oid).await?;
        Ok((stored.parse()?, stored.version))
    }

    /// Like [`RepositoryExt::get`] but maps `NotFound` to `None`.
    async fn find<T: RepositoryObject>(&self, oid: &Oid) -> RepoResult<Option<T>> {
        match self.get::<T>(oid).await {
            Ok(object) => Ok(Some(object)),
            Err(RepoError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn add<T: RepositoryObject>(&self, object: &T) -> RepoResult<Oid> {
        let document = serde_json::to_value(object)?;
        self.add_object(T::OBJECT_TYPE, object.oid(), document).await
    }

    /// Overwrite every top-level field with the object's current value.
    async fn update<T: RepositoryObject>(&self, object: &T) -> RepoResult<u64> {
        let modifications = replace_all(object)?;
        self.modify_object(T::OBJECT_TYPE, &object.oid(), &modifications)
            .await
    }

    async fn list<T: RepositoryObject>(&self, query: &ObjectQuery) -> RepoResult<Vec<T>> {
        self.list_objects(T::OBJECT_TYPE, query)
            .await?
            .iter()
            .map(StoredObject::parse)
            .collect()
    }
}

impl<R: Repository + ?Sized> RepositoryExt for R {}

fn replace_all<T: Serialize>(object: &T) -> RepoResult<Vec<ItemModification>> {
    match serde_json::to_value(object)? {
        serde_json::Value::Object(fields) => Ok(fields
            .into_iter()
            .filter(|(key, _)| key != "oid")
            .map(|(key, value)| ItemModification::replace(key, value))
            .collect()),
        _ => Err(RepoError::invalid_modification(
            "",
            "repository objects must serialize to a JSON object",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        oid: Oid,
        text: String,
        tags: Vec<String>,
        pinned: Option<bool>,
    }

    impl RepositoryObject for Note {
        const OBJECT_TYPE: ObjectType = ObjectType::User;

        fn oid(&self) -> Oid {
            self.oid
        }
    }

    #[tokio::test]
    async fn test_typed_round_trip_and_update() {
        let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let mut note = Note {
            oid: Oid::new(),
            text: "first".into(),
            tags: vec!["a".into()],
            pinned: Some(true),
        };
        repo.add(&note).await.unwrap();

        note.text = "second".into();
        note.pinned = None;
        let version = repo.update(&note).await.unwrap();
        assert_eq!(version, 2);

        let (stored, version) = repo.get_versioned::<Note>(&note.oid).await.unwrap();
        assert_eq!(stored, note);
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn test_find_maps_not_found() {
        let repo = InMemoryRepository::new();
        assert!(repo.find::<Note>(&Oid::new()).await.unwrap().is_none());
    }

    #[test]
    fn test_object_type_parse() {
        assert_eq!("Shadow".parse::<ObjectType>().unwrap(), ObjectType::Shadow);
        assert!("role".parse::<ObjectType>().is_err());
    }
}
