//! Sled-backed record store adapter.
//!
//! One tree per collection, JSON-encoded records keyed by id, flushed after
//! every write so acknowledged mutations are durable. Queries scan the
//! collection tree and evaluate the filter locally.

use super::adapter::{RecordStore, StoreError, StoreResult};
use super::filter::Filter;
use super::records::{Collection, Record};
use async_trait::async_trait;
use std::path::Path;

/// Embedded sled adapter; the default concrete [`RecordStore`].
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    organizations: sled::Tree,
    subjects: sled::Tree,
    public_items: sled::Tree,
    user_items: sled::Tree,
    users: sled::Tree,
}

impl SledStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::from_db(db)
    }

    /// Open an in-memory store backed by a temporary sled database. Used by
    /// tests and short-lived tooling.
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        let open = |name: Collection| {
            db.open_tree(name.tree_name())
                .map_err(|e| StoreError::Backend(e.to_string()))
        };
        Ok(Self {
            organizations: open(Collection::Organizations)?,
            subjects: open(Collection::Subjects)?,
            public_items: open(Collection::PublicItems)?,
            user_items: open(Collection::UserItems)?,
            users: open(Collection::Users)?,
            db,
        })
    }

    fn tree(&self, collection: Collection) -> &sled::Tree {
        match collection {
            Collection::Organizations => &self.organizations,
            Collection::Subjects => &self.subjects,
            Collection::PublicItems => &self.public_items,
            Collection::UserItems => &self.user_items,
            Collection::Users => &self.users,
        }
    }

    fn encode<T: Record>(record: &T) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: Record>(bytes: &[u8]) -> StoreResult<T> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn flush(&self) -> StoreResult<()> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl RecordStore for SledStore {
    async fn create<T: Record>(&self, record: &T) -> StoreResult<()> {
        let tree = self.tree(T::COLLECTION);
        let bytes = Self::encode(record)?;
        let previous = tree
            .compare_and_swap(record.id().as_bytes(), None as Option<&[u8]>, Some(bytes))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if previous.is_err() {
            return Err(StoreError::Duplicate {
                collection: T::COLLECTION,
                id: record.id().to_string(),
            });
        }
        self.flush()
    }

    async fn get<T: Record>(&self, id: &str) -> StoreResult<Option<T>> {
        match self
            .tree(T::COLLECTION)
            .get(id.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update<T: Record>(&self, record: &T) -> StoreResult<()> {
        let tree = self.tree(T::COLLECTION);
        if !tree
            .contains_key(record.id().as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            return Err(StoreError::Missing {
                collection: T::COLLECTION,
                id: record.id().to_string(),
            });
        }
        let bytes = Self::encode(record)?;
        tree.insert(record.id().as_bytes(), bytes)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.flush()
    }

    async fn delete<T: Record>(&self, id: &str) -> StoreResult<bool> {
        let existed = self
            .tree(T::COLLECTION)
            .remove(id.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .is_some();
        self.flush()?;
        Ok(existed)
    }

    async fn query<T: Record>(&self, filter: &Filter) -> StoreResult<Vec<T>> {
        let mut matches = Vec::new();
        for entry in self.tree(T::COLLECTION).iter() {
            let (_, bytes) = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            let value: serde_json::Value = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            if filter.matches(&value) {
                matches.push(Self::decode(&bytes)?);
            }
        }
        Ok(matches)
    }
}
