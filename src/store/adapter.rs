//! The record store adapter seam.
//!
//! Everything above this trait sees only typed CRUD plus filtered queries;
//! one concrete adapter exists per target persistence client. Every call is an
//! asynchronous I/O wait; concurrent updates to the same record rely on the
//! store's own per-record update semantics.

use super::filter::Filter;
use super::records::{Collection, Record};
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by record store adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The referenced record does not exist. This is the one status the error
    /// boundary translates; see `PaceboardError::from`.
    #[error("record {collection}/{id} not found")]
    Missing { collection: Collection, id: String },

    /// A record with the same id already exists.
    #[error("record {collection}/{id} already exists")]
    Duplicate { collection: Collection, id: String },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Typed CRUD + filtered-query access to the record collections.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Insert a new record; fails with [`StoreError::Duplicate`] on id reuse.
    async fn create<T: Record>(&self, record: &T) -> StoreResult<()>;

    /// Fetch a record by id.
    async fn get<T: Record>(&self, id: &str) -> StoreResult<Option<T>>;

    /// Overwrite an existing record; fails with [`StoreError::Missing`] if it
    /// does not exist.
    async fn update<T: Record>(&self, record: &T) -> StoreResult<()>;

    /// Delete a record by id; returns whether it existed.
    async fn delete<T: Record>(&self, id: &str) -> StoreResult<bool>;

    /// All records of a collection matching the filter.
    async fn query<T: Record>(&self, filter: &Filter) -> StoreResult<Vec<T>>;

    /// Fetch a record that must exist.
    async fn get_required<T: Record>(&self, id: &str) -> StoreResult<T> {
        self.get::<T>(id).await?.ok_or_else(|| StoreError::Missing {
            collection: T::COLLECTION,
            id: id.to_string(),
        })
    }
}
