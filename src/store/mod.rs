//! Record store adapter: typed CRUD + filtered-query access to the five
//! record collections, behind a seam with one concrete adapter per target
//! persistence client.

pub mod adapter;
pub mod filter;
pub mod records;
pub mod sled_store;

pub use adapter::{RecordStore, StoreError, StoreResult};
pub use filter::{sanitize_keyword, Filter};
pub use records::{
    new_record_id, Collection, Organization, PublicItem, Range, Record, Subject, User, UserItem,
    UserSummary,
};
pub use sled_store::SledStore;
