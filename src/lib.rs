//! Paceboard: progress aggregation and real-time synchronization engine for
//! shared task tracking.
//!
//! Users track personal progress against shared task templates organized by
//! subject and optionally shared within organizations. This crate is the core
//! behind the request boundary: the record store adapter, the membership
//! fan-out engine keeping per-user shadow records consistent with an item's
//! sharing scope, the aggregation engine, the real-time fan-out channel, and
//! the client aggregate cache that mirrors aggregation output.

pub mod aggregation;
pub mod cache;
pub mod error;
pub mod fanout;
pub mod node;
pub mod realtime;
pub mod store;

pub use aggregation::{Aggregator, MinutePair, SharedProgress, StalenessPolicy};
pub use cache::{OptimisticValue, ProgressCache};
pub use error::{PaceboardError, PaceboardResult};
pub use fanout::{FanoutReport, MembershipFanout};
pub use node::{ItemUpdate, NewItem, NodeConfig, PaceboardNode, UserItemUpdate};
pub use realtime::{ProgressChange, RealtimeChannel, RefreshDomain, ServerEvent};
pub use store::{
    Organization, PublicItem, Range, RecordStore, SledStore, Subject, User, UserItem, UserSummary,
};
