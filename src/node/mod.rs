//! Node facade: configuration plus the operation surface exposed to the
//! routing/contract layer.

pub mod config;
#[allow(clippy::module_inception)]
pub mod node;

pub use config::{ConfigError, NodeConfig};
pub use node::{ItemUpdate, NewItem, PaceboardNode, UserItemUpdate};
