//! Node-backed collaborators for the sync engine.

pub mod index;
pub mod live;

pub use index::{HistoryStore, NodeIndexer, PendingBlockRate};
pub use live::{NodeLiveSync, NodeStatus, NODE_STATUS_PROPERTY};
