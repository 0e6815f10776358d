//! Bitcoin Core JSON-RPC plumbing for the node-backed collaborators: the
//! client, its options and metrics, and block helpers.

pub mod client;
pub mod helpers;
pub mod metrics;
pub mod options;

pub use client::{BlockchainInfo, NodeRpcClient, RpcError};
pub use helpers::{coinbase_tag, hex_to_block, summarize_block};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
