//! Live synchronization against a Bitcoin Core node.
//!
//! `NodeLiveSync` keeps node status, a short window of recent blocks and the
//! mempool txid set, and publishes every change through the [`EventHub`]. It
//! owns the [`PriorityFlag`]: the flag is held from construction until the first
//! mempool sync completes, and again whenever new blocks or mempool changes are
//! being applied.

use crate::events::hub::EventHub;
use crate::events::payload::{BlockSummary, HubEvent, LoadingProgress, MempoolChange};
use crate::rpc::client::{BlockchainInfo, NodeRpcClient};
use crate::rpc::helpers::summarize_block;
use crate::sync::priority::{PriorityFlag, PriorityGuard, PriorityReader};
use crate::sync::steps::{LiveSync, SyncFuture};
use anyhow::{bail, Result};
use bitcoin::Txid;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const NODE_STATUS_PROPERTY: &str = "node-status";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub chain: String,
    pub blocks: u64,
    pub headers: u64,
    pub verification_progress: f64,
    pub initial_block_download: bool,
}

impl From<BlockchainInfo> for NodeStatus {
    fn from(info: BlockchainInfo) -> Self {
        Self {
            chain: info.chain,
            blocks: info.blocks,
            headers: info.headers,
            verification_progress: info.verification_progress,
            initial_block_download: info.initial_block_download,
        }
    }
}

#[derive(Default)]
struct LiveState {
    status: Option<NodeStatus>,
    blocks: VecDeque<BlockSummary>,
    mempool: HashSet<Txid>,
    mempool_synced: bool,
}

pub struct NodeLiveSync {
    rpc: NodeRpcClient,
    hub: Arc<EventHub>,
    priority: PriorityFlag,
    initial_blocks: usize,
    state: Mutex<LiveState>,
    startup: Mutex<Option<PriorityGuard>>,
}

impl NodeLiveSync {
    pub fn new(rpc: NodeRpcClient, hub: Arc<EventHub>, initial_blocks: usize) -> Self {
        let priority = PriorityFlag::new();
        let startup = priority.assert();
        Self {
            rpc,
            hub,
            priority,
            initial_blocks: initial_blocks.max(1),
            state: Mutex::default(),
            startup: Mutex::new(Some(startup)),
        }
    }

    pub fn node_status(&self) -> Option<NodeStatus> {
        self.lock().status.clone()
    }

    /// Recent blocks, oldest first.
    pub fn recent_blocks(&self) -> Vec<BlockSummary> {
        self.lock().blocks.iter().cloned().collect()
    }

    pub fn tip(&self) -> Option<BlockSummary> {
        self.lock().blocks.back().cloned()
    }

    pub fn mempool_size(&self) -> usize {
        self.lock().mempool.len()
    }

    pub fn is_mempool_synced(&self) -> bool {
        self.lock().mempool_synced
    }

    fn lock(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh_node_status(&self) -> Result<()> {
        let status = NodeStatus::from(self.rpc.get_blockchain_info().await?);

        if status.initial_block_download {
            let progress = (status.verification_progress * 100.0).round().clamp(0.0, 100.0) as u8;
            self.hub.publish(HubEvent::LoadingProgress(LoadingProgress {
                indicator: "node".to_string(),
                progress,
            }));
        }

        let changed = {
            let mut state = self.lock();
            let changed = state.status.as_ref() != Some(&status);
            state.status = Some(status.clone());
            changed
        };

        if changed {
            tracing::debug!(
                chain = %status.chain,
                blocks = status.blocks,
                headers = status.headers,
                ibd = status.initial_block_download,
                "node status changed"
            );
            let value = serde_json::to_value(&status)?;
            self.hub
                .publish(HubEvent::init_property(NODE_STATUS_PROPERTY, value));
        }
        Ok(())
    }

    async fn refresh_blocks(&self) -> Result<()> {
        let tip_height = self.rpc.get_block_count().await?;
        self.unwind_stale_blocks(tip_height).await?;

        let last = self.tip();
        let start = match &last {
            Some(block) => block.height + 1,
            None => tip_height.saturating_sub(self.initial_blocks as u64 - 1),
        };
        if start > tip_height {
            return Ok(());
        }

        let _priority = self.priority.assert();
        let mut previous = last.map(|block| block.hash);

        for height in start..=tip_height {
            let hash = self.rpc.get_block_hash(height).await?;
            let block = self.rpc.get_raw_block(&hash).await?;
            let summary = summarize_block(height, &block);

            if let Some(expected) = previous {
                if summary.previous_hash != expected {
                    bail!(
                        "block {height} ({}) does not extend {expected}; chain moved during sync",
                        summary.hash
                    );
                }
            }
            previous = Some(summary.hash);

            {
                let mut state = self.lock();
                state.blocks.push_back(summary.clone());
                while state.blocks.len() > self.initial_blocks {
                    state.blocks.pop_front();
                }
            }

            tracing::info!(
                height,
                hash = %summary.hash,
                txs = summary.tx_count,
                pool = summary.pool.as_deref().unwrap_or("unknown"),
                "new block"
            );
            self.hub.publish(HubEvent::NewBlock(summary));
        }
        Ok(())
    }

    /// Drops kept blocks that are no longer on the node's best chain.
    async fn unwind_stale_blocks(&self, tip_height: u64) -> Result<()> {
        let mut dropped = 0usize;

        while let Some(last) = self.tip() {
            let still_best = last.height <= tip_height
                && self.rpc.get_block_hash(last.height).await? == last.hash;
            if still_best {
                break;
            }
            self.lock().blocks.pop_back();
            dropped += 1;
        }

        if dropped > 0 {
            tracing::warn!(dropped, tip_height, "chain reorganisation detected");
        }
        Ok(())
    }

    async fn refresh_mempool(&self) -> Result<()> {
        let txids = self.rpc.get_raw_mempool().await?;

        let (change, first_sync) = {
            let _priority = self.priority.assert();
            let mut state = self.lock();
            let change = diff_mempool(&mut state.mempool, txids);
            let first_sync = !state.mempool_synced;
            state.mempool_synced = true;
            (change, first_sync)
        };

        if !change.is_empty() {
            tracing::debug!(
                added = change.added.len(),
                removed = change.removed.len(),
                count = change.count,
                "mempool changed"
            );
            self.hub.publish(HubEvent::MempoolChanged(change));
        }

        if first_sync {
            self.hub.publish(HubEvent::LoadingProgress(LoadingProgress {
                indicator: "mempool".to_string(),
                progress: 100,
            }));
            let released = self
                .startup
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if released.is_some() {
                tracing::info!("initial mempool sync complete; background indexing allowed");
            }
        }
        Ok(())
    }
}

impl LiveSync for NodeLiveSync {
    fn sync_node_status(&self) -> SyncFuture<'_> {
        Box::pin(self.refresh_node_status())
    }

    fn sync_new_blocks(&self) -> SyncFuture<'_> {
        Box::pin(self.refresh_blocks())
    }

    fn sync_mempool(&self) -> SyncFuture<'_> {
        Box::pin(self.refresh_mempool())
    }

    fn priority(&self) -> PriorityReader {
        self.priority.reader()
    }
}

/// Replaces `current` with `latest` and reports the difference, sorted.
fn diff_mempool(current: &mut HashSet<Txid>, latest: Vec<Txid>) -> MempoolChange {
    let latest: HashSet<Txid> = latest.into_iter().collect();

    let mut added: Vec<Txid> = latest.difference(current).copied().collect();
    let mut removed: Vec<Txid> = current.difference(&latest).copied().collect();
    added.sort_unstable();
    removed.sort_unstable();

    *current = latest;
    MempoolChange {
        added,
        removed,
        count: current.len(),
    }
}
