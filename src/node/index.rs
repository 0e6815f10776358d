//! Historical indexing against a Bitcoin Core node, kept in memory.

use crate::events::payload::BlockSummary;
use crate::indexer::steps::{IndexingFuture, IndexingSteps};
use crate::rpc::client::NodeRpcClient;
use crate::rpc::helpers::summarize_block;
use anyhow::{Context, Result};
use bitcoin::BlockHash;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const DAY_SECS: u64 = 86_400;
pub const WEEK_SECS: u64 = 604_800;

/// Marker for the daily network hashrate history.
pub const NETWORK_HASHRATE_MARKER: &str = "last_hashrates_indexing";
/// Marker for the weekly pool hashrate history.
pub const POOL_HASHRATE_MARKER: &str = "last_weekly_hashrates_indexing";

const UNKNOWN_POOL: &str = "unknown";

/// A rate computed for a block before that block was indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBlockRate {
    pub hash: BlockHash,
    pub name: String,
    pub value: f64,
}

#[derive(Default)]
struct HistoryData {
    blocks: BTreeMap<u64, BlockSummary>,
    network_hashrates: BTreeMap<u64, f64>,
    pool_shares: BTreeMap<u64, BTreeMap<String, f64>>,
    markers: HashMap<String, u64>,
    pending_rates: Vec<PendingBlockRate>,
    block_rates: HashMap<BlockHash, BTreeMap<String, f64>>,
}

/// In-memory historical store shared by the indexer and any rate producer.
#[derive(Default)]
pub struct HistoryStore {
    data: Mutex<HistoryData>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HistoryData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn block_hash(&self, height: u64) -> Option<BlockHash> {
        self.lock().blocks.get(&height).map(|block| block.hash)
    }

    pub fn indexed_blocks(&self) -> Vec<BlockSummary> {
        self.lock().blocks.values().cloned().collect()
    }

    pub fn indexed_tip(&self) -> Option<BlockSummary> {
        self.lock().blocks.values().next_back().cloned()
    }

    pub fn insert_block(&self, block: BlockSummary) {
        self.lock().blocks.insert(block.height, block);
    }

    /// Forgets blocks below `height`.
    pub fn prune_blocks_below(&self, height: u64) -> usize {
        let mut data = self.lock();
        let kept = data.blocks.split_off(&height);
        let pruned = data.blocks.len();
        data.blocks = kept;
        pruned
    }

    /// Daily samples keyed by the day's start timestamp.
    pub fn network_hashrates(&self) -> BTreeMap<u64, f64> {
        self.lock().network_hashrates.clone()
    }

    /// Pool shares for the week starting at `week_start`.
    pub fn pool_shares(&self, week_start: u64) -> Option<BTreeMap<String, f64>> {
        self.lock().pool_shares.get(&week_start).cloned()
    }

    pub fn pool_share_weeks(&self) -> Vec<u64> {
        self.lock().pool_shares.keys().copied().collect()
    }

    pub fn latest_run(&self, marker: &str) -> Option<u64> {
        self.lock().markers.get(marker).copied()
    }

    pub fn set_latest_run(&self, marker: &str, timestamp: u64) {
        self.lock().markers.insert(marker.to_string(), timestamp);
    }

    pub fn queue_block_rate(&self, hash: BlockHash, name: impl Into<String>, value: f64) {
        self.lock().pending_rates.push(PendingBlockRate {
            hash,
            name: name.into(),
            value,
        });
    }

    pub fn pending_block_rates(&self) -> Vec<PendingBlockRate> {
        self.lock().pending_rates.clone()
    }

    pub fn block_rates(&self, hash: &BlockHash) -> Option<BTreeMap<String, f64>> {
        self.lock().block_rates.get(hash).cloned()
    }

    /// Saves every pending rate whose block is indexed; the rest stay queued.
    pub fn save_pending_block_rates(&self) -> usize {
        let mut data = self.lock();
        let HistoryData {
            blocks,
            pending_rates,
            block_rates,
            ..
        } = &mut *data;

        let (ready, waiting): (Vec<_>, Vec<_>) = pending_rates
            .drain(..)
            .partition(|rate| blocks.values().any(|block| block.hash == rate.hash));
        *pending_rates = waiting;

        let saved = ready.len();
        for rate in ready {
            block_rates
                .entry(rate.hash)
                .or_default()
                .insert(rate.name, rate.value);
        }
        saved
    }
}

/// Start of the period of length `period` containing `time`.
pub fn period_start(time: u64, period: u64) -> u64 {
    time - time % period
}

/// Share of blocks mined by each pool tag; untagged blocks count as `unknown`.
pub fn pool_shares<'a>(blocks: impl IntoIterator<Item = &'a BlockSummary>) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut total = 0u64;
    for block in blocks {
        let pool = block.pool.as_deref().unwrap_or(UNKNOWN_POOL);
        *counts.entry(pool.to_string()).or_default() += 1;
        total += 1;
    }

    counts
        .into_iter()
        .map(|(pool, count)| (pool, count as f64 / total as f64))
        .collect()
}

/// Groups blocks by period start, dropping the period that contains `tip_time`.
fn complete_periods(
    blocks: &[BlockSummary],
    period: u64,
    tip_time: u64,
) -> BTreeMap<u64, Vec<&BlockSummary>> {
    let current = period_start(tip_time, period);
    let mut grouped: BTreeMap<u64, Vec<&BlockSummary>> = BTreeMap::new();
    for block in blocks {
        let start = period_start(u64::from(block.time), period);
        if start < current {
            grouped.entry(start).or_default().push(block);
        }
    }
    grouped
}

fn is_fresh(marker: Option<u64>, now: u64, period: u64) -> bool {
    matches!(marker, Some(last) if last != 0 && now < last.saturating_add(period))
}

/// Node-backed implementation of the indexing pipeline.
pub struct NodeIndexer {
    rpc: NodeRpcClient,
    store: Arc<HistoryStore>,
    index_depth: u64,
}

impl NodeIndexer {
    pub fn new(rpc: NodeRpcClient, store: Arc<HistoryStore>, index_depth: usize) -> Self {
        Self {
            rpc,
            store,
            index_depth: index_depth.max(1) as u64,
        }
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    async fn index_blocks(&self) -> Result<()> {
        let tip = self.rpc.get_block_count().await?;
        let floor = tip.saturating_sub(self.index_depth - 1);

        // Walk down from the tip until the stored chain agrees with the node.
        let mut missing = Vec::new();
        for height in (floor..=tip).rev() {
            let hash = self.rpc.get_block_hash(height).await?;
            if self.store.block_hash(height) == Some(hash) {
                break;
            }
            missing.push((height, hash));
        }

        let indexed = missing.len();
        for (height, hash) in missing.into_iter().rev() {
            let block = self
                .rpc
                .get_raw_block(&hash)
                .await
                .with_context(|| format!("failed to fetch block {height} ({hash})"))?;
            self.store.insert_block(summarize_block(height, &block));
        }

        let pruned = self.store.prune_blocks_below(floor);
        tracing::info!(indexed, pruned, tip, floor, "block database up to date");
        Ok(())
    }

    fn reset_markers(&self) -> Result<()> {
        self.store.set_latest_run(NETWORK_HASHRATE_MARKER, 0);
        self.store.set_latest_run(POOL_HASHRATE_MARKER, 0);
        Ok(())
    }

    async fn index_network_hashrate(&self) -> Result<()> {
        let Some(tip) = self.store.indexed_tip() else {
            return Ok(());
        };
        let now = u64::from(tip.time);
        if is_fresh(self.store.latest_run(NETWORK_HASHRATE_MARKER), now, DAY_SECS) {
            tracing::debug!("daily network hashrate already indexed");
            return Ok(());
        }

        let blocks = self.store.indexed_blocks();
        let known = self.store.network_hashrates();
        let mut added = 0usize;
        for (day, blocks) in complete_periods(&blocks, DAY_SECS, now) {
            if known.contains_key(&day) {
                continue;
            }
            let Some(last) = blocks.last() else { continue };
            let height = i64::try_from(last.height).context("block height overflows i64")?;
            let hashps = self
                .rpc
                .get_network_hashps(blocks.len() as u64, height)
                .await?;
            self.store.lock().network_hashrates.insert(day, hashps);
            added += 1;
        }

        self.store.set_latest_run(NETWORK_HASHRATE_MARKER, now);
        tracing::info!(added, "daily network hashrate indexed");
        Ok(())
    }

    fn index_pool_hashrate(&self) -> Result<()> {
        let Some(tip) = self.store.indexed_tip() else {
            return Ok(());
        };
        let now = u64::from(tip.time);
        if is_fresh(self.store.latest_run(POOL_HASHRATE_MARKER), now, WEEK_SECS) {
            tracing::debug!("weekly pool hashrate already indexed");
            return Ok(());
        }

        let blocks = self.store.indexed_blocks();
        let mut added = 0usize;
        for (week, blocks) in complete_periods(&blocks, WEEK_SECS, now) {
            let shares = pool_shares(blocks);
            let mut data = self.store.lock();
            if !data.pool_shares.contains_key(&week) {
                data.pool_shares.insert(week, shares);
                added += 1;
            }
        }

        self.store.set_latest_run(POOL_HASHRATE_MARKER, now);
        tracing::info!(added, "weekly pool hashrate indexed");
        Ok(())
    }

    fn save_rates(&self) -> Result<()> {
        let saved = self.store.save_pending_block_rates();
        if saved > 0 {
            tracing::info!(saved, "saved pending block rates");
        }
        Ok(())
    }
}

impl IndexingSteps for NodeIndexer {
    fn generate_block_database(&self) -> IndexingFuture<'_> {
        Box::pin(self.index_blocks())
    }

    fn reset_indexing_timestamps(&self) -> IndexingFuture<'_> {
        Box::pin(async move { self.reset_markers() })
    }

    fn generate_network_hashrate_history(&self) -> IndexingFuture<'_> {
        Box::pin(self.index_network_hashrate())
    }

    fn generate_pool_hashrate_history(&self) -> IndexingFuture<'_> {
        Box::pin(async move { self.index_pool_hashrate() })
    }

    fn save_pending_block_rates(&self) -> IndexingFuture<'_> {
        Box::pin(async move { self.save_rates() })
    }
}
