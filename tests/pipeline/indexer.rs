use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, test_client},
    mock_node::{block_time, MockNode, MockNodeServer, POOL_TAGS},
};
use anyhow::Result;
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use protomempool::node::index::{
    period_start, DAY_SECS, NETWORK_HASHRATE_MARKER, POOL_HASHRATE_MARKER, WEEK_SECS,
};
use protomempool::sync::UpdateScheduler;
use protomempool::{
    EventHub, HistoryStore, IndexerJob, IndexerRun, IndexerRunState, IndexingStep, LiveSync,
    NodeIndexer, NodeLiveSync, PriorityFlag, PriorityReader, RetryTimer, Telemetry,
};

/// Three full days plus a partial fourth.
const CHAIN_LENGTH: u64 = 3 * 144 + 10;

struct Harness {
    node: MockNode,
    server: MockNodeServer,
    store: Arc<HistoryStore>,
    indexer: Arc<NodeIndexer>,
}

async fn harness(length: u64) -> Result<Harness> {
    init_tracing();
    let node = MockNode::new(length);
    let server = MockNodeServer::start(node.clone()).await?;
    let store = Arc::new(HistoryStore::new());
    let indexer = Arc::new(NodeIndexer::new(
        test_client(server.url()),
        store.clone(),
        1008,
    ));
    Ok(Harness {
        node,
        server,
        store,
        indexer,
    })
}

fn job(indexer: Arc<NodeIndexer>, priority: PriorityReader) -> IndexerJob<NodeIndexer> {
    IndexerJob::new(indexer, priority, true, Arc::new(Telemetry::default()))
}

#[tokio::test]
async fn full_pass_builds_history() -> Result<()> {
    let h = harness(CHAIN_LENGTH).await?;
    let job = job(h.indexer.clone(), PriorityFlag::new().reader());

    let early = h.node.hash_at(5).expect("block 5");
    let unknown = BlockHash::from_byte_array([7; 32]);
    h.store.queue_block_rate(early, "USD", 36_500.0);
    h.store.queue_block_rate(unknown, "USD", 1.0);

    assert_eq!(job.run().await, IndexerRun::Completed);
    assert_eq!(
        job.state(),
        IndexerRunState {
            run_requested: false,
            running: false
        }
    );

    let blocks = h.store.indexed_blocks();
    assert_eq!(blocks.len() as u64, CHAIN_LENGTH);
    for block in &blocks {
        assert_eq!(Some(block.hash), h.node.hash_at(block.height));
    }

    let tip_time = u64::from(block_time(CHAIN_LENGTH - 1));
    let hashrates = h.store.network_hashrates();
    let days: Vec<u64> = hashrates.keys().copied().collect();
    let genesis_day = period_start(u64::from(block_time(0)), DAY_SECS);
    assert_eq!(
        days,
        vec![genesis_day, genesis_day + DAY_SECS, genesis_day + 2 * DAY_SECS]
    );
    assert_eq!(hashrates[&genesis_day], 1.0e18 + 143.0);
    assert_eq!(h.node.calls("getnetworkhashps"), 3);
    assert_eq!(h.store.latest_run(NETWORK_HASHRATE_MARKER), Some(tip_time));

    let weeks = h.store.pool_share_weeks();
    assert_eq!(weeks, vec![period_start(u64::from(block_time(0)), WEEK_SECS)]);
    let shares = h.store.pool_shares(weeks[0]).expect("shares");
    for tag in POOL_TAGS {
        assert!((shares[tag] - 1.0 / 3.0).abs() < 1e-9, "{tag}: {}", shares[tag]);
    }
    assert_eq!(h.store.latest_run(POOL_HASHRATE_MARKER), Some(tip_time));

    assert_eq!(h.store.block_rates(&early).expect("saved")["USD"], 36_500.0);
    assert_eq!(h.store.pending_block_rates().len(), 1);

    assert_eq!(job.run().await, IndexerRun::NotRequested);

    h.server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn live_sync_priority_defers_indexing() -> Result<()> {
    let h = harness(30).await?;
    let live = Arc::new(NodeLiveSync::new(
        test_client(h.server.url()),
        Arc::new(EventHub::new()),
        5,
    ));
    let job = job(h.indexer.clone(), live.priority());

    assert_eq!(job.run().await, IndexerRun::Deferred);
    assert!(job.state().run_requested);
    assert!(h.store.indexed_blocks().is_empty());
    assert_eq!(h.node.calls("getblockcount"), 0);

    let mut scheduler = UpdateScheduler::new(
        live,
        Duration::from_millis(50),
        RetryTimer::default(),
        Arc::new(Telemetry::default()),
    );
    scheduler.tick().await;

    assert_eq!(job.run().await, IndexerRun::Completed);
    assert_eq!(h.store.indexed_blocks().len(), 30);

    h.server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn node_failure_rearms_the_job() -> Result<()> {
    let h = harness(30).await?;
    let job = job(h.indexer.clone(), PriorityFlag::new().reader());

    h.node.set_offline(true);
    assert_eq!(job.run().await, IndexerRun::Failed(IndexingStep::BlockDatabase));
    assert_eq!(
        job.state(),
        IndexerRunState {
            run_requested: true,
            running: false
        }
    );

    h.node.set_offline(false);
    assert_eq!(job.run().await, IndexerRun::Completed);
    assert!(!job.state().run_requested);

    h.server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn reindex_after_reorganisation_repairs_blocks() -> Result<()> {
    let h = harness(40).await?;
    let job = job(h.indexer.clone(), PriorityFlag::new().reader());
    assert_eq!(job.run().await, IndexerRun::Completed);

    h.node.force_reorg(30, 12)?;
    assert_eq!(job.run().await, IndexerRun::NotRequested);

    job.reindex();
    let fetched_before = h.node.calls("getblock");
    assert_eq!(job.run().await, IndexerRun::Completed);
    assert_eq!(
        h.node.calls("getblock") - fetched_before,
        12,
        "only the replaced suffix is fetched"
    );

    let blocks = h.store.indexed_blocks();
    assert_eq!(blocks.len(), 43);
    for block in &blocks {
        assert_eq!(Some(block.hash), h.node.hash_at(block.height));
    }

    h.server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn depth_limits_indexed_window() -> Result<()> {
    init_tracing();
    let node = MockNode::new(50);
    let server = MockNodeServer::start(node.clone()).await?;
    let store = Arc::new(HistoryStore::new());
    let indexer = Arc::new(NodeIndexer::new(test_client(server.url()), store.clone(), 10));
    let job = job(indexer, PriorityFlag::new().reader());

    assert_eq!(job.run().await, IndexerRun::Completed);
    let heights: Vec<u64> = store.indexed_blocks().iter().map(|b| b.height).collect();
    assert_eq!(heights, (40..50).collect::<Vec<_>>());

    node.mine(3);
    job.reindex();
    assert_eq!(job.run().await, IndexerRun::Completed);
    let heights: Vec<u64> = store.indexed_blocks().iter().map(|b| b.height).collect();
    assert_eq!(heights, (43..53).collect::<Vec<_>>());

    server.shutdown().await;
    Ok(())
}
