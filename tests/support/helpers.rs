use std::time::Duration;

use anyhow::{bail, Result};
use bitcoin::hashes::Hash;
use bitcoin::Txid;
use once_cell::sync::Lazy;
use protomempool::{HubEvent, NodeRpcClient, SyncConfig};
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn txid(byte: u8) -> Txid {
    Txid::from_byte_array([byte; 32])
}

pub fn test_config(url: &str) -> SyncConfig {
    SyncConfig::builder()
        .rpc_url(url)
        .rpc_user("user")
        .rpc_password("pass")
        .rpc_timeout(Duration::from_secs(2))
        .poll_interval(Duration::from_millis(50))
        .indexer_interval(Duration::from_millis(100))
        .initial_blocks(5)
        .build()
        .expect("test config must build")
}

pub fn test_client(url: &str) -> NodeRpcClient {
    NodeRpcClient::from_config(&test_config(url)).expect("test client must build")
}

/// Polls `condition` until it holds or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        if condition() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("condition not met within {limit:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Everything currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<HubEvent>) -> Vec<HubEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
