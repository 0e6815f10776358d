use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use anyhow::{anyhow, bail, Context, Result};
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::transaction::Version;
use bitcoin::{
    absolute, consensus, Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxMerkleNode, TxOut, Txid, Witness,
};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Timestamp of block 0; aligned to a UTC day boundary.
pub const GENESIS_TIME: u32 = 1_699_920_000;
pub const BLOCK_SPACING: u32 = 600;
pub const POOL_TAGS: [&str; 3] = ["Alpha", "Beta", "Gamma"];

#[derive(Clone)]
struct BlockData {
    height: u64,
    hash: BlockHash,
    hex: String,
}

#[derive(Default)]
struct ChainState {
    by_height: HashMap<u64, BlockData>,
    by_hash: HashMap<BlockHash, BlockData>,
    tip: u64,
    mempool: Vec<Txid>,
    calls: HashMap<String, usize>,
}

/// Scriptable stand-in for a Bitcoin Core node.
#[derive(Clone)]
pub struct MockNode {
    state: Arc<RwLock<ChainState>>,
    offline: Arc<AtomicBool>,
    ibd: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
}

impl MockNode {
    /// A chain of `length` blocks, tip at `length - 1`.
    pub fn new(length: u64) -> Self {
        let node = Self {
            state: Arc::new(RwLock::new(ChainState::default())),
            offline: Arc::new(AtomicBool::new(false)),
            ibd: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
        };
        {
            let mut state = node.state.write().expect("mock node poisoned");
            let mut previous = BlockHash::all_zeros();
            for height in 0..length.max(1) {
                previous = insert_block(&mut state, height, previous, 0);
            }
            state.tip = length.max(1) - 1;
        }
        node
    }

    pub fn tip(&self) -> u64 {
        self.state.read().expect("mock node poisoned").tip
    }

    pub fn hash_at(&self, height: u64) -> Option<BlockHash> {
        let state = self.state.read().expect("mock node poisoned");
        state.by_height.get(&height).map(|data| data.hash)
    }

    pub fn calls(&self, method: &str) -> usize {
        let state = self.state.read().expect("mock node poisoned");
        state.calls.get(method).copied().unwrap_or_default()
    }

    /// Every call fails with a JSON-RPC error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_initial_block_download(&self, ibd: bool) {
        self.ibd.store(ibd, Ordering::SeqCst);
    }

    pub fn set_mempool(&self, txids: Vec<Txid>) {
        self.state.write().expect("mock node poisoned").mempool = txids;
    }

    /// Mines `count` blocks on top of the current tip.
    pub fn mine(&self, count: u64) -> u64 {
        let salt = self.epoch.load(Ordering::SeqCst);
        let mut state = self.state.write().expect("mock node poisoned");
        let mut previous = state.by_height[&state.tip].hash;
        for _ in 0..count {
            let height = state.tip + 1;
            previous = insert_block(&mut state, height, previous, salt);
            state.tip = height;
        }
        state.tip
    }

    /// Replaces every block above `fork_height` with `new_suffix_len` new blocks.
    pub fn force_reorg(&self, fork_height: u64, new_suffix_len: u64) -> Result<()> {
        if new_suffix_len == 0 {
            bail!("new_suffix_len must be greater than zero");
        }

        let salt = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().expect("mock node poisoned");
        let mut previous = state
            .by_height
            .get(&fork_height)
            .map(|data| data.hash)
            .ok_or_else(|| anyhow!("cannot reorg: missing fork height {fork_height}"))?;

        let stale: Vec<u64> = state
            .by_height
            .keys()
            .copied()
            .filter(|height| *height > fork_height)
            .collect();
        for height in stale {
            if let Some(old) = state.by_height.remove(&height) {
                state.by_hash.remove(&old.hash);
            }
        }

        for offset in 1..=new_suffix_len {
            previous = insert_block(&mut state, fork_height + offset, previous, salt);
        }
        state.tip = fork_height + new_suffix_len;
        Ok(())
    }
}

pub fn block_time(height: u64) -> u32 {
    GENESIS_TIME + height as u32 * BLOCK_SPACING
}

pub fn pool_for_height(height: u64) -> &'static str {
    POOL_TAGS[(height % POOL_TAGS.len() as u64) as usize]
}

fn insert_block(state: &mut ChainState, height: u64, previous: BlockHash, salt: u64) -> BlockHash {
    let block = build_block(height, previous, salt);
    let data = BlockData {
        height,
        hash: block.block_hash(),
        hex: hex::encode(consensus::serialize(&block)),
    };
    state.by_hash.insert(data.hash, data.clone());
    state.by_height.insert(height, data.clone());
    data.hash
}

fn build_block(height: u64, previous: BlockHash, salt: u64) -> Block {
    let tag = format!("/{}/", pool_for_height(height));
    let script_sig = Builder::new()
        .push_int(height as i64)
        .push_slice(PushBytesBuf::try_from(tag.into_bytes()).expect("short tag"))
        .push_int(salt as i64)
        .into_script();
    let coinbase = Transaction {
        version: Version::ONE,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig,
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(50_0000_0000),
            script_pubkey: ScriptBuf::new(),
        }],
    };

    Block {
        header: Header {
            version: BlockVersion::ONE,
            prev_blockhash: previous,
            merkle_root: TxMerkleNode::from_raw_hash(coinbase.compute_txid().to_raw_hash()),
            time: block_time(height),
            bits: CompactTarget::from_consensus(0x207f_ffff),
            nonce: salt as u32,
        },
        txdata: vec![coinbase],
    }
}

pub struct MockNodeServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockNodeServer {
    pub async fn start(node: MockNode) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock node listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let make_service = make_service_fn(move |_| {
            let node = node.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(node.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
        let handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                eprintln!("mock node stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{addr}"),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(node: MockNode, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let payload: Option<Value> = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => serde_json::from_slice(&bytes).ok(),
        Err(_) => None,
    };
    let Some(payload) = payload else {
        let mut response = Response::new(Body::from("invalid JSON payload"));
        *response.status_mut() = StatusCode::BAD_REQUEST;
        return Ok(response);
    };

    let response_value = match payload {
        Value::Array(calls) => Value::Array(calls.into_iter().map(|call| handle_call(&node, call)).collect()),
        call => handle_call(&node, call),
    };

    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(node: &MockNode, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut state = node.state.write().expect("mock node poisoned");
    *state.calls.entry(method.clone()).or_default() += 1;

    if node.offline.load(Ordering::SeqCst) {
        return error(id, -28, "Loading block index...");
    }

    match method.as_str() {
        "getblockchaininfo" => {
            let ibd = node.ibd.load(Ordering::SeqCst);
            success(
                id,
                json!({
                    "chain": "regtest",
                    "blocks": state.tip,
                    "headers": state.tip,
                    "bestblockhash": state.by_height[&state.tip].hash.to_string(),
                    "verificationprogress": if ibd { 0.5 } else { 1.0 },
                    "initialblockdownload": ibd,
                }),
            )
        }
        "getblockcount" => success(id, json!(state.tip)),
        "getblockhash" => {
            let height = params.first().and_then(Value::as_u64);
            match height
                .filter(|height| *height <= state.tip)
                .and_then(|height| state.by_height.get(&height))
            {
                Some(data) => success(id, json!(data.hash.to_string())),
                None => error(id, -8, "Block height out of range"),
            }
        }
        "getblock" => {
            let hash = params
                .first()
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse::<BlockHash>().ok());
            match hash.and_then(|hash| state.by_hash.get(&hash)) {
                Some(data) if data.height <= state.tip => success(id, json!(data.hex)),
                _ => error(id, -5, "Block not found"),
            }
        }
        "getrawmempool" => {
            let txids: Vec<String> = state.mempool.iter().map(Txid::to_string).collect();
            success(id, json!(txids))
        }
        "getnetworkhashps" => {
            let height = params.get(1).and_then(Value::as_i64).unwrap_or(-1);
            success(id, json!(1.0e18 + height as f64))
        }
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
