//! Helpers for raw node data: block decoding, coinbase tag extraction and the
//! basic-auth header used by the client.

use crate::events::payload::BlockSummary;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use bitcoin::{consensus, Block};
use jsonrpsee::http_client::{HeaderMap, HeaderValue};

const MIN_TAG_LEN: usize = 3;

/// Decodes a hexadecimal string into a Bitcoin [`Block`].
pub fn hex_to_block(hex: &str) -> Result<Block> {
    let bytes = hex::decode(hex.trim()).context("invalid block hex")?;
    consensus::deserialize::<Block>(&bytes).context("failed to deserialize block bytes")
}

/// Best-effort miner tag from the coinbase script, e.g. `/ViaBTC/` becomes
/// `ViaBTC`.
pub fn coinbase_tag(block: &Block) -> Option<String> {
    let coinbase = block.txdata.first().filter(|tx| tx.is_coinbase())?;
    let script = coinbase.input.first()?.script_sig.as_bytes();

    let longest = script
        .split(|byte| !(0x20..=0x7e).contains(byte))
        .max_by_key(|run| run.len())
        .filter(|run| run.len() >= MIN_TAG_LEN)?;
    let text = std::str::from_utf8(longest).ok()?.trim();

    let tag = if text.starts_with('/') {
        text.split('/').find(|segment| !segment.trim().is_empty())?.trim()
    } else {
        text
    };
    (!tag.is_empty()).then(|| tag.to_string())
}

pub fn summarize_block(height: u64, block: &Block) -> BlockSummary {
    BlockSummary {
        height,
        hash: block.block_hash(),
        previous_hash: block.header.prev_blockhash,
        time: block.header.time,
        bits: block.header.bits.to_consensus(),
        tx_count: block.txdata.len(),
        pool: coinbase_tag(block),
    }
}

pub(crate) fn build_auth_headers(user: &str, password: &str) -> Result<HeaderMap> {
    let encoded = BASE64_STANDARD.encode(format!("{user}:{password}"));
    let value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .context("failed to build Authorization header")?;

    let mut headers = HeaderMap::new();
    headers.insert("Authorization", value);
    Ok(headers)
}
