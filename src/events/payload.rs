use bitcoin::{BlockHash, Txid};
use serde::Serialize;

/// Event kinds that can carry a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    NewBlock,
    MempoolChanged,
    NewStatistic,
    DonationStatus,
    LoadingProgress,
    InitProperty,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::NewBlock,
        EventKind::MempoolChanged,
        EventKind::NewStatistic,
        EventKind::DonationStatus,
        EventKind::LoadingProgress,
        EventKind::InitProperty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewBlock => "new-block",
            EventKind::MempoolChanged => "mempool-changed",
            EventKind::NewStatistic => "new-statistic",
            EventKind::DonationStatus => "donation-status",
            EventKind::LoadingProgress => "loading-progress",
            EventKind::InitProperty => "init-property",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    pub height: u64,
    pub hash: BlockHash,
    pub previous_hash: BlockHash,
    pub time: u32,
    pub bits: u32,
    pub tx_count: usize,
    /// Coinbase tag of the miner, when one could be extracted.
    pub pool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MempoolChange {
    pub added: Vec<Txid>,
    pub removed: Vec<Txid>,
    pub count: usize,
}

impl MempoolChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticEntry {
    pub added: u64,
    pub tx_count: usize,
    pub vbytes_per_second: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DonationStatus {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadingProgress {
    pub indicator: String,
    /// Percentage in `0..=100`.
    pub progress: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitProperty {
    pub name: String,
    pub value: serde_json::Value,
}

/// Payload published through the [`EventHub`](crate::events::EventHub).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum HubEvent {
    NewBlock(BlockSummary),
    MempoolChanged(MempoolChange),
    NewStatistic(StatisticEntry),
    DonationStatus(DonationStatus),
    LoadingProgress(LoadingProgress),
    InitProperty(InitProperty),
}

impl HubEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HubEvent::NewBlock(_) => EventKind::NewBlock,
            HubEvent::MempoolChanged(_) => EventKind::MempoolChanged,
            HubEvent::NewStatistic(_) => EventKind::NewStatistic,
            HubEvent::DonationStatus(_) => EventKind::DonationStatus,
            HubEvent::LoadingProgress(_) => EventKind::LoadingProgress,
            HubEvent::InitProperty(_) => EventKind::InitProperty,
        }
    }

    pub fn init_property(name: impl Into<String>, value: serde_json::Value) -> Self {
        HubEvent::InitProperty(InitProperty {
            name: name.into(),
            value,
        })
    }
}
