pub mod feed;
pub mod hub;
pub mod payload;

pub use feed::{LiveFeed, DEFAULT_FEED_CAPACITY};
pub use hub::{EventHandler, EventHub};
pub use payload::{
    BlockSummary, DonationStatus, EventKind, HubEvent, InitProperty, LoadingProgress,
    MempoolChange, StatisticEntry,
};
