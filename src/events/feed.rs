use crate::events::hub::EventHub;
use crate::events::payload::{EventKind, HubEvent};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Delivery side of the hub: forwards every event kind into a broadcast channel
/// and remembers the latest value of each init property so that late subscribers
/// can be brought up to date.
#[derive(Clone)]
pub struct LiveFeed {
    sender: broadcast::Sender<HubEvent>,
    init_properties: Arc<Mutex<BTreeMap<String, serde_json::Value>>>,
}

impl LiveFeed {
    /// Registers the feed as the handler of every event kind on `hub`.
    pub fn attach(hub: &EventHub, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let feed = Self {
            sender,
            init_properties: Arc::default(),
        };

        for kind in EventKind::ALL {
            let feed = feed.clone();
            hub.register(kind, move |event| feed.deliver(event));
        }

        feed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn init_properties(&self) -> BTreeMap<String, serde_json::Value> {
        self.init_properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn deliver(&self, event: &HubEvent) {
        if let HubEvent::InitProperty(property) = event {
            self.init_properties
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(property.name.clone(), property.value.clone());
        }

        // A send error only means nobody is connected right now.
        if self.sender.send(event.clone()).is_err() {
            tracing::trace!(kind = event.kind().as_str(), "no live subscribers");
        }
    }
}
