//! Update notifier (C9): tells connected clients what changed after an incremental
//! rebuild.
//!
//! Modeled as a plain subscriber list rather than a global singleton or a hardwired
//! WebSocket server, per the design note that the core engine should stay transport- and
//! runtime-agnostic — a caller with an async runtime (the CLI's `dev` command) bridges
//! [`UpdateMessage`] onto whatever wire protocol it serves (see `heddle-cli`'s `dev`
//! command for the axum/WebSocket bridge).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::asset::AssetId;

/// One asset's entry in an `update` message (§6): its generated output per bundle type and
/// its resolved dependency edges, enough for a client runtime to hot-swap the module
/// without a full page reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatedAsset {
    pub id: AssetId,
    pub generated: BTreeMap<String, String>,
    pub deps: BTreeMap<String, AssetId>,
}

/// One notification pushed to subscribers after a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UpdateMessage {
    /// Assets changed but the update was applied without a full reload.
    Update { assets: Vec<UpdatedAsset> },
    /// The client should reload; emitted when a change can't be applied incrementally.
    Reload,
    /// A rebuild failed.
    Error { message: String },
}

type Subscriber = Box<dyn Fn(&UpdateMessage) + Send + Sync>;

/// Bounded subscriber list: each `publish` call invokes every live subscriber in order.
/// Subscribers are plain closures rather than channels so both a channel-backed bridge
/// and an in-process test hook can subscribe without core depending on either.
#[derive(Default)]
pub struct UpdateNotifier {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
}

impl UpdateNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and returns a handle; dropping the handle does not
    /// unsubscribe — callers that need that should filter `subscribe`'s closure.
    pub fn subscribe(&self, callback: impl Fn(&UpdateMessage) + Send + Sync + 'static) {
        self.subscribers.lock().unwrap().push(Arc::new(Box::new(callback)));
    }

    pub fn publish(&self, message: &UpdateMessage) {
        for subscriber in self.subscribers.lock().unwrap().iter() {
            subscriber(message);
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn publishes_to_all_subscribers() {
        let notifier = UpdateNotifier::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            notifier.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        notifier.publish(&UpdateMessage::Reload);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn serializes_with_a_type_tag() {
        let msg = UpdateMessage::Update {
            assets: vec![UpdatedAsset {
                id: 0,
                generated: BTreeMap::from([("js".to_string(), "console.log(1)".to_string())]),
                deps: BTreeMap::new(),
            }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"update\""));
        assert!(json.contains("\"assets\""));
    }
}
