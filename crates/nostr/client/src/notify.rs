//! What the pool tells the application.

use nostr::Event;
use nostr_store::{Change, RelayId};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A new event arrived for a subscription filter.
    NewEvent {
        filter_id: Uuid,
        relay_id: RelayId,
        event: Event,
    },
    /// A relay finished sending stored events for a filter.
    Eose { filter_id: Uuid, relay_id: RelayId },
    /// The pool dropped a filter on its own (lifecycle rule fired).
    FilterRemoved { filter_id: Uuid },
    /// Reconciliation changed derived state.
    Change(Change),
    /// A relay answered a published event.
    Published {
        event_id: String,
        relay_id: RelayId,
        accepted: bool,
        message: String,
    },
    RelayConnected { relay_id: RelayId, uri: String },
    RelayDisconnected { relay_id: RelayId, uri: String },
    RateLimited { relay_id: RelayId },
}

/// Broadcast sink. Sending never blocks and never fails; with no receivers the
/// notification is simply dropped.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            trace!("notification dropped, no receivers");
        }
    }

    pub fn send_changes(&self, changes: impl IntoIterator<Item = Change>) {
        for change in changes {
            self.send(Notification::Change(change));
        }
    }
}
