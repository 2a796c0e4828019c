//! Kind-specific reconciliation of stored events into derived state.
//!
//! Every stored event starts with `processed = false`. [`Store::process_event`]
//! dispatches on kind; a handler either finishes (the flag is set) or reports
//! that it is waiting on another event, in which case the flag stays clear and
//! [`Store::process_pending`] tries again later.

mod channel;
mod contacts;
mod deletion;
mod direct_message;
mod metadata;
mod reaction;
mod repost;
mod text_note;

pub use channel::Channel;
pub use direct_message::DmPair;

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::events::StoredEvent;
use crate::session::Session;
use nostr::{
    KIND_CHANNEL_CREATION, KIND_CHANNEL_MESSAGE, KIND_CHANNEL_METADATA, KIND_CONTACTS,
    KIND_ENCRYPTED_DIRECT_MESSAGE, KIND_EVENT_DELETION, KIND_GENERIC_REPOST, KIND_METADATA,
    KIND_REACTION, KIND_REPOST, KIND_SHORT_TEXT_NOTE,
};
use tracing::{debug, warn};

/// Derived state that changed while processing, for the pool to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    MentionsChanged { account: String, count: u64 },
    AccountDetailChanged { pubkey: String },
    ChannelDetailChanged { channel_id: String },
    FollowsChanged { owner: String },
    EventDeleted { event_id: String },
    ReactionRecorded { target_id: String },
    RepostRecorded { target_id: String },
    DmPairChanged { low: String, high: String },
    RelayDiscovered { uri: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Processed,
    /// Waiting for the event with this id to arrive or be processed.
    Pending { waiting_on: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    pub changes: Vec<Change>,
}

impl ProcessOutcome {
    pub(crate) fn done(changes: Vec<Change>) -> Self {
        Self {
            status: ProcessStatus::Processed,
            changes,
        }
    }

    pub(crate) fn pending(waiting_on: impl Into<String>, changes: Vec<Change>) -> Self {
        Self {
            status: ProcessStatus::Pending {
                waiting_on: waiting_on.into(),
            },
            changes,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == ProcessStatus::Processed
    }
}

impl Store {
    /// Reconcile one stored event. Re-running on an already processed event
    /// is a no-op.
    pub fn process_event(&self, session: &Session, event_id: &str) -> Result<ProcessOutcome> {
        let stored = self
            .get_event(event_id)?
            .ok_or_else(|| StoreError::UnknownEvent(event_id.to_string()))?;
        self.process_stored(session, &stored)
    }

    /// Retry up to `limit` unprocessed events. Events still waiting go to
    /// the back of the line, so a full batch of orphans can't starve newer
    /// ones. Individual failures are logged and skipped.
    pub fn process_pending(&self, session: &Session, limit: usize) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for stored in self.unprocessed(limit)? {
            match self.process_stored(session, &stored) {
                Ok(outcome) => changes.extend(outcome.changes),
                Err(e) => warn!(id = %stored.event.id, "processing failed: {}", e),
            }
        }
        Ok(changes)
    }

    fn process_stored(&self, session: &Session, stored: &StoredEvent) -> Result<ProcessOutcome> {
        if stored.processed {
            return Ok(ProcessOutcome::done(Vec::new()));
        }
        if stored.deleted {
            self.mark_processed(&stored.event.id)?;
            return Ok(ProcessOutcome::done(Vec::new()));
        }

        let outcome = match stored.event.kind {
            KIND_METADATA => metadata::apply(self, stored)?,
            KIND_SHORT_TEXT_NOTE | KIND_CHANNEL_MESSAGE => text_note::apply(self, session, stored)?,
            KIND_CONTACTS => contacts::apply(self, stored)?,
            KIND_ENCRYPTED_DIRECT_MESSAGE => direct_message::apply(self, stored)?,
            KIND_EVENT_DELETION => deletion::apply(self, stored)?,
            KIND_REPOST | KIND_GENERIC_REPOST => repost::apply(self, session, stored)?,
            KIND_REACTION => reaction::apply(self, stored)?,
            KIND_CHANNEL_CREATION | KIND_CHANNEL_METADATA => channel::apply(self, stored)?,
            _ => ProcessOutcome::done(Vec::new()),
        };

        match outcome.status {
            ProcessStatus::Processed => self.mark_processed(&stored.event.id)?,
            ProcessStatus::Pending { ref waiting_on } => {
                self.mark_deferred(&stored.event.id)?;
                debug!(id = %stored.event.id, %waiting_on, "processing deferred")
            }
        }
        Ok(outcome)
    }
}
