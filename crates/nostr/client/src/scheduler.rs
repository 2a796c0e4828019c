//! Pending-relay queue.
//!
//! Relays waiting for a connection slot sit in one FIFO per priority. Workers
//! always take from the highest non-empty priority, so a lower tier is only
//! reached once every relay above it is live or cooling down.
//!
//! A popped relay is held by its worker (connecting, live, or waiting out the
//! requeue delay) until [`RelayQueue::requeue`] or [`RelayQueue::release`].
//! While held, [`RelayQueue::push`] ignores it, so one relay never has two
//! connections.

use nostr_store::RelayId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Buckets {
    by_priority: BTreeMap<i64, VecDeque<RelayId>>,
    queued: HashSet<RelayId>,
    held: HashSet<RelayId>,
}

impl Buckets {
    fn insert(&mut self, relay_id: RelayId, priority: i64) -> bool {
        if !self.queued.insert(relay_id) {
            return false;
        }
        self.by_priority
            .entry(priority)
            .or_default()
            .push_back(relay_id);
        true
    }
}

#[derive(Default)]
pub struct RelayQueue {
    buckets: Mutex<Buckets>,
    notify: Notify,
}

impl RelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an idle relay at the back of its priority tier. A relay that
    /// is already waiting or held by a worker is left alone; returns whether
    /// it was added.
    pub fn push(&self, relay_id: RelayId, priority: i64) -> bool {
        {
            let mut buckets = self.buckets.lock();
            if buckets.held.contains(&relay_id) || !buckets.insert(relay_id, priority) {
                return false;
            }
        }
        self.notify.notify_one();
        true
    }

    /// Hand a held relay back to the queue.
    pub fn requeue(&self, relay_id: RelayId, priority: i64) -> bool {
        {
            let mut buckets = self.buckets.lock();
            buckets.held.remove(&relay_id);
            if !buckets.insert(relay_id, priority) {
                return false;
            }
        }
        self.notify.notify_one();
        true
    }

    /// Drop a held relay out of rotation entirely.
    pub fn release(&self, relay_id: RelayId) {
        self.buckets.lock().held.remove(&relay_id);
    }

    pub fn try_pop(&self) -> Option<RelayId> {
        let mut buckets = self.buckets.lock();
        let mut entry = buckets.by_priority.last_entry()?;
        let relay_id = entry.get_mut().pop_front();
        if entry.get().is_empty() {
            entry.remove();
        }
        if let Some(id) = relay_id {
            buckets.queued.remove(&id);
            buckets.held.insert(id);
        }
        relay_id
    }

    /// Wait for the next relay and hold it. Returns `None` once `cancel`
    /// fires, even if relays are waiting.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<RelayId> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await is not missed.
            notified.as_mut().enable();

            if let Some(id) = self.try_pop() {
                return Some(id);
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Drop a relay from whichever tier holds it.
    pub fn remove(&self, relay_id: RelayId) -> bool {
        let mut buckets = self.buckets.lock();
        if !buckets.queued.remove(&relay_id) {
            return false;
        }
        buckets.by_priority.retain(|_, queue| {
            queue.retain(|id| *id != relay_id);
            !queue.is_empty()
        });
        true
    }

    pub fn contains(&self, relay_id: RelayId) -> bool {
        self.buckets.lock().queued.contains(&relay_id)
    }

    /// Whether a worker currently holds the relay.
    pub fn is_held(&self, relay_id: RelayId) -> bool {
        self.buckets.lock().held.contains(&relay_id)
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_highest_priority_first_then_fifo() {
        let queue = RelayQueue::new();
        queue.push(1, 5);
        queue.push(2, 10);
        queue.push(3, 5);
        queue.push(4, 10);

        let order: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_is_deduplicated() {
        let queue = RelayQueue::new();
        assert!(queue.push(1, 5));
        assert!(!queue.push(1, 7));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.try_pop(), Some(1));
        queue.release(1);
        assert!(queue.push(1, 7));
    }

    #[test]
    fn test_held_relay_ignores_push_until_requeued() {
        let queue = RelayQueue::new();
        queue.push(1, 5);
        assert_eq!(queue.try_pop(), Some(1));
        assert!(queue.is_held(1));

        assert!(!queue.push(1, 5));
        assert!(queue.is_empty());

        assert!(queue.requeue(1, 5));
        assert!(!queue.is_held(1));
        assert_eq!(queue.try_pop(), Some(1));

        queue.release(1);
        assert!(!queue.is_held(1));
        assert!(queue.push(1, 5));
    }

    #[test]
    fn test_remove() {
        let queue = RelayQueue::new();
        queue.push(1, 5);
        queue.push(2, 5);
        assert!(queue.remove(1));
        assert!(!queue.remove(1));
        assert!(!queue.contains(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(RelayQueue::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(&cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        queue.push(9, 0);
        assert_eq!(waiter.await.unwrap(), Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_returns_none_on_cancel() {
        let queue = Arc::new(RelayQueue::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pop_after_cancel_leaves_queue_intact() {
        let queue = RelayQueue::new();
        let cancel = CancellationToken::new();
        queue.push(3, 1);
        cancel.cancel();
        assert_eq!(queue.pop(&cancel).await, None);
        assert!(queue.contains(3));
    }
}
