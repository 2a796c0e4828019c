//! The relay pool: a fixed set of connection workers fed by the priority
//! queue, plus a maintenance loop.
//!
//! Each worker takes the best waiting relay, connects, reconciles the desired
//! subscriptions onto it, resends local events it hasn't acknowledged and then
//! serves its inbound frames until the socket drops. The relay is queued again
//! after `requeue_delay`, from a separate task so the worker is free at once.

use crate::catalog::{Intent, SubscriptionFilter};
use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionConfig, Inbound};
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage};
use crate::notify::{Notification, Notifier};
use crate::rate_limit::{RateLimiter, is_rate_limit_notice};
use crate::reconciler::{Plan, Reconciler, Removed};
use crate::scheduler::RelayQueue;
use dashmap::DashMap;
use nostr::{Event, EventTemplate, unix_now};
use nostr_store::{Change, DetailKind, RelayId, RelayRecord, Session, Store, WriteOutcome};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PENDING_BATCH: usize = 500;
const OUTBOUND_BATCH: usize = 500;
const DETAIL_BATCH: usize = 250;

#[derive(Clone)]
struct LiveRelay {
    connection: Arc<Connection>,
    write: bool,
}

struct Inner {
    config: PoolConfig,
    store: Arc<Store>,
    session: RwLock<Session>,
    queue: RelayQueue,
    reconciler: Reconciler,
    rate_limiter: RateLimiter,
    notifier: Notifier,
    live: DashMap<RelayId, LiveRelay>,
    live_count: AtomicUsize,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    requeues: TaskTracker,
}

/// Handle to the pool. Cloning is cheap and every clone drives the same pool.
#[derive(Clone)]
pub struct RelayPool {
    inner: Arc<Inner>,
}

impl RelayPool {
    pub fn new(config: PoolConfig, store: Arc<Store>, session: Session) -> Self {
        let notifier = Notifier::new(config.notification_capacity);
        let rate_limiter = RateLimiter::new(config.rate_limit_cooldown());
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                session: RwLock::new(session),
                queue: RelayQueue::new(),
                reconciler: Reconciler::new(),
                rate_limiter,
                notifier,
                live: DashMap::new(),
                live_count: AtomicUsize::new(0),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
                requeues: TaskTracker::new(),
            }),
        }
    }

    /// Open the store named by the config and build a pool on it.
    pub fn open(config: PoolConfig, session: Session) -> Result<Self> {
        let store = Store::open(config.database_config()?)?;
        Ok(Self::new(config, Arc::new(store), session))
    }

    /// Seed default relays if none are known, queue every relay and spawn the
    /// workers and the maintenance loop. Calling it twice does nothing.
    pub fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let defaults: Vec<(String, i64)> = self
            .inner
            .config
            .default_relays
            .iter()
            .map(|r| (r.uri.clone(), r.priority))
            .collect();
        self.inner.store.seed_default_relays(&defaults)?;
        for relay in self.inner.store.list_relays()? {
            self.inner.queue.push(relay.id, relay.priority);
        }

        let workers = self.inner.config.worker_count();
        info!(workers, queued = self.inner.queue.len(), "starting relay pool");

        let mut tasks = self.inner.tasks.lock();
        for worker_id in 0..workers {
            tasks.push(tokio::spawn(worker(Arc::clone(&self.inner), worker_id)));
        }
        tasks.push(tokio::spawn(maintenance(Arc::clone(&self.inner))));
        Ok(())
    }

    /// Stop every worker and the maintenance loop and wait for them. Relays
    /// that were live or waiting out their delay are back in the queue when
    /// this returns.
    pub async fn shutdown(&self) {
        info!("shutting down relay pool");
        self.inner.cancel.cancel();
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.inner.requeues.close();
        self.inner.requeues.wait().await;
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn session(&self) -> Session {
        self.inner.session.read().clone()
    }

    /// Switch the account the pool processes and publishes for.
    pub fn set_session(&self, session: Session) {
        *self.inner.session.write() = session;
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifier.subscribe()
    }

    /// Number of relays with an open connection.
    pub fn live_connections(&self) -> usize {
        self.inner.live_count.load(Ordering::SeqCst)
    }

    pub fn connected_relays(&self) -> Vec<RelayId> {
        let mut ids: Vec<_> = self.inner.live.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_rate_limited(&self, relay_id: RelayId) -> bool {
        self.inner.rate_limiter.is_cooling(relay_id)
    }

    /// Persist a relay (updating its priority if already known) and queue it.
    /// A relay that is connecting, live or waiting out its requeue delay keeps
    /// its place and picks up the new priority when it is next queued.
    pub fn add_relay(&self, uri: &str, priority: i64) -> Result<RelayRecord> {
        let record = self.inner.store.upsert_relay(uri, priority)?;
        self.inner.schedule(&record);
        info!(relay = %record.uri, priority, "relay added");
        Ok(record)
    }

    /// Delete a relay and drop it from rotation, closing its connection.
    pub async fn remove_relay(&self, relay_id: RelayId) -> Result<bool> {
        let removed = self.inner.store.delete_relay(relay_id)?;
        self.inner.queue.remove(relay_id);
        if let Some(live) = self.inner.live.get(&relay_id).map(|l| l.value().clone()) {
            live.connection.close().await;
        }
        Ok(removed)
    }

    /// Change a relay's priority. A waiting relay moves to its new tier.
    pub fn set_priority(&self, relay_id: RelayId, priority: i64) -> Result<()> {
        self.inner.store.set_priority(relay_id, priority)?;
        if self.inner.queue.remove(relay_id) {
            self.inner.queue.push(relay_id, priority);
        }
        Ok(())
    }

    /// Update a relay's flags. Takes effect on a live connection for later
    /// subscriptions and sends.
    pub fn set_relay_flags(&self, relay_id: RelayId, read: bool, write: bool, is_paid: bool) -> Result<()> {
        self.inner.store.set_relay_flags(relay_id, read, write, is_paid)?;
        self.inner.reconciler.set_read(relay_id, read);
        if let Some(mut live) = self.inner.live.get_mut(&relay_id) {
            live.write = write;
        }
        Ok(())
    }

    /// Add a filter to the desired set and subscribe it on every live relay.
    pub async fn add_filter(&self, filter: SubscriptionFilter) -> Uuid {
        let id = filter.id;
        if self.inner.reconciler.add_filter(filter) {
            debug!(filter_id = %id, "filter added");
            self.inner.reconcile_all().await;
        }
        id
    }

    /// Shorthand for adding a filter built from an intent with its defaults.
    pub async fn subscribe(&self, intent: Intent) -> Uuid {
        self.add_filter(SubscriptionFilter::new(intent)).await
    }

    /// Drop a filter and close its subscriptions. Returns false if it was not
    /// desired.
    pub async fn remove_filter(&self, filter_id: Uuid) -> bool {
        match self.inner.reconciler.remove_filter(filter_id) {
            Some(removed) => {
                self.inner.send_closes(&removed.closes).await;
                true
            }
            None => false,
        }
    }

    pub fn desired_filters(&self) -> Vec<Arc<SubscriptionFilter>> {
        self.inner.reconciler.desired()
    }

    /// Sign with the session's signer, store as a local event awaiting its
    /// echo, reconcile it and send it to every live write-enabled relay.
    /// Relays that are offline get it when they next connect.
    pub async fn publish(&self, template: EventTemplate) -> Result<Event> {
        let session = self.session();
        let signer = session.signer.clone().ok_or_else(|| {
            ClientError::Misuse("publishing requires a session with a signer".to_string())
        })?;
        let event = signer.sign(&template)?;

        let outcome = self.inner.store.store_local(&event)?;
        if outcome == WriteOutcome::Stored {
            let processed = self.inner.store.process_event(&session, &event.id)?;
            self.inner.apply_changes(processed.changes);
        }

        let sent = self.inner.broadcast(&event).await;
        info!(id = %event.id, kind = event.kind, relays = sent, "published event");
        Ok(event)
    }

    /// Publish a deletion request for events the session account authored.
    pub async fn delete(&self, event_ids: &[String], reason: &str) -> Result<Event> {
        let template = self
            .inner
            .store
            .deletion_for(&self.session(), event_ids, reason)?;
        self.publish(template).await
    }

    /// Run one maintenance pass now instead of waiting for the interval.
    pub async fn run_maintenance(&self) {
        self.inner.maintenance_pass().await;
    }
}

impl Inner {
    fn session(&self) -> Session {
        self.session.read().clone()
    }

    /// Queue an idle relay, or move a waiting one to its current tier.
    fn schedule(&self, relay: &RelayRecord) {
        self.queue.remove(relay.id);
        self.queue.push(relay.id, relay.priority);
    }

    /// Hand a held relay back to the queue at its current priority, or let
    /// it go if it was deleted.
    fn requeue(&self, relay_id: RelayId, fallback_priority: i64) {
        match self.store.get_relay(relay_id) {
            Ok(Some(relay)) => {
                self.queue.requeue(relay.id, relay.priority);
            }
            Ok(None) => {
                debug!(relay_id, "relay deleted, leaving rotation");
                self.queue.release(relay_id);
            }
            Err(e) => {
                warn!(relay_id, "failed to look up relay for requeue: {}", e);
                self.queue.requeue(relay_id, fallback_priority);
            }
        }
    }

    /// Queue a held relay again after the configured delay. Shutdown cuts the
    /// delay short so the relay stays in rotation.
    fn requeue_later(self: &Arc<Self>, relay_id: RelayId, fallback_priority: i64) {
        let inner = Arc::clone(self);
        self.requeues.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(inner.config.requeue_delay()) => {}
                _ = inner.cancel.cancelled() => {}
            }
            inner.requeue(relay_id, fallback_priority);
        });
    }

    /// Broadcast processing changes, first queueing any relay they discovered.
    fn apply_changes(&self, changes: Vec<Change>) {
        for change in &changes {
            let Change::RelayDiscovered { uri } = change else {
                continue;
            };
            match self.store.relay_by_uri(uri) {
                Ok(Some(relay)) => {
                    if self.queue.push(relay.id, relay.priority) {
                        debug!(relay = %relay.uri, "queued discovered relay");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(relay = %uri, "failed to look up discovered relay: {}", e),
            }
        }
        self.notifier.send_changes(changes);
    }

    async fn run_relay(self: &Arc<Self>, relay: &RelayRecord) {
        let connection = match Connection::new(
            relay.id,
            &relay.uri,
            ConnectionConfig {
                connect_timeout: self.config.connect_timeout(),
            },
        ) {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                warn!(relay = %relay.uri, "invalid relay: {}", e);
                return;
            }
        };

        let connected = tokio::select! {
            result = connection.connect() => result,
            _ = self.cancel.cancelled() => return,
        };
        if let Err(e) = connected {
            debug!(relay = %relay.uri, "connect failed: {}", e);
            return;
        }

        self.live_count.fetch_add(1, Ordering::SeqCst);
        self.live.insert(
            relay.id,
            LiveRelay {
                connection: Arc::clone(&connection),
                write: relay.write,
            },
        );
        self.reconciler.attach(relay.id, relay.read);
        self.notifier.send(Notification::RelayConnected {
            relay_id: relay.id,
            uri: relay.uri.clone(),
        });

        let mut healthy = self.reconcile_relay(relay.id, &connection).await;
        if healthy && relay.write {
            healthy = self.resend_outbound(relay.id, &connection).await;
        }

        while healthy {
            let inbound = tokio::select! {
                _ = self.cancel.cancelled() => break,
                inbound = connection.recv() => inbound,
            };
            match inbound {
                Some(Inbound::Message(message)) => {
                    healthy = self.handle_message(relay, &connection, message).await;
                }
                Some(Inbound::Closed(reason)) => {
                    debug!(relay = %relay.uri, reason = ?reason, "connection closed");
                    break;
                }
                None => break,
            }
        }

        self.live.remove(&relay.id);
        self.reconciler.detach(relay.id);
        self.rate_limiter.clear(relay.id);
        connection.close().await;
        self.live_count.fetch_sub(1, Ordering::SeqCst);
        info!(relay = %relay.uri, "disconnected");
        self.notifier.send(Notification::RelayDisconnected {
            relay_id: relay.id,
            uri: relay.uri.clone(),
        });
    }

    /// Bring one relay's subscriptions in line with the desired set. Returns
    /// false if a send failed.
    async fn reconcile_relay(&self, relay_id: RelayId, connection: &Connection) -> bool {
        let cooling = self.rate_limiter.is_cooling(relay_id);
        if cooling {
            debug!(relay_id, "cooling down, no new subscriptions");
        }
        let store = &self.store;
        let plan = self.reconciler.plan(relay_id, !cooling, |params_id| {
            store.oldest_seen(params_id, relay_id).ok().flatten()
        });
        send_plan(connection, plan).await
    }

    async fn reconcile_all(&self) {
        for relay_id in self.reconciler.attached() {
            let Some(live) = self.live.get(&relay_id).map(|l| l.value().clone()) else {
                continue;
            };
            if !self.reconcile_relay(relay_id, &live.connection).await {
                live.connection.close().await;
            }
        }
    }

    async fn resend_outbound(&self, relay_id: RelayId, connection: &Connection) -> bool {
        let pending = match self.store.unseen_local_events(relay_id, OUTBOUND_BATCH) {
            Ok(pending) => pending,
            Err(e) => {
                warn!(relay_id, "failed to load outbound events: {}", e);
                return true;
            }
        };
        if !pending.is_empty() {
            debug!(relay_id, count = pending.len(), "resending local events");
        }
        for stored in pending {
            if !connection.send(&ClientMessage::Event(stored.event)).await {
                return false;
            }
        }
        true
    }

    /// Send to every live write-enabled relay. Returns how many accepted the
    /// frame.
    async fn broadcast(&self, event: &Event) -> usize {
        let targets: Vec<LiveRelay> = self
            .live
            .iter()
            .filter(|l| l.write)
            .map(|l| l.value().clone())
            .collect();
        let message = ClientMessage::Event(event.clone());
        let mut sent = 0;
        for target in targets {
            if target.connection.send(&message).await {
                sent += 1;
            }
        }
        sent
    }

    async fn send_closes(&self, closes: &[(RelayId, String)]) {
        for (relay_id, wire_id) in closes {
            let Some(live) = self.live.get(relay_id).map(|l| l.value().clone()) else {
                continue;
            };
            live.connection
                .send(&ClientMessage::Close {
                    subscription_id: wire_id.clone(),
                })
                .await;
        }
    }

    async fn finish_removed(&self, removed: Removed) {
        debug!(filter_id = %removed.filter.id, "filter removed");
        self.send_closes(&removed.closes).await;
        self.notifier.send(Notification::FilterRemoved {
            filter_id: removed.filter.id,
        });
    }

    /// Handle one inbound frame. Returns false if the connection should be
    /// dropped.
    async fn handle_message(
        &self,
        relay: &RelayRecord,
        connection: &Connection,
        message: RelayMessage,
    ) -> bool {
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                self.handle_event(relay.id, &subscription_id, event).await;
                true
            }
            RelayMessage::Eose { subscription_id } => {
                if let Some(filter) = self.reconciler.filter_for(relay.id, &subscription_id) {
                    self.notifier.send(Notification::Eose {
                        filter_id: filter.id,
                        relay_id: relay.id,
                    });
                }
                let outcome = self.reconciler.on_eose(relay.id, &subscription_id);
                if let Some(wire_id) = outcome.close
                    && !connection
                        .send(&ClientMessage::Close {
                            subscription_id: wire_id,
                        })
                        .await
                {
                    return false;
                }
                if let Some(removed) = outcome.removed {
                    self.finish_removed(removed).await;
                }
                true
            }
            RelayMessage::Notice { message } => {
                if is_rate_limit_notice(&message) {
                    warn!(relay = %relay.uri, "rate limited: {}", message);
                    self.rate_limiter.cool_down(relay.id);
                    self.notifier.send(Notification::RateLimited { relay_id: relay.id });
                } else {
                    info!(relay = %relay.uri, "notice: {}", message);
                }
                true
            }
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                // A duplicate rejection still means the relay has the event.
                if success || message.starts_with("duplicate") {
                    if let Err(e) = self.store.mark_seen(relay.id, &event_id) {
                        warn!(relay = %relay.uri, id = %event_id, "failed to record ack: {}", e);
                    }
                } else {
                    debug!(relay = %relay.uri, id = %event_id, "event rejected: {}", message);
                }
                self.notifier.send(Notification::Published {
                    event_id,
                    relay_id: relay.id,
                    accepted: success,
                    message,
                });
                true
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                debug!(relay = %relay.uri, sub = %subscription_id, "subscription closed: {}", message);
                if let Some(removed) = self.reconciler.on_closed(relay.id, &subscription_id) {
                    self.finish_removed(removed).await;
                }
                true
            }
        }
    }

    async fn handle_event(&self, relay_id: RelayId, subscription_id: &str, event: Event) {
        let outcome = match self.store.store_event(&event, Some(relay_id)) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(relay_id, id = %event.id, "failed to store event: {}", e);
                return;
            }
        };
        let is_new = outcome.is_new();
        let routing = self
            .reconciler
            .on_event(relay_id, subscription_id, is_new, unix_now());

        if outcome == WriteOutcome::Stored {
            match self.store.process_event(&self.session(), &event.id) {
                Ok(processed) => self.apply_changes(processed.changes),
                Err(e) => warn!(id = %event.id, "processing failed: {}", e),
            }
        }

        match routing.filter {
            Some(filter) => {
                if filter.lifecycle.preserve_oldest
                    && let Err(e) = self
                        .store
                        .record_oldest(&filter.params_id(), relay_id, event.created_at)
                {
                    warn!(relay_id, "failed to record pagination: {}", e);
                }
                if is_new {
                    self.notifier.send(Notification::NewEvent {
                        filter_id: filter.id,
                        relay_id,
                        event,
                    });
                }
            }
            None => debug!(relay_id, sub = %subscription_id, "event for unknown subscription"),
        }

        if let Some(removed) = routing.removed {
            self.finish_removed(removed).await;
        }
    }

    /// Retry pending processing, drop expired filters, queue detail refreshes
    /// and then revisit every live relay, which also picks up relays whose
    /// rate-limit cooldown has run out.
    async fn maintenance_pass(&self) {
        match self.store.process_pending(&self.session(), PENDING_BATCH) {
            Ok(changes) => self.apply_changes(changes),
            Err(e) => warn!("processing pass failed: {}", e),
        }

        for removed in self.reconciler.expire(unix_now()) {
            self.finish_removed(removed).await;
        }

        self.refresh_details(DetailKind::Profile);
        self.refresh_details(DetailKind::Channel);
        self.reconcile_all().await;
    }

    /// Add one-shot filters for details whose cached copy is older than the
    /// refresh interval.
    fn refresh_details(&self, kind: DetailKind) {
        let stale = match self.store.stale_details(kind, self.config.detail_refresh()) {
            Ok(stale) => stale,
            Err(e) => {
                warn!(kind = kind.as_str(), "failed to load stale details: {}", e);
                return;
            }
        };
        if stale.is_empty() {
            return;
        }
        debug!(kind = kind.as_str(), count = stale.len(), "refreshing details");

        for chunk in stale.chunks(DETAIL_BATCH) {
            for id in chunk {
                if let Err(e) = self.store.touch_detail(id, kind) {
                    warn!(id = %id, "failed to touch detail: {}", e);
                }
            }
            let ids = chunk.to_vec();
            let intent = match kind {
                DetailKind::Profile => Intent::Profiles { pubkeys: ids },
                DetailKind::Channel => Intent::Channels { ids },
            };
            self.reconciler
                .add_filter(SubscriptionFilter::new(intent).destroy_on_eose(true));
        }
    }
}

async fn send_plan(connection: &Connection, plan: Plan) -> bool {
    for wire_id in plan.unsubscribe {
        if !connection
            .send(&ClientMessage::Close {
                subscription_id: wire_id,
            })
            .await
        {
            return false;
        }
    }
    for subscribe in plan.subscribe {
        if !connection
            .send(&ClientMessage::Req {
                subscription_id: subscribe.wire_id,
                filters: subscribe.filters,
            })
            .await
        {
            return false;
        }
    }
    true
}

async fn worker(inner: Arc<Inner>, worker_id: usize) {
    debug!(worker_id, "worker started");
    while let Some(relay_id) = inner.queue.pop(&inner.cancel).await {
        let relay = match inner.store.get_relay(relay_id) {
            Ok(Some(relay)) => relay,
            Ok(None) => {
                debug!(worker_id, relay_id, "relay no longer exists, skipping");
                inner.queue.release(relay_id);
                continue;
            }
            Err(e) => {
                warn!(worker_id, relay_id, "failed to load relay: {}", e);
                inner.requeue_later(relay_id, 0);
                continue;
            }
        };

        debug!(worker_id, relay = %relay.uri, priority = relay.priority, "connecting relay");
        inner.run_relay(&relay).await;

        if inner.cancel.is_cancelled() {
            inner.requeue(relay_id, relay.priority);
        } else {
            inner.requeue_later(relay_id, relay.priority);
        }
    }
    debug!(worker_id, "worker stopped");
}

async fn maintenance(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.config.processing_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        inner.maintenance_pass().await;
    }
}
