// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource watcher.
//!
//! [`WatchManager`] owns one subscription per (namespace, resource kind).
//! Each subscription runs on its own tokio task and delivers events to the
//! handler one at a time, so a slow handler only delays its own
//! subscription. Asking for a subscription that already exists is a no-op.
//!
//! Two [`WatchSource`]s ship with the crate:
//!
//! - [`PollingWatchSource`]: lists units from the task store on an interval
//!   and emits the differences.
//! - [`ChannelWatchSource`]: events are pushed in-process, used by tests and
//!   by embedders that already have a change feed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opflow_core::{CoreError, ExecutionUnit, LabelSelector, TaskStore, labels};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 256;

/// Kinds of resources a subscription can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ResourceKind {
    ExecutionUnit,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionUnit => f.write_str("execution-unit"),
        }
    }
}

/// A change to an execution unit.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(ExecutionUnit),
    Updated {
        old: ExecutionUnit,
        new: ExecutionUnit,
    },
    Deleted(ExecutionUnit),
}

impl WatchEvent {
    /// The unit as it is after the event.
    pub fn unit(&self) -> &ExecutionUnit {
        match self {
            Self::Added(unit) | Self::Deleted(unit) => unit,
            Self::Updated { new, .. } => new,
        }
    }
}

/// Produces a stream of events for one namespace and kind.
#[async_trait]
pub trait WatchSource: Send + Sync {
    async fn watch(
        &self,
        namespace: &str,
        kind: ResourceKind,
    ) -> Result<mpsc::Receiver<WatchEvent>, CoreError>;
}

/// Callbacks invoked for execution unit changes.
#[async_trait]
pub trait UnitEventHandler: Send + Sync {
    async fn on_add(&self, unit: &ExecutionUnit);

    async fn on_update(&self, old: &ExecutionUnit, new: &ExecutionUnit);

    async fn on_delete(&self, unit: &ExecutionUnit);
}

type SubscriptionKey = (String, ResourceKind);

/// Creates and tracks watch subscriptions.
pub struct WatchManager {
    source: Arc<dyn WatchSource>,
    handler: Arc<dyn UnitEventHandler>,
    active: Arc<Mutex<HashSet<SubscriptionKey>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WatchManager {
    pub fn new(source: Arc<dyn WatchSource>, handler: Arc<dyn UnitEventHandler>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            source,
            handler,
            active: Arc::new(Mutex::new(HashSet::new())),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Start watching `kind` in `namespace`.
    ///
    /// Returns `false` without doing anything if the subscription already exists.
    pub async fn setup_watch(&self, namespace: &str, kind: ResourceKind) -> Result<bool, CoreError> {
        let key = (namespace.to_string(), kind);
        {
            let mut active = self.active.lock().await;
            if active.contains(&key) {
                debug!(namespace = %namespace, kind = %kind, "Watch already exists");
                return Ok(false);
            }
            active.insert(key.clone());
        }

        let events = match self.source.watch(namespace, kind).await {
            Ok(rx) => rx,
            Err(e) => {
                self.active.lock().await.remove(&key);
                return Err(e);
            }
        };

        let handle = tokio::spawn(run_subscription(
            key,
            events,
            self.handler.clone(),
            self.active.clone(),
            self.shutdown_tx.subscribe(),
        ));
        self.tasks.lock().await.push(handle);

        info!(namespace = %namespace, kind = %kind, "Watch started");
        Ok(true)
    }

    /// Whether a subscription for `namespace` and `kind` is live.
    pub async fn is_watching(&self, namespace: &str, kind: ResourceKind) -> bool {
        self.active
            .lock()
            .await
            .contains(&(namespace.to_string(), kind))
    }

    /// Stop every subscription and wait for in-flight deliveries to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Watch task panicked");
            }
        }
        info!("Watches stopped");
    }
}

async fn run_subscription(
    key: SubscriptionKey,
    mut events: mpsc::Receiver<WatchEvent>,
    handler: Arc<dyn UnitEventHandler>,
    active: Arc<Mutex<HashSet<SubscriptionKey>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (namespace, kind) = &key;
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                debug!(namespace = %namespace, kind = %kind, "Watch received shutdown signal");
                break;
            }

            event = events.recv() => match event {
                Some(event) => deliver(handler.as_ref(), event).await,
                None => {
                    warn!(namespace = %namespace, kind = %kind, "Watch stream closed");
                    break;
                }
            }
        }
    }
    // a closed stream may be re-established with setup_watch
    active.lock().await.remove(&key);
}

async fn deliver(handler: &dyn UnitEventHandler, event: WatchEvent) {
    if !labels::is_vendor_owned(&event.unit().labels) {
        return;
    }
    match &event {
        WatchEvent::Added(unit) => handler.on_add(unit).await,
        WatchEvent::Updated { old, new } => handler.on_update(old, new).await,
        WatchEvent::Deleted(unit) => handler.on_delete(unit).await,
    }
}

// ============================================================================
// Channel source
// ============================================================================

/// Watch source fed by explicit calls to [`ChannelWatchSource::send`].
#[derive(Default)]
pub struct ChannelWatchSource {
    subscribers: Mutex<HashMap<SubscriptionKey, Vec<mpsc::Sender<WatchEvent>>>>,
}

impl ChannelWatchSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every subscriber of its namespace. Returns how many received it.
    pub async fn send(&self, event: WatchEvent) -> usize {
        let key = (event.unit().namespace.clone(), ResourceKind::ExecutionUnit);
        let senders: Vec<_> = {
            let mut subscribers = self.subscribers.lock().await;
            match subscribers.get_mut(&key) {
                Some(list) => {
                    list.retain(|tx| !tx.is_closed());
                    list.clone()
                }
                None => Vec::new(),
            }
        };

        let mut delivered = 0;
        for tx in senders {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn subscriber_count(&self, namespace: &str) -> usize {
        self.subscribers
            .lock()
            .await
            .get(&(namespace.to_string(), ResourceKind::ExecutionUnit))
            .map(|list| list.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl WatchSource for ChannelWatchSource {
    async fn watch(
        &self,
        namespace: &str,
        kind: ResourceKind,
    ) -> Result<mpsc::Receiver<WatchEvent>, CoreError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .await
            .entry((namespace.to_string(), kind))
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

// ============================================================================
// Polling source
// ============================================================================

/// Watch source that diffs successive listings of the task store.
pub struct PollingWatchSource {
    store: Arc<dyn TaskStore>,
    interval: Duration,
}

impl PollingWatchSource {
    pub fn new(store: Arc<dyn TaskStore>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait]
impl WatchSource for PollingWatchSource {
    async fn watch(
        &self,
        namespace: &str,
        kind: ResourceKind,
    ) -> Result<mpsc::Receiver<WatchEvent>, CoreError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let store = self.store.clone();
        let interval = self.interval;
        let namespace = namespace.to_string();
        debug!(namespace = %namespace, kind = %kind, ?interval, "Polling watch started");

        tokio::spawn(async move {
            let everything = LabelSelector::everything();
            let mut known: BTreeMap<String, ExecutionUnit> = BTreeMap::new();

            while !tx.is_closed() {
                match store.list_units(&namespace, &everything).await {
                    Ok(units) => {
                        let current: BTreeMap<String, ExecutionUnit> =
                            units.into_iter().map(|u| (u.name.clone(), u)).collect();
                        for event in diff(&known, &current) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        known = current;
                    }
                    Err(e) => {
                        warn!(namespace = %namespace, error = %e, "Failed to list execution units");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });

        Ok(rx)
    }
}

/// Events that turn `before` into `after`.
fn diff(
    before: &BTreeMap<String, ExecutionUnit>,
    after: &BTreeMap<String, ExecutionUnit>,
) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    for (name, unit) in after {
        match before.get(name) {
            None => events.push(WatchEvent::Added(unit.clone())),
            Some(old) if old != unit => events.push(WatchEvent::Updated {
                old: old.clone(),
                new: unit.clone(),
            }),
            Some(_) => {}
        }
    }
    for (name, unit) in before {
        if !after.contains_key(name) {
            events.push(WatchEvent::Deleted(unit.clone()));
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use opflow_core::MemoryTaskStore;

    fn unit(name: &str) -> ExecutionUnit {
        ExecutionUnit::new("ns", name).with_label(labels::VENDOR, labels::VENDOR_VALUE)
    }

    #[test]
    fn test_diff() {
        let mut before = BTreeMap::new();
        before.insert("a".to_string(), unit("a"));
        before.insert("b".to_string(), unit("b"));

        let mut after = BTreeMap::new();
        after.insert("a".to_string(), unit("a").succeed());
        after.insert("c".to_string(), unit("c"));

        let events = diff(&before, &after);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], WatchEvent::Updated { new, .. } if new.name == "a"));
        assert!(matches!(&events[1], WatchEvent::Added(u) if u.name == "c"));
        assert!(matches!(&events[2], WatchEvent::Deleted(u) if u.name == "b"));

        assert!(diff(&after, &after).is_empty());
    }

    #[tokio::test]
    async fn test_polling_source_reports_changes() {
        let store = Arc::new(MemoryTaskStore::new());
        store.put_unit(&unit("job-1")).await.unwrap();

        let source = PollingWatchSource::new(store.clone(), Duration::from_millis(10));
        let mut rx = source.watch("ns", ResourceKind::ExecutionUnit).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, WatchEvent::Added(u) if u.name == "job-1"));

        store.put_unit(&unit("job-1").succeed()).await.unwrap();
        let second = rx.recv().await.unwrap();
        match second {
            WatchEvent::Updated { old, new } => {
                assert!(!old.is_successful());
                assert!(new.is_successful());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_channel_source_fans_out_per_namespace() {
        let source = ChannelWatchSource::new();
        let mut rx1 = source.watch("ns", ResourceKind::ExecutionUnit).await.unwrap();
        let mut rx2 = source.watch("ns", ResourceKind::ExecutionUnit).await.unwrap();
        let _other = source.watch("other", ResourceKind::ExecutionUnit).await.unwrap();

        assert_eq!(source.send(WatchEvent::Added(unit("a"))).await, 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());

        drop(rx2);
        assert_eq!(source.subscriber_count("ns").await, 1);
    }
}
