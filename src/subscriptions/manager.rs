//! Subscription manager tracking the latest value of each named source.

use crate::error::{ListenerError, Result};
use crate::types::{Message, Signal, Sink, Snapshot, Source, SubscriptionId, Talkback};
use crossbeam_channel::{bounded, Sender};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use super::types::{ListenerConfig, SnapshotHandle, SourceMap, View};

/// Internal subscription state.
struct Subscription {
    id: SubscriptionId,
    /// Set once the source has sent `Start`.
    talkback: Option<Talkback>,
}

impl Subscription {
    fn is_started(&self) -> bool {
        self.talkback.is_some()
    }
}

/// Everything guarded by the state lock.
struct ListenerState<T> {
    /// Bound subscriptions by key, including ones still waiting for `Start`.
    subscriptions: HashMap<String, Subscription>,
    /// Latest value per key.
    snapshot: Snapshot<T>,
    /// Sources as of the last mount/update, for diffing the next update.
    sources: SourceMap<T>,
    /// Notifications are deferred while this is non-zero.
    batch_depth: usize,
    /// A notification was deferred during the current batch.
    dirty: bool,
    torn_down: bool,
}

/// State shared between the manager and the sinks it hands to sources.
///
/// Sinks only hold a `Weak` to this, so a source keeping its sink alive
/// never keeps the manager alive.
///
/// Lock order: `lifecycle` before `state`; `view` before `state` and
/// `watchers`. The state lock is never held while calling out.
struct Shared<T> {
    state: Mutex<ListenerState<T>>,
    /// Held across a whole slot transition (update, subscribe, unsubscribe,
    /// teardown) so transitions from different threads never interleave.
    lifecycle: Mutex<()>,
    /// Held while a snapshot is cloned and delivered, so deliveries happen in
    /// state order. Reentrant so a view that synchronously drives a source
    /// cannot deadlock.
    view: ReentrantMutex<RefCell<Option<View<T>>>>,
    /// A render was requested from inside the running view.
    rerender: AtomicBool,
    watchers: Mutex<Vec<Sender<Snapshot<T>>>>,
    next_id: AtomicU64,
    render_count: AtomicU64,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn new(view: Option<View<T>>) -> Self {
        Self {
            state: Mutex::new(ListenerState {
                subscriptions: HashMap::new(),
                snapshot: Snapshot::new(),
                sources: SourceMap::new(),
                batch_depth: 0,
                dirty: false,
                torn_down: false,
            }),
            lifecycle: Mutex::new(()),
            view: ReentrantMutex::new(RefCell::new(view)),
            rerender: AtomicBool::new(false),
            watchers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            render_count: AtomicU64::new(0),
        }
    }

    /// Bind `key` to a fresh subscription and hand the source its sink.
    ///
    /// The key must not be bound; callers hold the lifecycle lock and check.
    fn subscribe(self: &Arc<Self>, key: &str, source: &Source<T>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        // The entry must exist before the source runs: it may deliver
        // Start and Data synchronously from inside `subscribe`.
        let replaced = self
            .state
            .lock()
            .subscriptions
            .insert(key.to_string(), Subscription { id, talkback: None });
        debug_assert!(replaced.is_none(), "subscribing {key} while it is still bound");

        debug!(key, %id, "Subscribing to source");
        source.subscribe(self.sink_for(key, id));
    }

    fn sink_for(self: &Arc<Self>, key: &str, id: SubscriptionId) -> Sink<T> {
        let shared: Weak<Self> = Arc::downgrade(self);
        let key = key.to_string();

        Sink::new(move |message| match shared.upgrade() {
            Some(shared) => shared.handle(&key, id, message),
            None => trace!(key = %key, %id, "Message after listener dropped"),
        })
    }

    fn handle(&self, key: &str, id: SubscriptionId, message: Message<T>) {
        match message {
            Message::Start(talkback) => {
                let stale = {
                    let mut state = self.state.lock();
                    match state.subscriptions.get_mut(key) {
                        Some(sub) if sub.id == id => {
                            sub.talkback = Some(talkback);
                            None
                        }
                        _ => Some(talkback),
                    }
                };

                match stale {
                    Some(talkback) => {
                        trace!(key, %id, "Start for replaced subscription, cancelling");
                        talkback.cancel();
                    }
                    None => {
                        trace!(key, %id, "Subscription started");
                        self.pull(key, id);
                    }
                }
            }

            Message::Data(value) => {
                let recorded = {
                    let mut state = self.state.lock();
                    let current = state
                        .subscriptions
                        .get(key)
                        .is_some_and(|sub| sub.id == id && sub.is_started());
                    if current {
                        state.snapshot.insert(key, value);
                    }
                    current
                };

                if !recorded {
                    trace!(key, %id, "Dropping data for inactive subscription");
                    return;
                }

                self.notify();
                self.pull(key, id);
            }

            Message::End => {
                if self.remove(key, Some(id)) {
                    debug!(key, %id, "Source ended");
                    self.notify();
                } else {
                    trace!(key, %id, "End for inactive subscription");
                }
            }

            Message::Unknown(code) => {
                trace!(key, %id, code, "Ignoring unrecognized message");
            }
        }
    }

    /// Request the next value, if the subscription is still registered.
    fn pull(&self, key: &str, id: SubscriptionId) {
        let talkback = self
            .state
            .lock()
            .subscriptions
            .get(key)
            .filter(|sub| sub.id == id)
            .and_then(|sub| sub.talkback.clone());

        if let Some(talkback) = talkback {
            talkback.send(Signal::Pull);
        }
    }

    /// Send `Cancel` to the key's talkback, if it has one.
    fn cancel(&self, key: &str) -> bool {
        let talkback = self
            .state
            .lock()
            .subscriptions
            .get(key)
            .and_then(|sub| sub.talkback.clone());

        match talkback {
            Some(talkback) => {
                debug!(key, "Cancelling subscription");
                talkback.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the key from the registry and the snapshot.
    ///
    /// With `only` set, nothing happens unless that subscription still owns
    /// the key. Returns whether anything was removed.
    fn remove(&self, key: &str, only: Option<SubscriptionId>) -> bool {
        let mut state = self.state.lock();

        if let Some(id) = only {
            if state.subscriptions.get(key).map(|sub| sub.id) != Some(id) {
                return false;
            }
        }

        let had_subscription = state.subscriptions.remove(key).is_some();
        let had_value = state.snapshot.remove(key).is_some();
        had_subscription || had_value
    }

    fn unsubscribe(&self, key: &str) {
        if self.remove(key, None) {
            debug!(key, "Unsubscribed");
            self.notify();
        }
    }

    fn notify(&self) {
        {
            let mut state = self.state.lock();
            if state.batch_depth > 0 {
                state.dirty = true;
                return;
            }
        }

        self.deliver();
    }

    fn begin_batch(&self) {
        self.state.lock().batch_depth += 1;
    }

    /// Close a batch. Returns whether the caller should deliver a render,
    /// which it must do after releasing the lifecycle lock.
    fn end_batch(&self, force: bool) -> bool {
        let mut state = self.state.lock();
        state.batch_depth -= 1;
        if state.batch_depth > 0 {
            state.dirty |= force;
            return false;
        }
        let render = state.dirty || force;
        state.dirty = false;
        render
    }

    /// Hand the current snapshot to the view and the watchers.
    ///
    /// The snapshot is cloned under the view lock, so the last delivery
    /// always carries the latest state. A render requested by the view
    /// itself is delivered once the view returns, with the newest snapshot.
    fn deliver(&self) {
        let guard = self.view.lock();
        let Ok(mut view) = guard.try_borrow_mut() else {
            trace!("Render requested from inside the view, deferring");
            self.rerender.store(true, Ordering::SeqCst);
            return;
        };

        loop {
            let snapshot = self.state.lock().snapshot.clone();
            self.render_count.fetch_add(1, Ordering::SeqCst);

            if let Some(view) = view.as_mut() {
                view(&snapshot);
            }
            self.broadcast(snapshot);

            if !self.rerender.swap(false, Ordering::SeqCst) {
                break;
            }
        }
    }

    /// Send to every watcher. Drops watchers that are full or disconnected.
    fn broadcast(&self, snapshot: Snapshot<T>) {
        let mut watchers = self.watchers.lock();
        let before = watchers.len();
        watchers.retain(|sender| sender.try_send(snapshot.clone()).is_ok());

        let dropped = before - watchers.len();
        if dropped > 0 {
            warn!(dropped, "Dropped snapshot watchers that fell behind or disconnected");
        }
    }

    /// Cancel every registered talkback. Idempotent.
    fn teardown(&self) {
        let _lifecycle = self.lifecycle.lock();

        let drained = {
            let mut state = self.state.lock();
            if state.torn_down {
                return;
            }
            state.torn_down = true;
            state.sources = SourceMap::new();
            std::mem::take(&mut state.subscriptions)
        };

        debug!(subscriptions = drained.len(), "Tearing down listener");
        for (key, sub) in drained {
            if let Some(talkback) = sub.talkback {
                trace!(key = %key, id = %sub.id, "Cancelling on teardown");
                talkback.cancel();
            }
        }

        self.watchers.lock().clear();
    }
}

/// Keeps the latest value of each named source and re-renders on change.
///
/// Mounting subscribes to every configured source; [`update`] diffs a new
/// source set against the previous one; dropping the manager (or calling
/// [`unmount`]) cancels every live subscription.
///
/// Sources may deliver from any thread. Sources must not call back into the
/// manager's lifecycle methods from inside `subscribe` or a talkback.
///
/// [`update`]: SubscriptionManager::update
/// [`unmount`]: SubscriptionManager::unmount
pub struct SubscriptionManager<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
    /// Capacity for channels created by `watch`.
    watch_buffer_size: usize,
}

impl<T: Clone + Send + 'static> SubscriptionManager<T> {
    /// Subscribe to every configured source, then render once.
    ///
    /// The initial render sees whatever the sources emitted synchronously
    /// while being subscribed.
    pub fn mount(config: ListenerConfig<T>) -> Result<Self> {
        validate_keys(&config.sources)?;

        let manager = Self {
            shared: Arc::new(Shared::new(config.view)),
            watch_buffer_size: config.watch_buffer_size,
        };

        manager.shared.begin_batch();
        for (key, source) in config.sources.iter() {
            manager.shared.subscribe(key, source);
        }
        manager.shared.state.lock().sources = config.sources;
        if manager.shared.end_batch(true) {
            manager.shared.deliver();
        }

        Ok(manager)
    }

    /// Replace the source set, subscribing, cancelling and resubscribing as
    /// needed. Slots whose source is unchanged are left alone.
    ///
    /// Renders once at the end if anything changed.
    pub fn update(&self, sources: SourceMap<T>) -> Result<()> {
        validate_keys(&sources)?;

        let render = {
            let _lifecycle = self.shared.lifecycle.lock();
            self.apply(sources)?
        };

        if render {
            self.shared.deliver();
        }
        Ok(())
    }

    /// Set or clear a single slot, leaving the others untouched.
    pub fn set_source(&self, key: &str, source: Option<Source<T>>) -> Result<()> {
        if key.is_empty() {
            return Err(ListenerError::EmptyKey);
        }

        let render = {
            let _lifecycle = self.shared.lifecycle.lock();
            let mut sources = self.sources();
            sources.insert_opt(key, source);
            self.apply(sources)?
        };

        if render {
            self.shared.deliver();
        }
        Ok(())
    }

    /// Diff `sources` against the current set. Caller holds the lifecycle lock.
    fn apply(&self, sources: SourceMap<T>) -> Result<bool> {
        let previous = {
            let mut state = self.shared.state.lock();
            if state.torn_down {
                return Err(ListenerError::TornDown);
            }
            std::mem::replace(&mut state.sources, sources.clone())
        };

        let keys: BTreeSet<&str> = previous.keys().chain(sources.keys()).collect();

        self.shared.begin_batch();
        for key in keys {
            match (previous.get(key), sources.get(key)) {
                (None, Some(added)) => self.shared.subscribe(key, added),
                (Some(_), None) => {
                    self.shared.cancel(key);
                    self.shared.unsubscribe(key);
                }
                (Some(old), Some(new)) if !old.same_as(new) => {
                    self.shared.cancel(key);
                    self.shared.unsubscribe(key);
                    self.shared.subscribe(key, new);
                }
                _ => {}
            }
        }
        Ok(self.shared.end_batch(false))
    }

    /// Put `source` in the slot `key` and subscribe to it.
    ///
    /// Fails if the key is empty or still has a live subscription. A slot
    /// whose source ended or was unsubscribed can be subscribed again.
    pub fn subscribe(&self, key: &str, source: Source<T>) -> Result<()> {
        if key.is_empty() {
            return Err(ListenerError::EmptyKey);
        }

        let render = {
            let _lifecycle = self.shared.lifecycle.lock();
            {
                let mut state = self.shared.state.lock();
                if state.torn_down {
                    return Err(ListenerError::TornDown);
                }
                if state.subscriptions.contains_key(key) {
                    return Err(ListenerError::AlreadySubscribed(key.to_string()));
                }
                state.sources.insert(key, source.clone());
            }

            self.shared.begin_batch();
            self.shared.subscribe(key, &source);
            self.shared.end_batch(false)
        };

        if render {
            self.shared.deliver();
        }
        Ok(())
    }

    /// Send `Cancel` to the key's source. Returns whether the key had a
    /// started subscription to cancel.
    ///
    /// Bookkeeping is left alone; follow up with [`unsubscribe`] unless the
    /// source answers with `End`.
    ///
    /// [`unsubscribe`]: SubscriptionManager::unsubscribe
    pub fn cancel(&self, key: &str) -> bool {
        self.shared.cancel(key)
    }

    /// Forget the key's slot and subscription and clear its value.
    ///
    /// Does not cancel the source; call [`cancel`] first, otherwise nothing
    /// will cancel it later. Unknown keys are a no-op.
    ///
    /// [`cancel`]: SubscriptionManager::cancel
    pub fn unsubscribe(&self, key: &str) {
        let removed = {
            let _lifecycle = self.shared.lifecycle.lock();
            self.shared.state.lock().sources.remove(key);
            self.shared.remove(key, None)
        };

        if removed {
            debug!(key, "Unsubscribed");
            self.shared.notify();
        }
    }

    /// Cancel every live subscription. Later updates fail with
    /// [`ListenerError::TornDown`]. Also runs on drop.
    pub fn unmount(&self) {
        self.shared.teardown();
    }

    /// Receive every future snapshot on a channel with the configured buffer.
    pub fn watch(&self) -> SnapshotHandle<T> {
        self.watch_with_buffer(self.watch_buffer_size)
    }

    /// Receive every future snapshot on a channel of the given capacity.
    ///
    /// A watcher whose buffer fills up is dropped.
    pub fn watch_with_buffer(&self, buffer_size: usize) -> SnapshotHandle<T> {
        let (sender, receiver) = bounded(buffer_size);
        self.shared.watchers.lock().push(sender);
        SnapshotHandle { receiver }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Snapshot<T> {
        self.shared.state.lock().snapshot.clone()
    }

    /// Sources as of the last mount or update.
    pub fn sources(&self) -> SourceMap<T> {
        self.shared.state.lock().sources.clone()
    }

    /// Number of subscriptions whose source has started.
    pub fn subscription_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .subscriptions
            .values()
            .filter(|sub| sub.is_started())
            .count()
    }

    pub fn is_subscribed(&self, key: &str) -> bool {
        self.shared
            .state
            .lock()
            .subscriptions
            .get(key)
            .is_some_and(Subscription::is_started)
    }

    /// Number of snapshots delivered so far.
    pub fn render_count(&self) -> u64 {
        self.shared.render_count.load(Ordering::SeqCst)
    }

    pub fn watcher_count(&self) -> usize {
        self.shared.watchers.lock().len()
    }
}

impl<T: Clone + Send + 'static> Drop for SubscriptionManager<T> {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

fn validate_keys<T>(sources: &SourceMap<T>) -> Result<()> {
    if sources.keys().any(str::is_empty) {
        return Err(ListenerError::EmptyKey);
    }
    Ok(())
}
