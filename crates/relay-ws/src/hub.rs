//! Connection hubs.
//!
//! A [`Hub`] is a registry of live [`Worker`]s sharing one broadcast domain.
//! Registering a worker starts a supervisor task that subscribes to the
//! worker's envelopes and hands each one to the hub's handler. A worker may
//! belong to any number of hubs at once; each hub sees every envelope. Handlers for
//! different connections run concurrently; for a single connection the
//! supervisor waits for one handler call to finish before starting the
//! next, so per-connection order is preserved.
//!
//! A worker leaves the hub as soon as it closes or the hub closes. Closing a
//! hub does not close its workers' sockets.
//!
//! # Example
//!
//! ```ignore
//! use relay_ws::{Envelope, Hub};
//!
//! let hub = Hub::new(|hub: Hub, envelope: Envelope| async move {
//!     let text = envelope.payload().clone();
//!     hub.distribute(
//!         move |worker| {
//!             let text = text.clone();
//!             async move {
//!                 let _ = worker.write_binary(text.to_vec()).await;
//!             }
//!         },
//!         Some(envelope.worker()),
//!     );
//! });
//!
//! hub.add_connection(&worker)?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, instrument, warn};

use crate::config::HubConfig;
use crate::envelope::Envelope;
use crate::error::{WsError, WsResult};
use crate::message::Message;
use crate::signal::{CloseSignal, Closed};
use crate::worker::{ConnectionId, Subscription, Worker};

/// Per-message handler invoked by a hub.
///
/// Implemented for every `Fn(Hub, Envelope) -> impl Future<Output = ()>`.
pub trait HubHandler: Send + Sync + 'static {
    /// Handle one envelope delivered by a registered worker.
    fn handle(&self, hub: Hub, envelope: Envelope) -> BoxFuture<'static, ()>;
}

impl<F, Fut> HubHandler for F
where
    F: Fn(Hub, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, hub: Hub, envelope: Envelope) -> BoxFuture<'static, ()> {
        self(hub, envelope).boxed()
    }
}

/// Statistics about a hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Workers currently registered.
    pub active: usize,
    /// Workers ever registered.
    pub total_registered: u64,
    /// Workers removed after they or the hub closed.
    pub total_deregistered: u64,
    /// Envelopes handed to the handler.
    pub messages_dispatched: u64,
    /// Handler calls that panicked.
    pub handler_panics: u64,
    /// Registrations refused by a closed hub or a connection limit.
    pub rejected: u64,
}

struct HubInner {
    config: HubConfig,
    workers: DashMap<ConnectionId, Worker>,
    /// Serializes limit checks with inserts.
    admission: Mutex<()>,
    handler: Arc<dyn HubHandler>,
    signal: CloseSignal,
    total_registered: AtomicU64,
    total_deregistered: AtomicU64,
    messages_dispatched: AtomicU64,
    handler_panics: AtomicU64,
    rejected: AtomicU64,
}

/// A registry of workers with a shared message handler.
///
/// `Hub` is a cheap handle; clones share the same registry.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub with the default configuration.
    pub fn new<H: HubHandler>(handler: H) -> Self {
        Self::with_config(HubConfig::default(), handler)
    }

    /// Create a hub with the given configuration.
    pub fn with_config<H: HubHandler>(config: HubConfig, handler: H) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                workers: DashMap::new(),
                admission: Mutex::new(()),
                handler: Arc::new(handler),
                signal: CloseSignal::new(),
                total_registered: AtomicU64::new(0),
                total_deregistered: AtomicU64::new(0),
                messages_dispatched: AtomicU64::new(0),
                handler_panics: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Get the hub name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Register a worker and start supervising it.
    ///
    /// Returns `Ok(true)` when the worker was added and `Ok(false)` when it
    /// was already registered, in which case nothing changes.
    ///
    /// # Errors
    ///
    /// - [`WsError::HubClosed`] if the hub is closed.
    /// - [`WsError::ConnectionClosed`] if the worker is closed.
    /// - [`WsError::ConnectionLimitReached`] if a connection limit is hit.
    pub fn add_connection(&self, worker: &Worker) -> WsResult<bool> {
        if self.is_closed() {
            self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(WsError::HubClosed);
        }
        if worker.is_closed() {
            return Err(WsError::connection_closed(None, "worker is closed"));
        }

        let id = worker.id();
        if self.inner.workers.contains_key(&id) {
            return Ok(false);
        }

        let subscription = {
            let _admission = self.inner.admission.lock();
            self.check_limits(worker)?;
            match self.inner.workers.entry(id) {
                Entry::Occupied(_) => return Ok(false),
                Entry::Vacant(slot) => {
                    let subscription = worker.subscribe()?;
                    slot.insert(worker.clone());
                    subscription
                }
            }
        };

        self.inner.total_registered.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("relay_hub_connections", "hub" => self.inner.config.name.clone()).increment(1.0);
        debug!(
            hub = %self.inner.config.name,
            connection_id = %id,
            total = self.inner.workers.len(),
            "worker registered"
        );

        tokio::spawn(supervise(self.clone(), worker.clone(), subscription));
        Ok(true)
    }

    fn check_limits(&self, worker: &Worker) -> WsResult<()> {
        let current = self.inner.workers.len();
        if current >= self.inner.config.max_connections {
            self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                hub = %self.inner.config.name,
                current,
                max = self.inner.config.max_connections,
                "connection limit reached"
            );
            return Err(WsError::connection_limit(format!(
                "maximum connections ({}) reached",
                self.inner.config.max_connections
            )));
        }

        if let Some(client) = worker.client_id() {
            let client_count = self
                .inner
                .workers
                .iter()
                .filter(|e| e.value().client_id().as_deref() == Some(client.as_str()))
                .count();
            if client_count >= self.inner.config.max_per_client {
                self.inner.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    hub = %self.inner.config.name,
                    client_id = %client,
                    count = client_count,
                    max = self.inner.config.max_per_client,
                    "per-client connection limit reached"
                );
                return Err(WsError::connection_limit(format!(
                    "maximum connections per client ({}) reached",
                    self.inner.config.max_per_client
                )));
            }
        }

        Ok(())
    }

    fn deregister(&self, worker: &Worker) {
        if self.inner.workers.remove(&worker.id()).is_some() {
            self.inner.total_deregistered.fetch_add(1, Ordering::Relaxed);
            metrics::gauge!("relay_hub_connections", "hub" => self.inner.config.name.clone()).decrement(1.0);
            debug!(
                hub = %self.inner.config.name,
                connection_id = %worker.id(),
                "worker deregistered"
            );
        }
    }

    fn dispatch(&self, envelope: Envelope) -> JoinHandle<()> {
        self.inner.messages_dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("relay_hub_messages_total", "hub" => self.inner.config.name.clone()).increment(1);
        tokio::spawn(self.inner.handler.handle(self.clone(), envelope))
    }

    fn record_outcome(&self, outcome: Result<(), JoinError>) {
        match outcome {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                self.inner.handler_panics.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("relay_hub_handler_panics_total", "hub" => self.inner.config.name.clone())
                    .increment(1);
                warn!(hub = %self.inner.config.name, "hub handler panicked");
            }
            Err(e) => debug!(hub = %self.inner.config.name, error = %e, "hub handler cancelled"),
        }
    }

    /// Call `f` on a separate task for every registered worker except
    /// `except`.
    ///
    /// Operates on a snapshot of the registry; workers added or removed
    /// while the calls run may or may not be included. Returns the number of
    /// calls started.
    pub fn distribute<F, Fut>(&self, f: F, except: Option<&Worker>) -> usize
    where
        F: Fn(Worker) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let excluded = except.map(Worker::id);
        let targets: Vec<Worker> = self
            .inner
            .workers
            .iter()
            .filter(|e| Some(*e.key()) != excluded)
            .map(|e| e.value().clone())
            .collect();

        let count = targets.len();
        for worker in targets {
            tokio::spawn(f(worker));
        }
        count
    }

    /// Write `message` to every registered worker except `except`.
    ///
    /// Write failures are logged and leave the target open.
    pub fn broadcast(&self, message: Message, except: Option<&Worker>) -> usize {
        self.distribute(
            move |worker| {
                let message = message.clone();
                async move {
                    if let Err(e) = worker.write(message).await {
                        warn!(connection_id = %worker.id(), error = %e, "broadcast write failed");
                    }
                }
            },
            except,
        )
    }

    /// Check if a worker is registered.
    pub fn contains(&self, worker: &Worker) -> bool {
        self.inner.workers.contains_key(&worker.id())
    }

    /// Get a registered worker by ID.
    pub fn get(&self, id: &ConnectionId) -> Option<Worker> {
        self.inner.workers.get(id).map(|e| e.value().clone())
    }

    /// Get the number of registered workers.
    pub fn len(&self) -> usize {
        self.inner.workers.len()
    }

    /// Check if no workers are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.workers.is_empty()
    }

    /// Snapshot of the registered workers.
    pub fn workers(&self) -> Vec<Worker> {
        self.inner.workers.iter().map(|e| e.value().clone()).collect()
    }

    /// Registered workers with the given client ID.
    pub fn client_connections(&self, client_id: &str) -> Vec<Worker> {
        self.inner
            .workers
            .iter()
            .filter(|e| e.value().client_id().as_deref() == Some(client_id))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Get statistics about the hub.
    pub fn stats(&self) -> HubStats {
        HubStats {
            active: self.inner.workers.len(),
            total_registered: self.inner.total_registered.load(Ordering::Relaxed),
            total_deregistered: self.inner.total_deregistered.load(Ordering::Relaxed),
            messages_dispatched: self.inner.messages_dispatched.load(Ordering::Relaxed),
            handler_panics: self.inner.handler_panics.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
        }
    }

    /// Close the hub.
    ///
    /// Every supervisor exits and deregisters its worker; the workers stay
    /// open. Returns `true` only for the call that closed the hub.
    pub fn close(&self) -> bool {
        if !self.inner.signal.fire() {
            return false;
        }
        info!(
            hub = %self.inner.config.name,
            connections = self.inner.workers.len(),
            "hub closed"
        );
        true
    }

    /// Check if the hub is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.signal.is_fired()
    }

    /// A future that completes once the hub is closed.
    pub fn close_notify(&self) -> Closed {
        self.inner.signal.notified()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.inner.config.name)
            .field("connections", &self.inner.workers.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[instrument(name = "hub_supervisor", skip_all, fields(hub = %hub.name(), connection_id = %worker.id()))]
async fn supervise(hub: Hub, worker: Worker, mut subscription: Subscription) {
    let mut hub_closed = hub.close_notify();
    let mut worker_closed = worker.close_notify();

    loop {
        let envelope = tokio::select! {
            biased;
            () = &mut hub_closed => break,
            () = &mut worker_closed => break,
            next = subscription.next() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let handler = hub.dispatch(envelope);
        tokio::select! {
            biased;
            () = &mut hub_closed => break,
            () = &mut worker_closed => break,
            outcome = handler => hub.record_outcome(outcome),
        }
    }

    drop(subscription);
    hub.deregister(&worker);
}
