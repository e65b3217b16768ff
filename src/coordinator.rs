//! Fetch coordinator: cache first, then the in-flight registry, then a new
//! fetch → cache-store → apply chain.
//!
//! # Chain layout
//!
//! ```text
//!              ┌──► cache-store (worker)
//!   fetch ─────┤
//!   (worker)   └──► apply       (apply context)
//! ```
//!
//! Cache-store and apply both depend on the fetch only. Apply reads the
//! payload from the fetch result, never from the cache, so it does not care
//! whether cache-store has run yet.
//!
//! # In-flight registry
//!
//! At most one chain per key is registered at a time. The entry is inserted
//! when the chain is submitted and removed once both cache-store and apply
//! are done with it, whether their bodies ran or were dropped unrun, so a
//! chain can never leak its entry. Between apply and cache-store the entry
//! is marked settled, and requests for the key are served from the fetch
//! result as if it were already cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::cache::Cache;
use crate::config::{CacheHitDelivery, CoalescePolicy, CoordinatorConfig};
use crate::error::Undelivered;
use crate::fetch::{FetchResult, FetchTask};
use crate::requester::Requester;
use crate::scheduler::Scheduler;
use crate::task::{block_fn, TaskHandle};
use crate::transport::Transport;
use crate::types::{ExecContext, ResourceKey};

type Registry = Arc<Mutex<HashMap<ResourceKey, InFlight>>>;
type OutcomeSlot = Arc<Mutex<Option<Result<(), Undelivered>>>>;

struct InFlight {
    chain: u64,
    fetch: TaskHandle,
    result: FetchResult,
    settled: bool,
    joined: Vec<Arc<dyn Requester>>,
}

impl InFlight {
    /// Payload a settled chain can serve without another fetch.
    fn settled_payload(&self) -> Option<Bytes> {
        if !self.settled || self.fetch.is_cancelled() {
            return None;
        }
        self.result.payload()
    }
}

/// Shared by the cache-store and apply bodies. The chain's registry entry
/// is removed when the last of them is dropped.
struct Registration {
    registry: Registry,
    key: ResourceKey,
    chain: u64,
}

impl Registration {
    /// Mark the entry settled and hand back the requesters that joined it.
    fn settle(&self) -> Vec<Arc<dyn Requester>> {
        match self.registry.lock().get_mut(&self.key) {
            Some(entry) if entry.chain == self.chain => {
                entry.settled = true;
                std::mem::take(&mut entry.joined)
            }
            _ => Vec::new(),
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        // A newer chain for the same key is not ours to remove
        if registry.get(&self.key).is_some_and(|entry| entry.chain == self.chain) {
            registry.remove(&self.key);
        }
    }
}

/// What [`Coordinator::request`] did with a request.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// The payload was already cached. No fetch was created.
    ///
    /// With [`CacheHitDelivery::Immediate`] the requester has already been
    /// delivered to and `apply` is `None`. With
    /// [`CacheHitDelivery::ApplyContext`], `apply` is the task that will
    /// deliver after re-checking the reuse guard.
    Cached { apply: Option<TaskHandle> },

    /// A chain for the key was already in flight; no new fetch was created.
    /// Under [`CoalescePolicy::FanOut`] this requester is delivered to when
    /// that chain's apply step runs.
    Joined { fetch: TaskHandle },

    /// A new chain was submitted.
    Scheduled(Chain),
}

impl RequestOutcome {
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached { .. })
    }

    pub fn is_joined(&self) -> bool {
        matches!(self, Self::Joined { .. })
    }

    /// The chain, if this request started one.
    pub fn chain(&self) -> Option<&Chain> {
        match self {
            Self::Scheduled(chain) => Some(chain),
            _ => None,
        }
    }
}

/// Handles to the three tasks of one fetch chain.
#[derive(Clone)]
pub struct Chain {
    key: ResourceKey,
    fetch: TaskHandle,
    store: TaskHandle,
    apply: TaskHandle,
    result: FetchResult,
    outcome: OutcomeSlot,
}

impl Chain {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn fetch(&self) -> &TaskHandle {
        &self.fetch
    }

    pub fn store(&self) -> &TaskHandle {
        &self.store
    }

    pub fn apply(&self) -> &TaskHandle {
        &self.apply
    }

    /// The fetch task's result slot.
    pub fn result(&self) -> FetchResult {
        self.result.clone()
    }

    /// Cancel the fetch. Cache-store then stores nothing and apply delivers
    /// nothing, but both still run to completion.
    pub fn cancel(&self) {
        self.fetch.cancel();
    }

    /// Resolves once every task in the chain has finished.
    pub fn finished(&self) -> impl Future<Output = ()> + Send + 'static {
        let fetch = self.fetch.finished();
        let store = self.store.finished();
        let apply = self.apply.finished();
        async move {
            futures::join!(fetch, store, apply);
        }
    }

    /// Waits for the chain and reports whether the original requester was
    /// delivered to, and if not, why.
    pub fn outcome(&self) -> impl Future<Output = Result<(), Undelivered>> + Send + 'static {
        let finished = self.finished();
        let outcome = Arc::clone(&self.outcome);
        async move {
            finished.await;
            // An apply step that never ran leaves the slot empty
            outcome.lock().clone().unwrap_or(Err(Undelivered::Cancelled))
        }
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("key", &self.key)
            .field("fetch", &self.fetch)
            .field("store", &self.store)
            .field("apply", &self.apply)
            .finish()
    }
}

struct Inner {
    config: CoordinatorConfig,
    cache: Arc<dyn Cache>,
    transport: Arc<dyn Transport>,
    scheduler: Scheduler,
    registry: Registry,
    next_chain: AtomicU64,
}

/// Serves payload requests from the cache, coalesces concurrent requests for
/// the same key, and schedules fetch chains for everything else.
///
/// Cloning yields another handle to the same coordinator.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use mediafetch::{
///     requester_fn, Coordinator, CoordinatorConfig, MemoryCache, ResourceKey, Scheduler,
///     TransportError,
/// };
///
/// # async {
/// let transport = |_key: ResourceKey| async { Ok::<_, TransportError>(Bytes::from_static(b"..")) };
/// let coordinator = Coordinator::new(
///     CoordinatorConfig::default(),
///     Arc::new(transport),
///     Arc::new(MemoryCache::new()),
///     Scheduler::new(|fut| { tokio::spawn(fut); }),
/// );
///
/// let outcome = coordinator.request(
///     "https://example.com/a.png",
///     requester_fn(|| true, |key, payload| println!("{key}: {} bytes", payload.len())),
/// );
/// if let Some(chain) = outcome.chain() {
///     chain.finished().await;
/// }
/// # };
/// ```
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        cache: Arc<dyn Cache>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                cache,
                transport,
                scheduler,
                registry: Arc::new(Mutex::new(HashMap::new())),
                next_chain: AtomicU64::new(0),
            }),
        }
    }

    /// Request the payload for `key` on behalf of `requester`.
    ///
    /// Never blocks on the network. Delivery, if any, happens through
    /// [`Requester::deliver`]; failures are only visible as the absence of a
    /// delivery (and through [`Chain::outcome`]).
    pub fn request<R: Requester>(&self, key: impl Into<ResourceKey>, requester: R) -> RequestOutcome {
        let key = key.into();
        let requester: Arc<dyn Requester> = Arc::new(requester);

        if let Some(payload) = self.inner.cache.lookup(&key) {
            return self.serve_cached(key, payload, requester);
        }

        let mut registry = self.inner.registry.lock();

        // The previous chain may have been applied since the first lookup
        if let Some(payload) = self.inner.cache.lookup(&key) {
            drop(registry);
            return self.serve_cached(key, payload, requester);
        }

        let settled = match registry.get_mut(&key) {
            Some(entry) if !entry.settled => {
                let fetch = entry.fetch.clone();
                match self.inner.config.coalesce {
                    CoalescePolicy::FirstRequester => {
                        #[cfg(feature = "tracing")]
                        debug!(%key, fetch_id = fetch.id().as_usize(), "fetch already in flight; not joining");
                    }
                    CoalescePolicy::FanOut => {
                        #[cfg(feature = "tracing")]
                        debug!(%key, fetch_id = fetch.id().as_usize(), "joining in-flight fetch");
                        entry.joined.push(requester);
                    }
                }
                return RequestOutcome::Joined { fetch };
            }
            Some(entry) => entry.settled_payload(),
            None => None,
        };

        // Applied but not yet stored. A settled chain without a payload is
        // done fetching, so a fresh chain may replace its entry.
        if let Some(payload) = settled {
            drop(registry);
            return self.serve_cached(key, payload, requester);
        }

        let chain_id = self.inner.next_chain.fetch_add(1, Ordering::Relaxed);
        let fetch_task = FetchTask::new(key.clone(), Arc::clone(&self.inner.transport));
        let result = fetch_task.result();
        let outcome: OutcomeSlot = Arc::default();
        let registration = Arc::new(Registration {
            registry: Arc::clone(&self.inner.registry),
            key: key.clone(),
            chain: chain_id,
        });

        let mut batch = self.inner.scheduler.batch();
        let fetch = batch.add_task(fetch_task).handle();

        let store = batch
            .add_task(block_fn({
                let cache = Arc::clone(&self.inner.cache);
                let key = key.clone();
                let fetch = fetch.clone();
                let result = result.clone();
                let registration = Arc::clone(&registration);
                move |_: &TaskHandle| {
                    let _registration = registration;
                    if fetch.is_cancelled() {
                        return;
                    }
                    if let Some(payload) = result.payload() {
                        cache.store(key, payload);
                    }
                }
            }))
            .depends_on(&fetch)
            .handle();

        let apply = batch
            .add_task(block_fn({
                let fetch = fetch.clone();
                let result = result.clone();
                let outcome = Arc::clone(&outcome);
                move |_: &TaskHandle| {
                    let joined = registration.settle();
                    let key = &registration.key;

                    let payload = if fetch.is_cancelled() {
                        Err(Undelivered::Cancelled)
                    } else if let Some(payload) = result.payload() {
                        Ok(payload)
                    } else if let Some(err) = result.error() {
                        Err(Undelivered::Transport(err))
                    } else {
                        Err(Undelivered::Cancelled)
                    };

                    *outcome.lock() = Some(deliver(key, requester.as_ref(), &payload));
                    for requester in joined {
                        // No outcome slot for joined requesters; stale ones are logged in deliver
                        deliver(key, requester.as_ref(), &payload).ok();
                    }
                }
            }))
            .depends_on(&fetch)
            .on(ExecContext::Apply)
            .handle();

        registry.insert(
            key.clone(),
            InFlight {
                chain: chain_id,
                fetch: fetch.clone(),
                result: result.clone(),
                settled: false,
                joined: Vec::new(),
            },
        );
        drop(registry);

        #[cfg(feature = "tracing")]
        debug!(%key, fetch_id = fetch.id().as_usize(), "scheduling fetch chain");

        batch.submit();

        RequestOutcome::Scheduled(Chain {
            key,
            fetch,
            store,
            apply,
            result,
            outcome,
        })
    }

    fn serve_cached(&self, key: ResourceKey, payload: Bytes, requester: Arc<dyn Requester>) -> RequestOutcome {
        match self.inner.config.cache_hit_delivery {
            CacheHitDelivery::Immediate => {
                #[cfg(feature = "tracing")]
                debug!(%key, "cache hit; delivering immediately");
                requester.deliver(&key, payload);
                RequestOutcome::Cached { apply: None }
            }
            CacheHitDelivery::ApplyContext => {
                #[cfg(feature = "tracing")]
                debug!(%key, "cache hit; delivering on apply context");
                let apply = self.inner.scheduler.spawn_on(
                    ExecContext::Apply,
                    block_fn(move |_: &TaskHandle| {
                        // Nobody awaits a cache-hit outcome; stale ones are logged in deliver
                        deliver(&key, requester.as_ref(), &Ok(payload)).ok();
                    }),
                );
                RequestOutcome::Cached { apply: Some(apply) }
            }
        }
    }

    /// Cancel the in-flight fetch for `key`. Returns `false` if nothing was
    /// in flight, or if the chain has already been applied.
    ///
    /// The chain still runs to completion and clears its registry entry;
    /// nothing is cached and nothing is delivered.
    pub fn cancel(&self, key: &ResourceKey) -> bool {
        let fetch = self
            .inner
            .registry
            .lock()
            .get(key)
            .filter(|entry| !entry.settled)
            .map(|entry| entry.fetch.clone());
        match fetch {
            Some(fetch) => {
                #[cfg(feature = "tracing")]
                debug!(%key, fetch_id = fetch.id().as_usize(), "cancelling fetch");
                fetch.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight fetch. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let fetches: Vec<TaskHandle> = self
            .inner
            .registry
            .lock()
            .values()
            .filter(|entry| !entry.settled)
            .map(|entry| entry.fetch.clone())
            .collect();

        #[cfg(feature = "tracing")]
        debug!(count = fetches.len(), "cancelling all fetches");

        for fetch in &fetches {
            fetch.cancel();
        }
        fetches.len()
    }

    /// Read the cache without requesting anything.
    pub fn lookup(&self, key: &ResourceKey) -> Option<Bytes> {
        self.inner.cache.lookup(key)
    }

    /// Number of keys with a chain in flight.
    pub fn in_flight_len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn is_in_flight(&self, key: &ResourceKey) -> bool {
        self.inner.registry.lock().contains_key(key)
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.inner.cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.inner.config)
            .field("cached", &self.inner.cache.len())
            .field("in_flight", &self.in_flight_len())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

/// Re-validate the requester and hand it the payload. Runs on the apply context.
fn deliver(
    key: &ResourceKey,
    requester: &dyn Requester,
    payload: &Result<Bytes, Undelivered>,
) -> Result<(), Undelivered> {
    let payload = payload.clone()?;
    if !requester.still_current() {
        #[cfg(feature = "tracing")]
        debug!(%key, "requester is no longer current; dropping payload");
        return Err(Undelivered::StaleRequester);
    }
    requester.deliver(key, payload);
    Ok(())
}
