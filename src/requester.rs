//! The caller side of a request: a reuse guard plus a delivery sink.

use bytes::Bytes;

use crate::types::ResourceKey;

/// Whoever asked for a resource.
///
/// A requester is typically a display slot that gets reused for other content
/// while its fetch is in flight. The coordinator asks [`still_current`]
/// on the apply context, right before [`deliver`], and drops the payload if
/// the answer is `false`.
///
/// [`still_current`]: Requester::still_current
/// [`deliver`]: Requester::deliver
pub trait Requester: Send + Sync + 'static {
    /// Whether this request is still the one the requester cares about.
    fn still_current(&self) -> bool;

    /// Hand the payload to the caller. Runs on the apply context, except for
    /// immediate cache hits which are delivered on the requesting thread.
    fn deliver(&self, key: &ResourceKey, payload: Bytes);
}

/// A [`Requester`] built from two closures. See [`requester_fn`].
pub struct FnRequester<G, S> {
    guard: G,
    sink: S,
}

impl<G, S> Requester for FnRequester<G, S>
where
    G: Fn() -> bool + Send + Sync + 'static,
    S: Fn(&ResourceKey, Bytes) + Send + Sync + 'static,
{
    fn still_current(&self) -> bool {
        (self.guard)()
    }

    fn deliver(&self, key: &ResourceKey, payload: Bytes) {
        (self.sink)(key, payload)
    }
}

impl<G, S> std::fmt::Debug for FnRequester<G, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRequester").finish_non_exhaustive()
    }
}

/// Create a requester from a guard predicate and a sink.
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use mediafetch::{requester_fn, Requester};
///
/// let current = Arc::new(AtomicBool::new(true));
/// let requester = requester_fn(
///     {
///         let current = current.clone();
///         move || current.load(Ordering::SeqCst)
///     },
///     |key, payload| println!("{key}: {} bytes", payload.len()),
/// );
///
/// assert!(requester.still_current());
/// current.store(false, Ordering::SeqCst);
/// assert!(!requester.still_current());
/// ```
pub fn requester_fn<G, S>(guard: G, sink: S) -> FnRequester<G, S>
where
    G: Fn() -> bool + Send + Sync + 'static,
    S: Fn(&ResourceKey, Bytes) + Send + Sync + 'static,
{
    FnRequester { guard, sink }
}
