//! The fetch task: one network retrieval for one resource key.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::task::{Task, TaskHandle};
use crate::transport::Transport;
use crate::types::ResourceKey;

/// Shared result slot of a [`FetchTask`].
///
/// Empty until the fetch finishes. Afterwards it holds exactly one of a
/// payload or an error, or stays empty if the fetch was cancelled. Dependent
/// tasks read it directly; they never go through the cache.
#[derive(Clone, Default)]
pub struct FetchResult {
    slot: Arc<Mutex<Option<Result<Bytes, TransportError>>>>,
}

impl FetchResult {
    pub fn payload(&self) -> Option<Bytes> {
        match &*self.slot.lock() {
            Some(Ok(payload)) => Some(payload.clone()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<TransportError> {
        match &*self.slot.lock() {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// `true` once a payload or an error has been recorded.
    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }

    fn set(&self, result: Result<Bytes, TransportError>) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(result);
        }
    }
}

impl std::fmt::Debug for FetchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.slot.lock() {
            None => f.write_str("FetchResult(<empty>)"),
            Some(Ok(payload)) => write!(f, "FetchResult({} bytes)", payload.len()),
            Some(Err(err)) => write!(f, "FetchResult({err})"),
        }
    }
}

/// Retrieves the payload for a resource key through a [`Transport`].
///
/// Cancelling the task's handle drops the transport future, which aborts the
/// call. A cancelled fetch records neither payload nor error. Transport
/// failures are logged and recorded; they never propagate further.
pub struct FetchTask {
    key: ResourceKey,
    transport: Arc<dyn Transport>,
    result: FetchResult,
}

impl FetchTask {
    pub fn new(key: impl Into<ResourceKey>, transport: Arc<dyn Transport>) -> Self {
        Self {
            key: key.into(),
            transport,
            result: FetchResult::default(),
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// The slot this task will fill. Clone it before submitting the task.
    pub fn result(&self) -> FetchResult {
        self.result.clone()
    }
}

impl Task for FetchTask {
    fn run(self: Box<Self>, handle: TaskHandle) -> BoxFuture<'static, ()> {
        let FetchTask {
            key,
            transport,
            result,
        } = *self;

        async move {
            if handle.is_cancelled() {
                return;
            }

            #[cfg(feature = "tracing")]
            trace!(task_id = handle.id().as_usize(), %key, "issuing fetch");

            let (abort, registration) = AbortHandle::new_pair();
            handle.set_abort(abort);
            let response = Abortable::new(transport.fetch(&key), registration).await;

            if handle.is_cancelled() {
                #[cfg(feature = "tracing")]
                debug!(task_id = handle.id().as_usize(), %key, "fetch cancelled");
                return;
            }

            match response {
                Ok(Ok(payload)) => {
                    #[cfg(feature = "tracing")]
                    trace!(%key, bytes = payload.len(), "fetch succeeded");
                    result.set(Ok(payload));
                }
                Ok(Err(err)) => {
                    #[cfg(feature = "tracing")]
                    warn!(%key, error = %err, "error fetching data");
                    result.set(Err(err));
                }
                // Aborted without the flag is impossible: only cancel() fires the hook
                Err(_aborted) => {}
            }
        }
        .boxed()
    }
}
