//! Configuration types for the scheduler and the coordinator.
//!
//! Both structs deserialize from camelCase keys and fall back to defaults for
//! anything missing, so they can be embedded in a host's settings file.

use serde::{Deserialize, Serialize};

/// Configuration for [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// How many worker-context tasks may run at once. `None` means unbounded.
    /// Default: `None`.
    pub max_concurrent_workers: Option<usize>,
}

impl SchedulerConfig {
    /// Bound the worker pool. `0` is treated as `1`.
    pub fn with_max_concurrent_workers(mut self, max: usize) -> Self {
        self.max_concurrent_workers = Some(max.max(1));
        self
    }

    pub(crate) fn worker_limit(&self) -> Option<usize> {
        self.max_concurrent_workers.map(|max| max.max(1))
    }
}

/// What happens to requests for a key that already has a chain in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoalescePolicy {
    /// Only the requester that started the chain is delivered to. Later
    /// requesters for the same key get nothing from that chain.
    #[default]
    FirstRequester,
    /// Every requester that joined the chain is delivered to, each one
    /// re-validated through its own reuse guard.
    FanOut,
}

/// How a cache hit reaches the requester.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheHitDelivery {
    /// Deliver synchronously on the calling thread.
    #[default]
    Immediate,
    /// Deliver from the apply context, re-checking the reuse guard first.
    ApplyContext,
}

/// Configuration for [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    /// Default: [`CoalescePolicy::FirstRequester`].
    pub coalesce: CoalescePolicy,
    /// Default: [`CacheHitDelivery::Immediate`].
    pub cache_hit_delivery: CacheHitDelivery,
}

impl CoordinatorConfig {
    pub fn with_coalesce(mut self, coalesce: CoalescePolicy) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn with_cache_hit_delivery(mut self, delivery: CacheHitDelivery) -> Self {
        self.cache_hit_delivery = delivery;
        self
    }
}
