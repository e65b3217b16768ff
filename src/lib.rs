//! Async resource fetch and cache coordinator
//!
//! Loads remote resources (images, audio) for reusable display slots without
//! ever showing a slot the wrong payload. Built from four pieces:
//!
//! - a cancellable unit of work with an explicit lifecycle ([`Task`],
//!   [`TaskHandle`]);
//! - a dependency-ordered [`Scheduler`] with a concurrent worker pool and one
//!   serial apply context;
//! - a keyed [`Cache`] consulted before anything touches the network;
//! - a [`Coordinator`] that turns a request into a fetch → cache-store →
//!   apply chain, coalesces concurrent requests for the same key, and
//!   re-validates the requester through its reuse guard before delivering.
//!
//! # Features
//!
//! - **At most one fetch per key**: concurrent requests for a key in flight
//!   join the existing chain instead of starting another fetch.
//! - **Cache first**: once a payload is cached the key is never fetched again.
//! - **No stale delivery**: the apply step asks [`Requester::still_current`]
//!   on the apply context, right before delivering.
//! - **No leaks**: every chain reaches a terminal state and clears its
//!   in-flight entry, whether it succeeded, failed, was cancelled, panicked,
//!   or lost its apply context.
//! - **Runtime-agnostic**: bring your own spawner (Tokio, async-std, smol, ...).
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use mediafetch::{
//!     Coordinator, CoordinatorConfig, MemoryCache, ResourceKey, Scheduler, SlotId, SlotTable,
//!     TransportError,
//! };
//!
//! # async {
//! // Any async closure from key to bytes is a transport
//! let transport = |key: ResourceKey| async move {
//!     Ok::<_, TransportError>(Bytes::from(format!("contents of {key}")))
//! };
//!
//! let coordinator = Coordinator::new(
//!     CoordinatorConfig::default(),
//!     Arc::new(transport),
//!     Arc::new(MemoryCache::new()),
//!     Scheduler::new(|fut| { tokio::spawn(fut); }),
//! );
//!
//! // A slot asks for an image, then gets reused before the image arrives
//! let slots = SlotTable::new();
//! let outcome = coordinator.request("https://example.com/a.png", slots.bind(SlotId(0), "https://example.com/a.png"));
//! slots.bind(SlotId(0), "https://example.com/b.png");
//!
//! if let Some(chain) = outcome.chain() {
//!     chain.finished().await;
//! }
//!
//! // The stale delivery was dropped; the payload is cached for the next request
//! assert_eq!(slots.content(SlotId(0)), None);
//! assert!(coordinator.lookup(&"https://example.com/a.png".into()).is_some());
//! # };
//! ```
//!
//! # Core Concepts
//!
//! ## Task lifecycle
//!
//! `Ready → Executing → Finished`. Cancellation is cooperative: it raises a
//! flag (and fires an abort hook if the body registered one) and the body
//! returns at its next safe point. A task cancelled before it starts goes
//! straight to `Finished` without running. See [`TaskHandle`].
//!
//! ## Execution contexts
//!
//! Every task runs on an [`ExecContext`]. Fetch and cache-store steps run on
//! the worker pool; apply steps run on the single apply context, one at a
//! time, which is the only place caller-visible state is mutated. Use
//! [`Scheduler::detached`] to drive the apply context yourself, for example
//! on a UI thread.
//!
//! ## Coalescing
//!
//! A request for a key that already has a chain in flight never starts a
//! second fetch. By default ([`CoalescePolicy::FirstRequester`]) only the
//! requester that started the chain is delivered to;
//! [`CoalescePolicy::FanOut`] delivers to every joined requester that is
//! still current.
//!
//! ## Failures
//!
//! Nothing is ever thrown across the fetch → apply boundary. Transport
//! errors are logged and recorded on the [`FetchResult`]; the requester just
//! never gets a delivery and may request again. [`Chain::outcome`] tells a
//! host which of [`Undelivered`]'s cases happened.
//!
//! # Configuration
//!
//! [`SchedulerConfig`] and [`CoordinatorConfig`] deserialize from camelCase
//! keys with every field optional:
//!
//! ```
//! use mediafetch::{CacheHitDelivery, CoalescePolicy, CoordinatorConfig};
//!
//! let config: CoordinatorConfig =
//!     serde_json::from_str(r#"{ "coalesce": "fanOut" }"#).unwrap();
//! assert_eq!(config.coalesce, CoalescePolicy::FanOut);
//! assert_eq!(config.cache_hit_delivery, CacheHitDelivery::Immediate);
//! ```
//!
//! # Tracing Support
//!
//! Logging goes through the `tracing` crate behind the `tracing` feature,
//! which is enabled by default. Disable default features to compile every
//! log statement out.
//!
//! ```no_run
//! use tracing_subscriber::{fmt, EnvFilter};
//!
//! fmt()
//!     .with_env_filter(
//!         EnvFilter::try_from_default_env()
//!             .unwrap_or_else(|_| EnvFilter::new("mediafetch=debug"))
//!     )
//!     .init();
//! ```
//!
//! ## Log Levels
//!
//! - **ERROR**: task panics, lost apply context
//! - **WARN**: transport failures, unknown dependencies
//! - **DEBUG**: request routing (cache hit, coalesced, scheduled), cancellation, stale requesters
//! - **TRACE**: task dispatch, start and completion

mod builder;
mod cache;
mod config;
mod coordinator;
mod error;
mod fetch;
mod requester;
mod scheduler;
mod slot;
mod task;
mod transport;
mod types;

pub use builder::{Batch, TaskBuilder};
pub use cache::{Cache, MemoryCache};
pub use config::{CacheHitDelivery, CoalescePolicy, CoordinatorConfig, SchedulerConfig};
pub use coordinator::{Chain, Coordinator, RequestOutcome};
pub use error::{TransportError, Undelivered};
pub use fetch::{FetchResult, FetchTask};
pub use requester::{requester_fn, FnRequester, Requester};
pub use scheduler::{ApplyLoop, Scheduler};
pub use slot::{SlotId, SlotRequester, SlotTable};
pub use task::{block_fn, task_fn, BlockFn, Task, TaskFn, TaskHandle, TaskState};
pub use transport::Transport;
pub use types::{ExecContext, ResourceKey, TaskId};
