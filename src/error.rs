//! Error types for fetch chains.
//!
//! Nothing here is ever thrown across the fetch → apply boundary. A
//! [`TransportError`] is recorded on the [`crate::FetchResult`] and logged;
//! [`Undelivered`] explains, for diagnostics only, why a chain ended without
//! handing a payload to its requester.

use thiserror::Error;

/// Failure reported by a [`crate::Transport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The remote end could not be reached.
    #[error("resource unreachable: {0}")]
    Unreachable(String),

    /// The remote end answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The transport reported that the response carried no body at all.
    ///
    /// A body of zero bytes is a valid payload, not this error.
    #[error("no data returned")]
    Empty,

    /// Any other transport specific failure.
    #[error("{0}")]
    Other(String),
}

/// Why a chain finished without delivering a payload.
///
/// The requester itself never sees this; it only observes the absence of a
/// delivery. It is exposed through [`crate::Chain::outcome`] so hosts and
/// tests can tell the three cases apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Undelivered {
    /// The fetch failed; nothing was produced.
    #[error("fetch failed: {0}")]
    Transport(#[from] TransportError),

    /// The fetch (or the apply step) was cancelled before it produced anything.
    #[error("fetch was cancelled")]
    Cancelled,

    /// The reuse guard rejected the delivery: the requester moved on.
    #[error("requester is no longer current")]
    StaleRequester,
}
