//! The network collaborator consumed by [`crate::FetchTask`].

use std::future::Future;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::TransportError;
use crate::types::ResourceKey;

/// Retrieves the bytes behind a [`ResourceKey`].
///
/// The returned future is dropped if the fetch is cancelled mid-flight, so a
/// transport aborts its in-flight call by cleaning up on drop (as HTTP client
/// futures already do).
///
/// Any `Fn(ResourceKey) -> impl Future<Output = Result<Bytes, TransportError>>`
/// closure is a transport:
///
/// ```
/// use bytes::Bytes;
/// use mediafetch::{ResourceKey, Transport, TransportError};
///
/// let transport = |key: ResourceKey| async move {
///     if key.as_str().ends_with(".png") {
///         Ok::<_, TransportError>(Bytes::from_static(b"\x89PNG"))
///     } else {
///         Err(TransportError::Status(404))
///     }
/// };
///
/// # futures::executor::block_on(async {
/// let payload = transport.fetch(&ResourceKey::from("a.png")).await.unwrap();
/// assert_eq!(&payload[..], b"\x89PNG");
/// # });
/// ```
pub trait Transport: Send + Sync + 'static {
    fn fetch(&self, key: &ResourceKey) -> BoxFuture<'static, Result<Bytes, TransportError>>;
}

impl<F, Fut> Transport for F
where
    F: Fn(ResourceKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, TransportError>> + Send + 'static,
{
    fn fetch(&self, key: &ResourceKey) -> BoxFuture<'static, Result<Bytes, TransportError>> {
        self(key.clone()).boxed()
    }
}
