//! Shared settle-once result, used for asynchronous decoder init.
//!
//! A [`Promise`] is a cloneable handle onto the answer a [`Resolver`] sends
//! exactly once. It wraps a `futures` oneshot receiver in a
//! [`Shared`] future, so every clone observes the same outcome: callers can
//! block on it ([`Promise::wait`]), poll it ([`Promise::try_result`]) or
//! `.await` it.
//!
//! Dropping the resolver without settling rejects every waiter with the
//! error type's `From<Canceled>` value. [`Promise::abortable`] does the same
//! on demand through a [`Subscription`].
//!
//! Work chained with [`Promise::map`] runs on whichever thread first
//! observes the settled promise.
//!
//! ```ignore
//! let (resolver, promise) = InitPromise::pending();
//! queue.dispatch(move || {
//!     resolver.resolve(TrackType::Video);
//! })?;
//! assert_eq!(promise.wait(), Ok(TrackType::Video));
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot::{self, Canceled};
use futures::executor;
use futures::future::{self, AbortHandle, BoxFuture, FutureExt, Shared};

use crate::codec::TrackType;
use crate::error::InitError;

/// Outcome of a decoder's asynchronous init.
pub type InitPromise = Promise<TrackType, InitError>;

/// Read side of a settle-once result. Cheap to clone.
pub struct Promise<T, E> {
    inner: Shared<BoxFuture<'static, Result<T, E>>>,
}

/// Write side of a settle-once result. Settling consumes it.
pub struct Resolver<T, E> {
    sender: oneshot::Sender<Result<T, E>>,
}

/// Handle created by [`Promise::abortable`].
///
/// Disconnecting it rejects the abortable promise as canceled, even if the
/// underlying result has already arrived but nobody has observed it yet.
#[derive(Clone, Debug)]
pub struct Subscription {
    handle: AbortHandle,
}

impl Subscription {
    /// Returns `false` if it was already disconnected.
    pub fn disconnect(&self) -> bool {
        let was_connected = self.is_connected();
        self.handle.abort();
        was_connected
    }

    pub fn is_connected(&self) -> bool {
        !self.handle.is_aborted()
    }
}

impl<T: Clone, E: Clone> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<Canceled> + 'static,
{
    /// Create an unsettled promise together with its resolver.
    pub fn pending() -> (Resolver<T, E>, Self) {
        let (sender, receiver) = oneshot::channel();
        let promise = Self::from_future(
            receiver.map(|received| received.unwrap_or_else(|canceled| Err(E::from(canceled)))),
        );
        (Resolver { sender }, promise)
    }

    /// An already-resolved promise.
    pub fn resolved(value: T) -> Self {
        Self::from_future(future::ready(Ok(value)))
    }

    /// An already-rejected promise.
    pub fn rejected(error: E) -> Self {
        Self::from_future(future::ready(Err(error)))
    }

    fn from_future(future: impl Future<Output = Result<T, E>> + Send + 'static) -> Self {
        Self {
            inner: future.boxed().shared(),
        }
    }

    /// The outcome, if already settled. Never blocks.
    pub fn try_result(&self) -> Option<Result<T, E>> {
        self.inner.clone().now_or_never()
    }

    pub fn is_settled(&self) -> bool {
        self.try_result().is_some()
    }

    /// Block the calling thread until the promise settles.
    pub fn wait(&self) -> Result<T, E> {
        executor::block_on(self.inner.clone())
    }

    /// Chain `f` onto the outcome. It runs once, when the returned promise
    /// (or a clone of it) is first observed after settling.
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(Result<T, E>) -> Result<T, E> + Send + 'static,
    {
        Self::from_future(self.inner.map(f))
    }

    /// Make the promise cancellable; a disconnected subscription rejects it
    /// as canceled and `map` work chained before this point never runs.
    pub fn abortable(self) -> (Self, Subscription) {
        let (future, handle) = future::abortable(self.inner);
        let promise = Self::from_future(
            future.map(|outcome| outcome.unwrap_or_else(|_aborted| Err(E::from(Canceled)))),
        );
        (promise, Subscription { handle })
    }
}

impl<T, E> Resolver<T, E> {
    pub fn resolve(self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(self, error: E) -> bool {
        self.settle(Err(error))
    }

    /// Settle with `result`. Returns `false` if every promise was dropped.
    pub fn settle(self, result: Result<T, E>) -> bool {
        self.sender.send(result).is_ok()
    }

    /// Whether every promise has been dropped.
    pub fn is_canceled(&self) -> bool {
        self.sender.is_canceled()
    }
}

impl<T, E> Future for Promise<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl<T, E> fmt::Debug for Promise<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<Canceled> + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
