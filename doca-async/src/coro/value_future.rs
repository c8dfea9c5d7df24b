use super::Receptacle;
use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Single-shot future over a [`Receptacle`].
///
/// Resolved by whichever SDK callback owns the other side: a task
/// completion, a context state change, or an accepter-queue supply. Must be
/// awaited by at most one task; a second task polling the same underlying
/// receptacle resolves to [`Error::InUse`].
#[must_use = "futures do nothing unless awaited"]
pub struct ValueFuture<T> {
    dest: Rc<Receptacle<T>>,
}

/// Future of a task offload: the operation's status plus whatever per-task
/// payload the completion callback extracted (checksums, immediate data,
/// hotplug state). Plain status tasks use `Extra = ()`.
///
/// Operation failure arrives as the `Err` arm carrying the native status
/// code; `Error::Empty` and `Error::Unexpected` are reserved for framework
/// bugs.
pub type StatusFuture<Extra = ()> = ValueFuture<Extra>;

impl<T> ValueFuture<T> {
    /// A future with an empty receptacle for a callback to fill.
    pub(crate) fn create_space() -> Self {
        ValueFuture {
            dest: Receptacle::new(),
        }
    }

    /// An immediately-ready future.
    pub fn from_value(value: T) -> Self {
        ValueFuture {
            dest: Receptacle::with_value(value),
        }
    }

    /// An immediately-failed future.
    pub fn from_error(error: Error) -> Self {
        ValueFuture {
            dest: Receptacle::with_error(error),
        }
    }

    pub(crate) fn from_receptacle(dest: Rc<Receptacle<T>>) -> Self {
        ValueFuture { dest }
    }

    pub(crate) fn receptacle(&self) -> &Rc<Receptacle<T>> {
        &self.dest
    }
}

impl<T> Future for ValueFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.dest.has_outcome() {
            return Poll::Ready(self.dest.take());
        }
        match self.dest.register(cx.waker()) {
            Ok(()) => Poll::Pending,
            Err(error) => Poll::Ready(Err(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_constructors_resolve_without_wait() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            assert_eq!(ValueFuture::from_value(5u32).await, Ok(5));
            assert_eq!(
                ValueFuture::<u32>::from_error(Error::NotConnected).await,
                Err(Error::NotConnected)
            );
        });
    }

    #[test]
    fn suspends_until_fulfilled() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        rt.block_on(local.run_until(async {
            let fut = ValueFuture::<u32>::create_space();
            let rx = fut.receptacle().clone();
            let waiter = tokio::task::spawn_local(fut);
            tokio::task::yield_now().await;
            rx.fulfill(11);
            assert_eq!(waiter.await.unwrap(), Ok(11));
        }));
    }
}
