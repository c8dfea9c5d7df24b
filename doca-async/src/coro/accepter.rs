use super::{Receptacle, ValueFuture};
use crate::error::Error;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;

/// Single-consumer FIFO coupling spontaneous SDK events to awaiting tasks.
///
/// At any moment at most one of the two internal queues is non-empty:
/// payloads that arrived with no accepter waiting, or accepters that arrived
/// with no payload pending. Payloads are delivered to waiters in arrival
/// order and accepters are served in arrival order.
///
/// `W` is the type delivered to consumers; it defaults to the stored payload
/// type and exists so scoped wrappers can be emitted while raw owning types
/// are stored (e.g. server connections delivered pre-wrapped for automatic
/// disconnection).
///
/// Disconnection is sticky. Pending waiters are failed with `NotConnected`
/// and later accepts fail the same way once the payload queue is drained;
/// payloads buffered before the disconnect are retained for late consumers.
pub struct AccepterQueue<T, W = T> {
    inner: RefCell<Inner<T, W>>,
    _wrapper: PhantomData<W>,
}

struct Inner<T, W> {
    payloads: VecDeque<T>,
    waiters: VecDeque<Rc<Receptacle<W>>>,
    disconnected: bool,
}

impl<T, W> AccepterQueue<T, W>
where
    W: From<T>,
{
    pub fn new() -> Self {
        AccepterQueue {
            inner: RefCell::new(Inner {
                payloads: VecDeque::new(),
                waiters: VecDeque::new(),
                disconnected: false,
            }),
            _wrapper: PhantomData,
        }
    }

    /// Takes the next payload, or suspends until one is supplied. After a
    /// disconnect, buffered payloads are still handed out; once they are
    /// gone the future resolves to `NotConnected`.
    pub fn accept(&self) -> ValueFuture<W> {
        let mut inner = self.inner.borrow_mut();
        if let Some(payload) = inner.payloads.pop_front() {
            return ValueFuture::from_value(W::from(payload));
        }
        if inner.disconnected {
            return ValueFuture::from_error(Error::NotConnected);
        }
        let future = ValueFuture::create_space();
        inner.waiters.push_back(future.receptacle().clone());
        future
    }

    /// Hands a payload to the oldest waiter, or buffers it.
    pub fn supply(&self, payload: T) {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            match inner.waiters.pop_front() {
                Some(waiter) => Some(waiter),
                None => {
                    inner.payloads.push_back(payload);
                    return;
                }
            }
        };
        if let Some(waiter) = waiter {
            waiter.fulfill(W::from(payload));
        }
    }

    /// Terminates the stream: every pending waiter observes `NotConnected`
    /// and the flag never clears. Reuse requires a fresh queue.
    pub fn disconnect(&self) {
        let waiters = {
            let mut inner = self.inner.borrow_mut();
            inner.disconnected = true;
            std::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            waiter.fail(Error::NotConnected);
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.borrow().disconnected
    }

    pub fn pending_payloads(&self) -> usize {
        self.inner.borrow().payloads.len()
    }
}

impl<T, W> Default for AccepterQueue<T, W>
where
    W: From<T>,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        rt.block_on(local.run_until(future))
    }

    #[test]
    fn supply_before_accept_preserves_order() {
        block_on(async {
            let queue = AccepterQueue::<u32>::new();
            queue.supply(1);
            queue.supply(2);
            queue.supply(3);
            assert_eq!(queue.accept().await, Ok(1));
            assert_eq!(queue.accept().await, Ok(2));
            assert_eq!(queue.accept().await, Ok(3));
        });
    }

    #[test]
    fn accept_before_supply_serves_waiters_in_order() {
        block_on(async {
            let queue = Rc::new(AccepterQueue::<u32>::new());
            let first = tokio::task::spawn_local({
                let queue = queue.clone();
                async move { queue.accept().await }
            });
            tokio::task::yield_now().await;
            let second = tokio::task::spawn_local({
                let queue = queue.clone();
                async move { queue.accept().await }
            });
            tokio::task::yield_now().await;

            queue.supply(10);
            queue.supply(20);
            assert_eq!(first.await.unwrap(), Ok(10));
            assert_eq!(second.await.unwrap(), Ok(20));
        });
    }

    #[test]
    fn disconnect_fails_waiters_and_later_accepts() {
        block_on(async {
            let queue = Rc::new(AccepterQueue::<u32>::new());
            let waiter = tokio::task::spawn_local({
                let queue = queue.clone();
                async move { queue.accept().await }
            });
            tokio::task::yield_now().await;

            queue.disconnect();
            assert_eq!(waiter.await.unwrap(), Err(Error::NotConnected));
            assert_eq!(queue.accept().await, Err(Error::NotConnected));
        });
    }

    #[test]
    fn payloads_buffered_before_disconnect_are_retained() {
        block_on(async {
            let queue = AccepterQueue::<u32>::new();
            queue.supply(7);
            queue.disconnect();
            // a late consumer still drains the buffered payload
            assert_eq!(queue.accept().await, Ok(7));
            assert_eq!(queue.accept().await, Err(Error::NotConnected));
        });
    }

    #[test]
    fn supply_after_disconnect_waits_for_a_late_accept() {
        block_on(async {
            let queue = AccepterQueue::<u32>::new();
            queue.disconnect();
            queue.supply(42);
            assert_eq!(queue.pending_payloads(), 1);
            assert_eq!(queue.accept().await, Ok(42));
        });
    }
}
