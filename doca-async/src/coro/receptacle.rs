use crate::error::{Error, Result};
use std::cell::RefCell;
use std::rc::Rc;
use std::task::Waker;

enum Slot<T> {
    Empty,
    Value(T),
    Failed(Error),
    Taken,
}

struct Inner<T> {
    slot: Slot<T>,
    waiter: Option<Waker>,
}

/// Single-shot meeting point between a completion callback and at most one
/// waiting task.
///
/// The receptacle is shared between the future that awaits it and the
/// in-flight SDK task that carries a raw reference to it as user-data, so
/// dropping the future mid-flight leaves the callback a live slot to write
/// into.
pub(crate) struct Receptacle<T> {
    inner: RefCell<Inner<T>>,
}

impl<T> Receptacle<T> {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Receptacle {
            inner: RefCell::new(Inner {
                slot: Slot::Empty,
                waiter: None,
            }),
        })
    }

    pub(crate) fn with_value(value: T) -> Rc<Self> {
        let rx = Self::new();
        rx.inner.borrow_mut().slot = Slot::Value(value);
        rx
    }

    pub(crate) fn with_error(error: Error) -> Rc<Self> {
        let rx = Self::new();
        rx.inner.borrow_mut().slot = Slot::Failed(error);
        rx
    }

    pub(crate) fn has_outcome(&self) -> bool {
        !matches!(self.inner.borrow().slot, Slot::Empty)
    }

    /// Stores the value without waking; completion callbacks use this so the
    /// wake happens exactly once at the end of the callback.
    pub(crate) fn set_value(&self, value: T) {
        self.inner.borrow_mut().slot = Slot::Value(value);
    }

    pub(crate) fn set_error(&self, error: Error) {
        self.inner.borrow_mut().slot = Slot::Failed(error);
    }

    /// Wakes the registered waiter, if any. A missing waiter is not an
    /// error: the awaiting future may have been dropped mid-flight.
    pub(crate) fn wake(&self) {
        let waker = self.inner.borrow_mut().waiter.take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn fulfill(&self, value: T) {
        self.set_value(value);
        self.wake();
    }

    pub(crate) fn fail(&self, error: Error) {
        self.set_error(error);
        self.wake();
    }

    /// Registers a waiter. Re-registration from the same task replaces the
    /// stored waker; a second distinct task observes `InUse`.
    pub(crate) fn register(&self, waker: &Waker) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if let Some(existing) = &inner.waiter {
            if !existing.will_wake(waker) {
                return Err(Error::InUse);
            }
        }
        inner.waiter = Some(waker.clone());
        Ok(())
    }

    /// Consumes the outcome. An empty or already-consumed receptacle yields
    /// `Error::Empty`.
    pub(crate) fn take(&self) -> Result<T> {
        let mut inner = self.inner.borrow_mut();
        match std::mem::replace(&mut inner.slot, Slot::Taken) {
            Slot::Value(value) => Ok(value),
            Slot::Failed(error) => Err(error),
            Slot::Empty | Slot::Taken => Err(Error::Empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::{RawWaker, RawWakerVTable, Waker};

    fn waker(tag: usize) -> Waker {
        fn clone(data: *const ()) -> RawWaker {
            RawWaker::new(data, &VTABLE)
        }
        fn noop(_: *const ()) {}
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        unsafe { Waker::from_raw(RawWaker::new(tag as *const (), &VTABLE)) }
    }

    #[test]
    fn outcome_is_single_shot() {
        let rx = Receptacle::with_value(7usize);
        assert_eq!(rx.take(), Ok(7));
        assert_eq!(rx.take(), Err(Error::Empty));
    }

    #[test]
    fn empty_receptacle_reports_empty() {
        let rx = Receptacle::<u32>::new();
        assert!(!rx.has_outcome());
        assert_eq!(rx.take(), Err(Error::Empty));
    }

    #[test]
    fn second_distinct_waiter_is_rejected() {
        let rx = Receptacle::<u32>::new();
        let first = waker(1);
        let second = waker(2);
        assert!(rx.register(&first).is_ok());
        // same task polling again may replace its own waker
        assert!(rx.register(&first).is_ok());
        assert_eq!(rx.register(&second), Err(Error::InUse));
    }

    #[test]
    fn wake_clears_the_waiter() {
        let rx = Receptacle::<u32>::new();
        let first = waker(1);
        rx.register(&first).unwrap();
        rx.fulfill(3);
        // waiter slot is free again after the wake
        let second = waker(2);
        assert!(rx.register(&second).is_ok());
        assert_eq!(rx.take(), Ok(3));
    }
}
