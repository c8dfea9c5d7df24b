//! Lifecycle core shared by every offload context.
//!
//! Contexts follow the SDK state machine idle → starting → running →
//! stopping → idle. The wrapper hides *starting*: a context only becomes
//! visible to users once its start future resolved on the transition to
//! running. Stops cascade leaves-first: a parent only issues its own SDK
//! stop once its child registry has drained.
//!
//! State-change callbacks route through a boxed weak pointer stored as the
//! SDK context user-data. On the transition to idle the callback takes the
//! stop waiter out, drops the SDK handle, then notifies the parent (which
//! may release the last external reference to the context) before waking
//! the taken waiter, in that order.

use crate::coro::{Receptacle, ValueFuture};
use crate::engine::EngineInner;
use crate::error::{Error, Result, check};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use tracing::{debug, error, trace};

/// Object-safe surface every concrete context implements.
///
/// Public only because the scoped wrappers and creation futures are generic
/// over it; not part of the API. Implementations live in this crate.
#[doc(hidden)]
pub trait ContextOps: Any + 'static {
    fn core(&self) -> &ContextCore;

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx;

    /// Destroys the typed SDK handle. Called on the idle transition and
    /// from `Drop` for contexts that never started.
    fn drop_handle(&self);

    /// Hook invoked after the observed state is updated but before waiting
    /// futures resume.
    fn state_changed(&self, _prev: ffi::doca_ctx_states, _next: ffi::doca_ctx_states) {}

    /// Initiates the SDK-level stop. Contexts with children override this to
    /// defer the SDK stop until the registry drains.
    fn request_stop(&self) -> Result<()> {
        request_raw_stop(self.as_raw_ctx())
    }

    /// Number of tasks in flight on this context.
    fn inflight_tasks(&self) -> Result<usize> {
        let mut num = 0usize;
        check(unsafe { ffi::doca_ctx_get_num_inflight_tasks(self.as_raw_ctx(), &mut num) })?;
        Ok(num)
    }

    fn as_any(&self) -> &dyn Any;
}

/// Implemented by everything that can own running contexts: the progress
/// engine, connection objects, and contexts with children.
pub(crate) trait ContextParent {
    /// Called by a stopping child once it reached idle. May drop the last
    /// owning reference to the child.
    fn signal_stopped_child(&self, child: ContextId);

    fn engine(&self) -> Weak<EngineInner>;
}

pub(crate) type ContextId = usize;

pub(crate) fn context_id(ctx: &Rc<dyn ContextOps>) -> ContextId {
    Rc::as_ptr(ctx) as *const () as usize
}

pub(crate) fn request_raw_stop(raw: *mut ffi::doca_ctx) -> Result<()> {
    let err = unsafe { ffi::doca_ctx_stop(raw) };
    match err {
        ffi::DOCA_SUCCESS | ffi::DOCA_ERROR_IN_PROGRESS => Ok(()),
        other => Err(Error::from_raw(other)),
    }
}

/// Per-context lifecycle state embedded in every concrete context. Opaque
/// outside the crate; surfaced only through [`ContextOps`].
pub struct ContextCore {
    engine: Weak<EngineInner>,
    parent: Weak<dyn ContextParent>,
    state: Cell<ffi::doca_ctx_states>,
    start_rx: RefCell<Option<Rc<Receptacle<()>>>>,
    stop_rx: RefCell<Option<Rc<Receptacle<()>>>>,
    hook: Cell<*mut CtxHook>,
}

impl ContextCore {
    pub(crate) fn new(engine: Weak<EngineInner>, parent: Weak<dyn ContextParent>) -> Self {
        ContextCore {
            engine,
            parent,
            state: Cell::new(ffi::DOCA_CTX_STATE_IDLE),
            start_rx: RefCell::new(None),
            stop_rx: RefCell::new(None),
            hook: Cell::new(std::ptr::null_mut()),
        }
    }

    pub(crate) fn engine(&self) -> Result<Rc<EngineInner>> {
        self.engine.upgrade().ok_or(Error::Unexpected)
    }

    pub(crate) fn engine_weak(&self) -> Weak<EngineInner> {
        self.engine.clone()
    }

    pub(crate) fn state(&self) -> ffi::doca_ctx_states {
        self.state.get()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.get() == ffi::DOCA_CTX_STATE_RUNNING
    }

    /// Frees the callback-routing hook. Idempotent; called when the SDK
    /// handle goes away.
    pub(crate) fn release_hook(&self) {
        let hook = self.hook.replace(std::ptr::null_mut());
        if !hook.is_null() {
            drop(unsafe { Box::from_raw(hook) });
        }
    }
}

/// Routing target stored as SDK context user-data.
pub(crate) struct CtxHook {
    target: Weak<dyn ContextOps>,
}

/// Upgrades a hook pointer back to its context, if it is still alive.
pub(crate) unsafe fn hook_target(hook: *mut CtxHook) -> Option<Rc<dyn ContextOps>> {
    unsafe { (*hook).target.upgrade() }
}

/// Recovers the context behind an SDK context's user-data pointer.
pub(crate) unsafe fn resolve_ctx(raw: *mut ffi::doca_ctx) -> Option<Rc<dyn ContextOps>> {
    unsafe {
        let mut user_data = ffi::doca_data { ptr: std::ptr::null_mut() };
        if ffi::doca_ctx_get_user_data(raw, &mut user_data) != ffi::DOCA_SUCCESS {
            return None;
        }
        let hook = user_data.ptr as *mut CtxHook;
        if hook.is_null() {
            return None;
        }
        (*hook).target.upgrade()
    }
}

unsafe extern "C" fn state_changed_trampoline(
    user_data: ffi::doca_data,
    _ctx: *mut ffi::doca_ctx,
    prev_state: ffi::doca_ctx_states,
    next_state: ffi::doca_ctx_states,
) {
    let hook = unsafe { user_data.ptr } as *mut CtxHook;
    if hook.is_null() {
        return;
    }
    let Some(ctx) = (unsafe { &*hook }).target.upgrade() else {
        return;
    };
    on_state_change(ctx, prev_state, next_state);
}

fn on_state_change(
    ctx: Rc<dyn ContextOps>,
    prev: ffi::doca_ctx_states,
    next: ffi::doca_ctx_states,
) {
    trace!(prev, next, "context state change");
    ctx.core().state.set(next);
    ctx.state_changed(prev, next);

    match next {
        ffi::DOCA_CTX_STATE_RUNNING => {
            debug!("context started");
            let waiter = ctx.core().start_rx.borrow_mut().take();
            if let Some(waiter) = waiter {
                waiter.fulfill(());
            }
        }
        ffi::DOCA_CTX_STATE_IDLE => {
            debug!("context stopped");
            // take the waiter out before the parent gets a chance to drop
            // its last owning reference to us
            let waiter = ctx.core().stop_rx.borrow_mut().take();
            ctx.drop_handle();
            ctx.core().release_hook();
            if let Some(parent) = ctx.core().parent.upgrade() {
                parent.signal_stopped_child(context_id(&ctx));
            }
            if let Some(waiter) = waiter {
                waiter.fulfill(());
            }
        }
        _ => {}
    }
}

/// Initiates an SDK start and returns the future resolved on the running
/// transition. A synchronous start yields an already-ready future.
fn start(ctx: &Rc<dyn ContextOps>) -> Result<ValueFuture<()>> {
    let err = unsafe { ffi::doca_ctx_start(ctx.as_raw_ctx()) };
    match err {
        ffi::DOCA_SUCCESS => Ok(ValueFuture::from_value(())),
        ffi::DOCA_ERROR_IN_PROGRESS => {
            let future = ValueFuture::create_space();
            *ctx.core().start_rx.borrow_mut() = Some(future.receptacle().clone());
            Ok(future)
        }
        other => Err(Error::from_raw(other)),
    }
}

/// Requests a stop and returns the future resolved on the idle transition.
/// Stopping an already-idle context yields a ready future.
pub(crate) fn stop(ctx: &Rc<dyn ContextOps>) -> Result<ValueFuture<()>> {
    if ctx.core().state() == ffi::DOCA_CTX_STATE_IDLE {
        return Ok(ValueFuture::from_value(()));
    }
    let receptacle = {
        let mut slot = ctx.core().stop_rx.borrow_mut();
        slot.get_or_insert_with(Receptacle::new).clone()
    };
    ctx.request_stop().inspect_err(|_| {
        ctx.core().stop_rx.borrow_mut().take();
    })?;
    Ok(ValueFuture::from_receptacle(receptacle))
}

/// Fire-and-forget stop used by scoped wrappers and cascading parents.
pub(crate) fn stop_detached(ctx: &Rc<dyn ContextOps>) {
    match stop(ctx) {
        Ok(future) => drop(future),
        Err(err) => error!(%err, "unable to stop context"),
    }
}

// ── child registry ──────────────────────────────────────────

/// Registry of running child contexts. A child is inserted before its SDK
/// start is initiated and removed on its idle transition.
pub(crate) struct DependentContexts {
    active: RefCell<HashMap<ContextId, Rc<dyn ContextOps>>>,
}

impl DependentContexts {
    pub(crate) fn new() -> Self {
        DependentContexts {
            active: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, ctx: Rc<dyn ContextOps>) {
        self.active.borrow_mut().insert(context_id(&ctx), ctx);
    }

    pub(crate) fn remove(&self, id: ContextId) {
        self.active.borrow_mut().remove(&id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.active.borrow().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.active.borrow().len()
    }

    pub(crate) fn clear(&self) {
        self.active.borrow_mut().clear();
    }

    /// Requests a stop from every child. Children unregister themselves
    /// through `signal_stopped_child` as they reach idle.
    pub(crate) fn stop_all(&self) {
        let snapshot: Vec<Rc<dyn ContextOps>> =
            self.active.borrow().values().cloned().collect();
        for child in snapshot {
            stop_detached(&child);
        }
    }
}

// ── construction ────────────────────────────────────────────

/// Wires a freshly constructed context into the engine and starts it:
/// installs the state-change routing hook, connects the context to the
/// engine (unless the SDK created it pre-connected), registers it with its
/// parent's registry, then initiates the start.
pub(crate) fn launch<T: ContextOps>(
    engine: &Rc<EngineInner>,
    registry: &DependentContexts,
    ctx: Rc<T>,
    pre_connected: bool,
) -> Result<CreateCtxFuture<T>> {
    let as_ops: Rc<dyn ContextOps> = ctx.clone();
    let hook = Box::into_raw(Box::new(CtxHook {
        target: Rc::downgrade(&as_ops),
    }));
    ctx.core().hook.set(hook);

    let raw = ctx.as_raw_ctx();
    unsafe {
        check(ffi::doca_ctx_set_user_data(
            raw,
            ffi::doca_data {
                ptr: hook as *mut c_void,
            },
        ))?;
        check(ffi::doca_ctx_set_state_changed_cb(
            raw,
            state_changed_trampoline,
        ))?;
        if !pre_connected {
            check(ffi::doca_pe_connect_ctx(engine.pe(), raw))?;
        }
    }

    registry.insert(as_ops.clone());
    match start(&as_ops) {
        Ok(future) => Ok(CreateCtxFuture {
            future,
            ctx: Some(ctx),
        }),
        Err(err) => {
            registry.remove(context_id(&as_ops));
            Err(err)
        }
    }
}

/// Builds and launches a child context under an arbitrary parent.
pub(crate) fn create_child<T, P>(
    parent: &Rc<P>,
    registry: &DependentContexts,
    build: impl FnOnce(ContextCore) -> Result<Rc<T>>,
) -> Result<CreateCtxFuture<T>>
where
    T: ContextOps,
    P: ContextParent + 'static,
{
    let engine = parent.engine().upgrade().ok_or(Error::Unexpected)?;
    let parent_dyn: Rc<dyn ContextParent> = parent.clone();
    let core = ContextCore::new(Rc::downgrade(&engine), Rc::downgrade(&parent_dyn));
    let ctx = build(core)?;
    launch(&engine, registry, ctx, false)
}

// ── futures and scoped wrappers ─────────────────────────────

/// Future of a context state transition. Holds a strong reference to the
/// context it waits on so a context cannot disappear under a pending
/// start or stop.
#[must_use = "futures do nothing unless awaited"]
pub struct CtxStateFuture {
    future: ValueFuture<()>,
    _ctx: Rc<dyn ContextOps>,
}

impl CtxStateFuture {
    pub(crate) fn new(future: ValueFuture<()>, ctx: Rc<dyn ContextOps>) -> Self {
        CtxStateFuture { future, _ctx: ctx }
    }
}

impl Future for CtxStateFuture {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.future).poll(cx)
    }
}

/// Future of context creation: resolves to a scoped wrapper around the
/// started context.
#[must_use = "futures do nothing unless awaited"]
pub struct CreateCtxFuture<T: ContextOps> {
    future: ValueFuture<()>,
    ctx: Option<Rc<T>>,
}

impl<T: ContextOps> Future for CreateCtxFuture<T> {
    type Output = Result<ScopedContext<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.future).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => {
                let ctx = this.ctx.take().ok_or(Error::Empty);
                Poll::Ready(ctx.map(ScopedContext::new))
            }
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
        }
    }
}

/// RAII wrapper around a started context: dropping it requests a stop.
///
/// The context object itself outlives the wrapper while futures still
/// reference it; the wrapper exists to guarantee the context does not stay
/// running forever, not to control its allocation.
pub struct ScopedContext<T: ContextOps> {
    ctx: Option<Rc<T>>,
}

impl<T: ContextOps> ScopedContext<T> {
    pub(crate) fn new(ctx: Rc<T>) -> Self {
        ScopedContext { ctx: Some(ctx) }
    }

    /// Explicitly stops the context, consuming the wrapper. The returned
    /// future resolves once the context reached idle.
    pub fn stop(mut self) -> Result<CtxStateFuture> {
        let ctx = self.ctx.take().ok_or(Error::Empty)?;
        let as_ops: Rc<dyn ContextOps> = ctx;
        let future = stop(&as_ops)?;
        Ok(CtxStateFuture::new(future, as_ops))
    }

    pub(crate) fn inner(&self) -> &Rc<T> {
        self.ctx.as_ref().expect("scoped context already consumed")
    }
}

impl<T: ContextOps> std::ops::Deref for ScopedContext<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner()
    }
}

impl<T: ContextOps> Drop for ScopedContext<T> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            trace!("auto-stopping context");
            let as_ops: Rc<dyn ContextOps> = ctx;
            stop_detached(&as_ops);
        }
    }
}
