//! The progress engine: a single-threaded cooperative driver for the SDK
//! event engine, integrated with tokio through the engine's notification
//! descriptor.

use crate::coro::Receptacle;
use crate::ctx::{ContextId, ContextOps, ContextParent, CreateCtxFuture, DependentContexts, launch};
use crate::error::{Error, Result, check};
use doca_async_sys::ffi;
use std::cell::{Cell, RefCell};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tracing::{debug, error, trace};

/// Submission retry policy. Immediate attempts run back-to-back inside
/// `submit_task`; once they are exhausted a detached fiber keeps retrying on
/// a timer. This is the system's only back-pressure mechanism against SDK
/// queue exhaustion.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub immediate_submission_attempts: u32,
    pub resubmission_attempts: u32,
    pub resubmission_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            immediate_submission_attempts: 16,
            resubmission_attempts: 16,
            resubmission_interval: Duration::from_millis(1),
        }
    }
}

/// Borrowed notification descriptor; the SDK owns and closes it.
struct NotificationFd(RawFd);

impl AsRawFd for NotificationFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Driver of one SDK progress engine and parent of its top-level contexts.
///
/// Strictly single-threaded: every task submission, state change, and
/// completion callback runs on the executor thread polling [`run`]. Clones
/// share the same engine.
///
/// [`run`]: ProgressEngine::run
#[derive(Clone)]
pub struct ProgressEngine {
    inner: Rc<EngineInner>,
}

pub(crate) struct EngineInner {
    weak_self: Weak<EngineInner>,
    pe: Cell<*mut ffi::doca_pe>,
    cfg: EngineConfig,
    pub(crate) children: DependentContexts,
    notification: RefCell<Option<AsyncFd<NotificationFd>>>,
}

impl ProgressEngine {
    /// Creates the SDK engine and registers its notification descriptor
    /// with the current tokio reactor. Must be called from within a runtime.
    pub fn new(cfg: EngineConfig) -> Result<ProgressEngine> {
        let mut pe = std::ptr::null_mut();
        check(unsafe { ffi::doca_pe_create(&mut pe) })?;

        let mut fd: ffi::doca_event_handle_t = ffi::doca_event_invalid_handle;
        let err = unsafe { ffi::doca_pe_get_notification_handle(pe, &mut fd) };
        if err != ffi::DOCA_SUCCESS {
            unsafe { ffi::doca_pe_destroy(pe) };
            return Err(Error::from_raw(err));
        }

        let notification = match AsyncFd::with_interest(NotificationFd(fd), Interest::READABLE) {
            Ok(notification) => notification,
            Err(io) => {
                error!(%io, "could not register engine notification handle");
                unsafe { ffi::doca_pe_destroy(pe) };
                return Err(Error::OperatingSystem);
            }
        };

        let inner = Rc::new_cyclic(|weak_self| EngineInner {
            weak_self: weak_self.clone(),
            pe: Cell::new(pe),
            cfg,
            children: DependentContexts::new(),
            notification: RefCell::new(Some(notification)),
        });
        Ok(ProgressEngine { inner })
    }

    /// Main event loop: waits for the SDK's readiness edge and drains
    /// progress until no work remains, for as long as any context is
    /// attached. Notification arming and clearing are strictly paired
    /// around each wait so edges cannot be lost.
    pub async fn run(&self) -> Result<()> {
        let inner = self.inner.clone();
        self.run_while(move || !inner.children.is_empty()).await
    }

    /// Main event loop with a custom loop condition. The condition is
    /// re-evaluated after every drain.
    pub async fn run_while(&self, mut condition: impl FnMut() -> bool) -> Result<()> {
        while condition() {
            self.inner.request_notification()?;

            {
                let notification = self.inner.notification.borrow();
                let Some(notification) = notification.as_ref() else {
                    return Err(Error::Shutdown);
                };
                let mut guard = notification.readable().await.map_err(|io| {
                    error!(%io, "engine notification handle failed");
                    Error::OperatingSystem
                })?;
                self.inner.clear_notification()?;
                guard.clear_ready();
            }

            while unsafe { ffi::doca_pe_progress(self.inner.pe()) } > 0 {}
        }
        debug!("engine run loop exiting");
        Ok(())
    }

    /// Re-posts the calling task to the executor tail without yielding to
    /// the SDK; used to break up long task chains.
    pub async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }

    /// Timer future on the executor's clock. Does not cancel any SDK work.
    pub async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }

    /// Number of tasks currently in flight on the SDK engine.
    pub fn inflight_tasks(&self) -> Result<usize> {
        let mut num = 0usize;
        check(unsafe { ffi::doca_pe_get_num_inflight_tasks(self.inner.pe(), &mut num) })?;
        Ok(num)
    }

    pub(crate) fn inner(&self) -> &Rc<EngineInner> {
        &self.inner
    }

    /// Builds a top-level context and launches it on this engine.
    pub(crate) fn create_context<T: ContextOps>(
        &self,
        pre_connected: bool,
        build: impl FnOnce(crate::ctx::ContextCore) -> Result<Rc<T>>,
    ) -> Result<CreateCtxFuture<T>> {
        let parent: Rc<dyn ContextParent> = self.inner.clone();
        let core = crate::ctx::ContextCore::new(
            Rc::downgrade(&self.inner),
            Rc::downgrade(&parent),
        );
        let ctx = build(core)?;
        launch(&self.inner, &self.inner.children, ctx, pre_connected)
    }
}

impl EngineInner {
    pub(crate) fn pe(&self) -> *mut ffi::doca_pe {
        self.pe.get()
    }

    fn request_notification(&self) -> Result<()> {
        check(unsafe { ffi::doca_pe_request_notification(self.pe()) })
    }

    fn clear_notification(&self) -> Result<()> {
        check(unsafe { ffi::doca_pe_clear_notification(self.pe(), 0) })
    }

    /// Submits a task with the configured retry ladder. Terminal failures
    /// free the task, reclaim its user-data reference, and report the error
    /// through `reportee`.
    pub(crate) fn submit_task<Extra: 'static>(
        &self,
        task: *mut ffi::doca_task,
        reportee: Rc<Receptacle<Extra>>,
    ) {
        let mut err = unsafe { ffi::doca_task_submit(task) };
        let mut attempts: u32 = 1;
        while err == ffi::DOCA_ERROR_AGAIN && attempts <= self.cfg.immediate_submission_attempts {
            err = unsafe { ffi::doca_task_submit(task) };
            attempts += 1;
        }

        match err {
            ffi::DOCA_SUCCESS => {}
            ffi::DOCA_ERROR_AGAIN => {
                trace!("submission back-pressure, scheduling delayed resubmission");
                self.delayed_resubmission(task, reportee);
            }
            other => abandon_task(task, reportee, other),
        }
    }

    /// Detached retry fiber for a back-pressured task.
    fn delayed_resubmission<Extra: 'static>(
        &self,
        task: *mut ffi::doca_task,
        reportee: Rc<Receptacle<Extra>>,
    ) {
        let attempts = self.cfg.resubmission_attempts;
        let interval = self.cfg.resubmission_interval;
        let task = SendlessTask(task);
        tokio::task::spawn_local(async move {
            let task = task;
            let mut remaining = attempts;
            let mut err = ffi::DOCA_ERROR_AGAIN;
            while err == ffi::DOCA_ERROR_AGAIN && remaining > 0 {
                tokio::time::sleep(interval).await;
                err = unsafe { ffi::doca_task_submit(task.0) };
                remaining -= 1;
            }
            if err != ffi::DOCA_SUCCESS {
                abandon_task(task.0, reportee, err);
            }
        });
    }
}

/// Raw task pointer wrapper so the resubmission fiber can hold it across
/// awaits; the fiber never leaves the engine thread.
struct SendlessTask(*mut ffi::doca_task);

/// Frees a task that will never run and reports the error to its waiter.
/// The task's user-data still holds the strong reference handed to the SDK,
/// which has to be reclaimed here because no completion callback will.
fn abandon_task<Extra: 'static>(
    task: *mut ffi::doca_task,
    reportee: Rc<Receptacle<Extra>>,
    err: ffi::doca_error_t,
) {
    unsafe {
        let user_data = ffi::doca_task_get_user_data(task);
        let raw = user_data.ptr as *const Receptacle<Extra>;
        if !raw.is_null() {
            drop(Rc::from_raw(raw));
        }
        ffi::doca_task_free(task);
    }
    reportee.fail(Error::from_raw(err));
}

impl ContextParent for EngineInner {
    fn signal_stopped_child(&self, child: ContextId) {
        self.children.remove(child);
    }

    fn engine(&self) -> Weak<EngineInner> {
        self.weak_self.clone()
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if !self.children.is_empty() {
            error!(
                remaining = self.children.len(),
                "progress engine dropped while contexts are still attached; \
                 requesting stops and draining"
            );
            let _ = self.clear_notification();
            self.children.stop_all();
            while unsafe { ffi::doca_pe_progress(self.pe()) } > 0 {}
            if !self.children.is_empty() {
                debug!(
                    remaining = self.children.len(),
                    "contexts still attached after drain, giving up"
                );
            }
            self.children.clear();
        }

        // deregister the notification handle before the SDK closes it
        drop(self.notification.borrow_mut().take());
        unsafe { ffi::doca_pe_destroy(self.pe.replace(std::ptr::null_mut())) };
    }
}
