//! Shared plumbing for the integration tests: a single-threaded runtime
//! harness, an engine driver, and pinned aligned memory for maps.

use doca_async::ProgressEngine;
use std::alloc::Layout;
use std::future::Future;
use std::sync::Once;

/// Initializes tracing from `RUST_LOG` once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Runs a future on a fresh current-thread runtime inside a `LocalSet`,
/// the only runtime shape the engine supports.
pub fn block_on<F: Future>(future: F) -> F::Output {
    init_tracing();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime construction");
    let local = tokio::task::LocalSet::new();
    rt.block_on(local.run_until(future))
}

/// Drives the engine in the background while the user future runs, then
/// cancels the driver. The analog of spawning a reactor task with a cancel
/// flag.
pub async fn drive<T>(engine: &ProgressEngine, user: impl Future<Output = T>) -> T {
    let driver = engine.clone();
    let runner = tokio::task::spawn_local(async move {
        let _ = driver.run_while(|| true).await;
    });
    let result = user.await;
    runner.abort();
    let _ = runner.await;
    result
}

/// Pinned, 64-byte-aligned, zero-initialized host memory for memory maps.
/// The bytes stay put until drop, which is what a map requires.
pub struct AlignedRegion {
    ptr: *mut u8,
    layout: Layout,
}

impl AlignedRegion {
    pub fn zeroed(len: usize) -> AlignedRegion {
        let layout = Layout::from_size_align(len.max(1), 64).expect("valid layout");
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!ptr.is_null(), "allocation failure");
        AlignedRegion { ptr, layout }
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len()) }
    }
}

impl Drop for AlignedRegion {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr, self.layout) };
    }
}
