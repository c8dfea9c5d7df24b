//! Submission back-pressure: transient `again` responses are absorbed by the
//! immediate retries plus the delayed-resubmission fiber; anything beyond
//! that budget surfaces the error on the task's future.

use doca_async::{
    AccessFlags, BufferInventory, Capability, Device, Dma, EngineConfig, Error, MemoryMap,
    ProgressEngine,
};
use doca_async_test::{AlignedRegion, block_on, drive};
use std::time::Duration;

const IMMEDIATE: u32 = 4;
const DELAYED: u32 = 4;

fn config() -> EngineConfig {
    EngineConfig {
        immediate_submission_attempts: IMMEDIATE,
        resubmission_attempts: DELAYED,
        resubmission_interval: Duration::from_millis(1),
    }
}

async fn memcpy_with_backpressure(injected: u32) -> Result<(), Error> {
    let engine = ProgressEngine::new(config()).unwrap();
    let dev = Device::find_by_capabilities(&[Capability::Dma]).unwrap();
    let create = Dma::create(&engine, dev.clone(), 8).unwrap();

    drive(&engine, async move {
        let dma = create.await.unwrap();

        let mut region = AlignedRegion::zeroed(4096);
        region.as_mut_slice()[..4].copy_from_slice(b"ping");
        let mmap = unsafe {
            MemoryMap::new(
                &[dev],
                region.as_mut_ptr(),
                region.len(),
                AccessFlags::LOCAL_READ_WRITE,
            )
        }
        .unwrap();
        let inventory = BufferInventory::new(4).unwrap();
        let src = inventory.buf_by_data(&mmap, 0, 4).unwrap();
        let mut dst = inventory.buf_by_memory(&mmap, 2048, 1024).unwrap();

        doca_async_sys::testing::inject_submit_again(injected);
        let result = dma.memcpy(&src, &mut dst).await;
        if result.is_ok() {
            assert_eq!(dst.data().unwrap(), b"ping");
        }
        result.map(|_| ())
    })
    .await
}

#[test]
fn within_the_retry_budget_the_task_succeeds() {
    block_on(async {
        // the first submit plus `IMMEDIATE` retries run back to back, then
        // `DELAYED` more on the timer: k = IMMEDIATE + DELAYED still fits
        assert_eq!(memcpy_with_backpressure(IMMEDIATE + DELAYED).await, Ok(()));
    });
}

#[test]
fn beyond_the_retry_budget_the_error_surfaces() {
    block_on(async {
        let outcome = memcpy_with_backpressure(IMMEDIATE + DELAYED + 1).await;
        assert_eq!(outcome, Err(Error::Again));
    });
}

#[test]
fn no_backpressure_completes_immediately() {
    block_on(async {
        assert_eq!(memcpy_with_backpressure(0).await, Ok(()));
    });
}
