//! Buffer reference-count soundness: copies increment, drops decrement, and
//! the inventory's free count recovers exactly when the last reference goes.

use doca_async::{AccessFlags, BufferInventory, Capability, Device, MemoryMap};
use doca_async_test::AlignedRegion;

fn mapped_region(len: usize) -> (AlignedRegion, MemoryMap, Device) {
    let dev = Device::find_by_capabilities(&[Capability::Dma]).expect("emulated device");
    let region = AlignedRegion::zeroed(len);
    let mmap = unsafe {
        MemoryMap::new(
            &[dev.clone()],
            region.as_mut_ptr(),
            region.len(),
            AccessFlags::LOCAL_READ_WRITE,
        )
    }
    .expect("memory map");
    (region, mmap, dev)
}

#[test]
fn last_drop_returns_descriptor_to_inventory() {
    let (_region, mmap, _dev) = mapped_region(4096);
    let inventory = BufferInventory::new(4).unwrap();
    assert_eq!(inventory.num_free().unwrap(), 4);

    let buf = inventory.buf_by_data(&mmap, 0, 1024).unwrap();
    assert_eq!(inventory.num_free().unwrap(), 3);
    assert_eq!(buf.refcount().unwrap(), 1);

    let copy = buf.clone();
    assert_eq!(copy.refcount().unwrap(), 2);
    // a clone is a refcount, not a descriptor
    assert_eq!(inventory.num_free().unwrap(), 3);

    drop(copy);
    assert_eq!(buf.refcount().unwrap(), 1);
    assert_eq!(inventory.num_free().unwrap(), 3);

    drop(buf);
    assert_eq!(inventory.num_free().unwrap(), 4);
}

#[test]
fn data_region_stays_inside_memory_region() {
    let (_region, mmap, _dev) = mapped_region(4096);
    let inventory = BufferInventory::new(4).unwrap();

    let mut buf = inventory.buf_by_memory(&mmap, 0, 2048).unwrap();
    assert_eq!(buf.data().unwrap().len(), 0);
    assert_eq!(buf.memory().unwrap().len(), 2048);

    buf.set_data(128, 512).unwrap();
    assert_eq!(buf.data().unwrap().len(), 512);

    // moving the data region never reallocates: the slice start tracks the
    // offset inside the same memory region
    let memory_base = buf.memory().unwrap().as_ptr() as usize;
    let data_base = buf.data().unwrap().as_ptr() as usize;
    assert_eq!(data_base - memory_base, 128);

    assert!(buf.set_data(2048, 1).is_err());
}

#[test]
fn duplicate_consumes_its_own_descriptor() {
    let (_region, mmap, _dev) = mapped_region(4096);
    let inventory = BufferInventory::new(2).unwrap();

    let buf = inventory.buf_by_data(&mmap, 0, 64).unwrap();
    let dup = inventory.duplicate(&buf).unwrap();
    assert_eq!(inventory.num_free().unwrap(), 0);
    // duplicates are independent references, not shared counts
    assert_eq!(buf.refcount().unwrap(), 1);
    assert_eq!(dup.refcount().unwrap(), 1);

    drop(buf);
    drop(dup);
    assert_eq!(inventory.num_free().unwrap(), 2);
}

#[test]
fn exhausted_inventory_reports_no_memory() {
    let (_region, mmap, _dev) = mapped_region(4096);
    let inventory = BufferInventory::new(1).unwrap();
    let _held = inventory.buf_by_data(&mmap, 0, 64).unwrap();
    assert!(inventory.buf_by_data(&mmap, 64, 64).is_err());
}
