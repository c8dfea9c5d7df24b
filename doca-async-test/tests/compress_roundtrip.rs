//! Compress/decompress round trip with checksum agreement across both
//! directions.

use doca_async::{
    AccessFlags, BufferInventory, Capability, Compress, Device, EngineConfig, Error, MemoryMap,
    ProgressEngine,
};
use doca_async_test::{AlignedRegion, block_on, drive};

const BLOCK_COUNT: usize = 8;
const BLOCK_SIZE: usize = 64 * 1024;

#[test]
fn compress_then_decompress_restores_every_block() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::CompressDeflate]).unwrap();
        let create = Compress::create(&engine, dev.clone(), 32).unwrap();

        drive(&engine, async move {
            let compress = create.await.expect("compress context");

            // three zones: source block, compressed output, decompressed
            // output (compressed gets slack for incompressible input)
            let src_off = 0;
            let packed_off = BLOCK_SIZE;
            let unpacked_off = packed_off + 2 * BLOCK_SIZE;
            let mut region = AlignedRegion::zeroed(4 * BLOCK_SIZE);
            let mmap = unsafe {
                MemoryMap::new(
                    &[dev],
                    region.as_mut_ptr(),
                    region.len(),
                    AccessFlags::LOCAL_READ_WRITE,
                )
            }
            .unwrap();
            let inventory = BufferInventory::new(16).unwrap();

            for i in 0..BLOCK_COUNT {
                let fill = (i & 0xff) as u8;
                region.as_mut_slice()[src_off..src_off + BLOCK_SIZE].fill(fill);

                let src = inventory.buf_by_data(&mmap, src_off, BLOCK_SIZE).unwrap();
                let mut packed = inventory
                    .buf_by_memory(&mmap, packed_off, 2 * BLOCK_SIZE)
                    .unwrap();
                let mut unpacked = inventory
                    .buf_by_memory(&mmap, unpacked_off, BLOCK_SIZE)
                    .unwrap();

                let pack_sums = compress
                    .compress(&src, &mut packed)
                    .await
                    .expect("compression");
                assert!(packed.data().unwrap().len() < BLOCK_SIZE);

                let unpack_sums = compress
                    .decompress(&packed, &mut unpacked)
                    .await
                    .expect("decompression");

                assert_eq!(unpacked.data().unwrap(), src.data().unwrap());
                // both directions checksum the same plaintext
                assert_ne!(pack_sums.crc, 0);
                assert_ne!(pack_sums.adler, 0);
                assert_eq!(pack_sums.crc, unpack_sums.crc);
                assert_eq!(pack_sums.adler, unpack_sums.adler);
            }
        })
        .await;
    });
}

#[test]
fn undersized_output_surfaces_the_status() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::CompressDeflate]).unwrap();
        let create = Compress::create(&engine, dev.clone(), 8).unwrap();

        drive(&engine, async move {
            let compress = create.await.unwrap();
            let mut region = AlignedRegion::zeroed(8192);
            // incompressible-ish pattern into a 16-byte output window
            for (i, byte) in region.as_mut_slice()[..4096].iter_mut().enumerate() {
                *byte = (i as u8).wrapping_mul(31).wrapping_add((i >> 8) as u8);
            }
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
            let src = inventory.buf_by_data(&mmap, 0, 4096).unwrap();
            let mut dst = inventory.buf_by_memory(&mmap, 4096, 16).unwrap();

            let outcome = compress.compress(&src, &mut dst).await;
            assert_eq!(outcome, Err(Error::TooBig));
        })
        .await;
    });
}

#[test]
fn missing_capability_is_rejected_at_creation() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        // the second emulated device only carries DMA and RDMA engines
        let dev = Device::find_by_pci_addr("0000:03:00.1", &[]).unwrap();
        assert!(matches!(
            Compress::create(&engine, dev, 8),
            Err(Error::NotSupported)
        ));
    });
}
