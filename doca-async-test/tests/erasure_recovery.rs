//! Erasure-coding recovery: 4 data blocks, 2 redundancy blocks, blocks 1
//! and 3 lost and reconstructed.

use doca_async::{
    AccessFlags, BufferInventory, Capability, Device, Ec, EcMatrixType, EngineConfig, MemoryMap,
    ProgressEngine,
};
use doca_async_test::{AlignedRegion, block_on, drive};

const BLOCK: usize = 64;
const DATA_BLOCKS: usize = 4;
const RDNC_BLOCKS: usize = 2;

#[test]
fn recover_two_missing_data_blocks() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::ErasureCoding]).unwrap();
        let create = Ec::create(&engine, dev.clone(), 16).unwrap();

        drive(&engine, async move {
            let ec = create.await.expect("ec context");

            // zones: data in, rdnc out, recovery in, recovery out
            let data_off = 0;
            let rdnc_off = DATA_BLOCKS * BLOCK;
            let avail_off = rdnc_off + RDNC_BLOCKS * BLOCK;
            let out_off = avail_off + DATA_BLOCKS * BLOCK;
            let mut region = AlignedRegion::zeroed(out_off + 2 * BLOCK);
            let mmap = unsafe {
                MemoryMap::new(
                    &[dev],
                    region.as_mut_ptr(),
                    region.len(),
                    AccessFlags::LOCAL_READ_WRITE,
                )
            }
            .unwrap();
            let inventory = BufferInventory::new(8).unwrap();

            // block i filled with byte i
            for i in 0..DATA_BLOCKS {
                region.as_mut_slice()[data_off + i * BLOCK..data_off + (i + 1) * BLOCK]
                    .fill(i as u8);
            }

            let coding = ec
                .coding_matrix(EcMatrixType::Cauchy, DATA_BLOCKS, RDNC_BLOCKS)
                .unwrap();
            assert_eq!(coding.data_block_count(), DATA_BLOCKS);
            assert_eq!(coding.rdnc_block_count(), RDNC_BLOCKS);

            let data = inventory
                .buf_by_data(&mmap, data_off, DATA_BLOCKS * BLOCK)
                .unwrap();
            let mut rdnc = inventory
                .buf_by_memory(&mmap, rdnc_off, RDNC_BLOCKS * BLOCK)
                .unwrap();
            ec.create(&coding, &data, &mut rdnc).await.expect("encode");
            let rdnc_bytes = rdnc.data().unwrap().to_vec();
            assert_eq!(rdnc_bytes.len(), RDNC_BLOCKS * BLOCK);

            // drop blocks 1 and 3; survivors in ascending index order are
            // blocks 0, 2 and both redundancy blocks (indices 4 and 5)
            let survivors: Vec<u8> = [
                &region.as_slice()[data_off..data_off + BLOCK],
                &region.as_slice()[data_off + 2 * BLOCK..data_off + 3 * BLOCK],
                &rdnc_bytes[..BLOCK],
                &rdnc_bytes[BLOCK..],
            ]
            .concat();
            region.as_mut_slice()[avail_off..avail_off + survivors.len()]
                .copy_from_slice(&survivors);

            let missing = [1u32, 3u32];
            let recover = ec.recover_matrix(&coding, &missing).unwrap();
            let available = inventory
                .buf_by_data(&mmap, avail_off, DATA_BLOCKS * BLOCK)
                .unwrap();
            let mut recovered = inventory.buf_by_memory(&mmap, out_off, 2 * BLOCK).unwrap();
            ec.recover(&recover, &available, &mut recovered)
                .await
                .expect("recover");

            let expected: Vec<u8> = [vec![1u8; BLOCK], vec![3u8; BLOCK]].concat();
            assert_eq!(recovered.data().unwrap(), &expected[..]);
        })
        .await;
    });
}

#[test]
fn update_recomputes_redundancy_for_changed_blocks() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::ErasureCoding]).unwrap();
        let create = Ec::create(&engine, dev.clone(), 16).unwrap();

        drive(&engine, async move {
            let ec = create.await.unwrap();

            let mut region = AlignedRegion::zeroed(32 * BLOCK);
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

            for i in 0..DATA_BLOCKS {
                region.as_mut_slice()[i * BLOCK..(i + 1) * BLOCK].fill(i as u8 + 1);
            }
            let coding = ec
                .coding_matrix(EcMatrixType::Cauchy, DATA_BLOCKS, RDNC_BLOCKS)
                .unwrap();
            let data = inventory.buf_by_data(&mmap, 0, DATA_BLOCKS * BLOCK).unwrap();
            let rdnc_off = DATA_BLOCKS * BLOCK;
            let mut rdnc = inventory
                .buf_by_memory(&mmap, rdnc_off, RDNC_BLOCKS * BLOCK)
                .unwrap();
            ec.create(&coding, &data, &mut rdnc).await.unwrap();
            let old_rdnc = rdnc.data().unwrap().to_vec();

            // change block 2, then update: src carries (old, new) for the
            // changed index followed by the current redundancy blocks
            let update_src_off = rdnc_off + RDNC_BLOCKS * BLOCK;
            let new_block2 = vec![0xabu8; BLOCK];
            {
                let slice = region.as_mut_slice();
                slice.copy_within(2 * BLOCK..3 * BLOCK, update_src_off);
                slice[update_src_off + BLOCK..update_src_off + 2 * BLOCK]
                    .copy_from_slice(&new_block2);
                slice[update_src_off + 2 * BLOCK..update_src_off + 2 * BLOCK + old_rdnc.len()]
                    .copy_from_slice(&old_rdnc);
            }
            let update_matrix = ec.update_matrix(&coding, &[2]).unwrap();
            let update_src = inventory
                .buf_by_data(&mmap, update_src_off, (2 + RDNC_BLOCKS) * BLOCK)
                .unwrap();
            let updated_off = update_src_off + (2 + RDNC_BLOCKS) * BLOCK;
            let mut updated_rdnc = inventory
                .buf_by_memory(&mmap, updated_off, RDNC_BLOCKS * BLOCK)
                .unwrap();
            ec.update(&update_matrix, &update_src, &mut updated_rdnc)
                .await
                .expect("update");

            // cross-check: full re-encode with the new block 2 must agree
            region.as_mut_slice()[2 * BLOCK..3 * BLOCK].copy_from_slice(&new_block2);
            let data = inventory.buf_by_data(&mmap, 0, DATA_BLOCKS * BLOCK).unwrap();
            let reencode_off = updated_off + RDNC_BLOCKS * BLOCK;
            let mut reencoded = inventory
                .buf_by_memory(&mmap, reencode_off, RDNC_BLOCKS * BLOCK)
                .unwrap();
            ec.create(&coding, &data, &mut reencoded).await.unwrap();

            assert_eq!(updated_rdnc.data().unwrap(), reencoded.data().unwrap());
        })
        .await;
    });
}
