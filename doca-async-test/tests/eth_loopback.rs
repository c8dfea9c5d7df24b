//! Ethernet queues over the emulated loopback wire: explicit receives,
//! managed delivery, and LSO sends.

use doca_async::eth::{EthRxq, EthRxqConfig, EthRxqManaged, EthTxq, EthTxqConfig, GatherSegment, PacketBuffer};
use doca_async::{
    AccessFlags, BufferInventory, Capability, Device, EngineConfig, MemoryMap, ProgressEngine,
};
use doca_async_test::{AlignedRegion, block_on, drive};

const PKT: usize = 2048;

#[test]
fn send_is_received_by_an_explicit_receive_task() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::EthRxq, Capability::EthTxq]).unwrap();

        let rxq_create =
            EthRxq::create(&engine, dev.clone(), 8, &EthRxqConfig::new(32, PKT as u32)).unwrap();
        let txq_create = EthTxq::create(&engine, dev.clone(), 8, &EthTxqConfig::new(32)).unwrap();

        drive(&engine, async move {
            let rxq = rxq_create.await.expect("rxq");
            let txq = txq_create.await.expect("txq");

            assert!(rxq.flow_target(0, 0).unwrap().queue_id != 0);

            let mut region = AlignedRegion::zeroed(2 * PKT);
            region.as_mut_slice()[..14].copy_from_slice(b"\x02\0\0\0\0\x01\x02\0\0\0\0\x02\x08\0");
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

            let mut dest = inventory.buf_by_memory(&mmap, PKT, PKT).unwrap();
            let posted = rxq.receive(&mut dest);

            let frame = inventory.buf_by_data(&mmap, 0, 14).unwrap();
            txq.send(&frame).await.expect("send");

            posted.await.expect("receive");
            assert_eq!(dest.data().unwrap(), &region.as_slice()[..14]);
        })
        .await;
    });
}

#[test]
fn managed_queue_delivers_owned_buffers() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::EthRxq, Capability::EthTxq]).unwrap();

        // mempool region the managed queue carves packet buffers from
        let pool = AlignedRegion::zeroed(32 * PKT);
        let pool_map = unsafe {
            MemoryMap::new(
                &[dev.clone()],
                pool.as_mut_ptr(),
                pool.len(),
                AccessFlags::LOCAL_READ_WRITE,
            )
        }
        .unwrap();

        let rxq_create = EthRxqManaged::create(
            &engine,
            dev.clone(),
            &EthRxqConfig::new(32, PKT as u32),
            PacketBuffer {
                mmap: &pool_map,
                offset: 0,
                length: (32 * PKT) as u32,
            },
        )
        .unwrap();
        let txq_create = EthTxq::create(&engine, dev.clone(), 8, &EthTxqConfig::new(32)).unwrap();

        drive(&engine, async move {
            let rxq = rxq_create.await.expect("managed rxq");
            let txq = txq_create.await.expect("txq");

            let mut region = AlignedRegion::zeroed(PKT);
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

            region.as_mut_slice()[..64].fill(0x42);
            let frame = inventory.buf_by_data(&mmap, 0, 64).unwrap();

            // LSO path: headers prepended ahead of the payload
            let mut headers = vec![GatherSegment {
                bytes: vec![0xaa; 14],
            }];
            txq.lso_send(&frame, &mut headers).await.expect("lso send");

            let pkt = rxq.receive().await.expect("managed delivery");
            let bytes = pkt.data().unwrap();
            assert_eq!(bytes.len(), 14 + 64);
            assert!(bytes[..14].iter().all(|&b| b == 0xaa));
            assert!(bytes[14..].iter().all(|&b| b == 0x42));
        })
        .await;
    });
}
