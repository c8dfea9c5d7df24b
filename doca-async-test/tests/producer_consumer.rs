//! Producer/consumer data path: the server streams blocks to the client
//! after announcing the geometry over the message channel.

use doca_async::comch::{Client, Server, ServerLimits};
use doca_async::{
    AccessFlags, BufferInventory, Capability, Device, DeviceRepresentor, EngineConfig,
    ProgressEngine, RepFilter,
};
use doca_async_test::{AlignedRegion, block_on, drive};
use std::time::Instant;

const BLOCK_COUNT: usize = 16;
const BLOCK_SIZE: usize = 64 * 1024;

#[test]
fn streamed_blocks_arrive_in_order_and_intact() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[
            Capability::ComchServer,
            Capability::ComchClient,
        ])
        .unwrap();
        let rep =
            DeviceRepresentor::find_by_pci_addr(&dev, "0000:b1:00.0", RepFilter::All).unwrap();

        let server_create =
            Server::create(&engine, "stream", dev.clone(), rep, &ServerLimits::default())
                .unwrap();

        let client_dev = dev.clone();
        let client_engine = engine.clone();
        drive(&engine, async move {
            let server = server_create.await.expect("server starts");

            // server side: wait for the consumer announcement, then push
            // every block through a producer
            let server_dev = dev.clone();
            let server_side = tokio::task::spawn_local(async move {
                let conn = server.accept().await.expect("connection");
                conn.send(format!("{BLOCK_COUNT} {BLOCK_SIZE}").as_bytes())
                    .await
                    .expect("descriptor sent");

                let consumer_id = conn.accept_consumer().await.expect("consumer announced");
                let producer = conn
                    .create_producer(BLOCK_COUNT as u32)
                    .unwrap()
                    .await
                    .expect("producer starts");

                let mut region = AlignedRegion::zeroed(BLOCK_SIZE);
                let mmap = unsafe {
                    doca_async::MemoryMap::new(
                        &[server_dev],
                        region.as_mut_ptr(),
                        region.len(),
                        AccessFlags::LOCAL_READ_WRITE,
                    )
                }
                .unwrap();
                let inventory = BufferInventory::new(4).unwrap();

                for i in 0..BLOCK_COUNT {
                    region.as_mut_slice().fill((i & 0xff) as u8);
                    let src = inventory.buf_by_data(&mmap, 0, BLOCK_SIZE).unwrap();
                    producer
                        .send(&src, &(i as u32).to_le_bytes(), consumer_id)
                        .await
                        .expect("block sent");
                }
            });

            // client side: parse the descriptor, then post receives
            let client = Client::create(&client_engine, "stream", client_dev.clone(), 16)
                .unwrap()
                .await
                .expect("client connects");

            let descriptor = client.msg_recv().await.expect("descriptor");
            let text = String::from_utf8(descriptor).unwrap();
            let mut parts = text.split_whitespace();
            let count: usize = parts.next().unwrap().parse().unwrap();
            let size: usize = parts.next().unwrap().parse().unwrap();
            assert_eq!(count, BLOCK_COUNT);
            assert_eq!(size, BLOCK_SIZE);

            let mut region = AlignedRegion::zeroed(size);
            let mmap = unsafe {
                doca_async::MemoryMap::new(
                    &[client_dev],
                    region.as_mut_ptr(),
                    region.len(),
                    AccessFlags::LOCAL_READ_WRITE,
                )
            }
            .unwrap();
            let inventory = BufferInventory::new(4).unwrap();
            let consumer = client
                .create_consumer(&mmap, count as u32)
                .unwrap()
                .await
                .expect("consumer starts");

            let started = Instant::now();
            for i in 0..count {
                let mut dest = inventory.buf_by_memory(&mmap, 0, size).unwrap();
                let record = consumer.post_recv(&mut dest).await.expect("block received");

                let sequence =
                    u32::from_le_bytes(record.immediate_data[..4].try_into().unwrap());
                assert_eq!(sequence as usize, i);
                assert!(record.producer_id != 0);
                let payload = dest.data().unwrap();
                assert_eq!(payload.len(), size);
                assert!(payload.iter().all(|&b| b == (i & 0xff) as u8));
            }
            let elapsed = started.elapsed();
            let gib = (count * size) as f64 / (1u64 << 30) as f64;
            println!(
                "received {count} x {size} B in {elapsed:?} ({:.2} GiB/s)",
                gib / elapsed.as_secs_f64().max(f64::EPSILON)
            );

            server_side.await.expect("server side");
            drop(consumer);
            drop(client);
        })
        .await;
    });
}
