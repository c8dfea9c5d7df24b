//! Disconnection flushes every waiter: pending message receives, consumer
//! accepts, and posted receives all resolve with `NotConnected` when the
//! connection goes down.

use doca_async::comch::{Client, Server, ServerLimits};
use doca_async::{
    AccessFlags, BufferInventory, Capability, Device, DeviceRepresentor, EngineConfig, Error,
    MemoryMap, ProgressEngine, RepFilter,
};
use doca_async_test::{AlignedRegion, block_on, drive};

#[test]
fn disconnect_resolves_pending_accepters() {
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
            Server::create(&engine, "flush", dev.clone(), rep, &ServerLimits::default()).unwrap();

        let client_engine = engine.clone();
        drive(&engine, async move {
            let server = server_create.await.unwrap();
            let accepted = server.accept();
            let client = Client::create(&client_engine, "flush", dev, 16)
                .unwrap()
                .await
                .unwrap();
            let conn = accepted.await.unwrap();

            // park two waiters on the connection's event streams
            let pending_msg = tokio::task::spawn_local({
                let msg = conn.msg_recv();
                async move { msg.await }
            });
            let pending_consumer = tokio::task::spawn_local({
                let announced = conn.accept_consumer();
                async move { announced.await }
            });
            tokio::task::yield_now().await;

            conn.disconnect().await.expect("orderly disconnect");

            assert_eq!(pending_msg.await.unwrap(), Err(Error::NotConnected));
            assert_eq!(pending_consumer.await.unwrap(), Err(Error::NotConnected));

            // the stream termination is sticky
            assert_eq!(conn.msg_recv().await, Err(Error::NotConnected));
            assert!(conn.send(b"late").await.is_err());
            drop(client);
        })
        .await;
    });
}

#[test]
fn consumer_stop_fails_posted_receives() {
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
            Server::create(&engine, "flush2", dev.clone(), rep, &ServerLimits::default())
                .unwrap();

        let client_engine = engine.clone();
        drive(&engine, async move {
            let server = server_create.await.unwrap();
            let accepted = server.accept();
            let client = Client::create(&client_engine, "flush2", dev.clone(), 16)
                .unwrap()
                .await
                .unwrap();
            let conn = accepted.await.unwrap();

            let region = AlignedRegion::zeroed(4096);
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

            let consumer = client.create_consumer(&mmap, 4).unwrap().await.unwrap();
            let mut buf = inventory.buf_by_memory(&mmap, 0, 1024).unwrap();
            let posted = consumer.post_recv(&mut buf);
            tokio::task::yield_now().await;

            // stopping the consumer flushes the in-flight receive before the
            // stop future resolves
            consumer.stop().unwrap().await.expect("consumer stops");
            assert_eq!(posted.await, Err(Error::NotConnected));

            drop(conn);
            drop(client);
        })
        .await;
    });
}
