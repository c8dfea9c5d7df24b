//! Sync events shared across an export: a masked wait on one side completes
//! once the other side publishes the value.

use doca_async::sync_event::{PublisherLocation, SubscriberLocation};
use doca_async::{Capability, Device, EngineConfig, ProgressEngine, SyncEvent};
use doca_async_test::{block_on, drive};
use std::time::Duration;

#[test]
fn wait_eq_completes_after_the_peer_sets_the_value() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::SyncEventPci]).unwrap();

        let local_create = SyncEvent::create(
            &engine,
            &[PublisherLocation::Device(&dev), PublisherLocation::RemotePci],
            &[SubscriberLocation::Device(&dev)],
            8,
        )
        .unwrap();

        let peer_engine = engine.clone();
        let peer_dev = dev.clone();
        drive(&engine, async move {
            let local = local_create.await.expect("local event");

            // the peer reconstructs the event from its export
            let exported = local.export_to_remote_pci(&peer_dev).expect("export");
            let peer = SyncEvent::from_export(&peer_engine, &peer_dev, &exported, 8)
                .unwrap()
                .await
                .expect("peer event");

            let waiter = tokio::task::spawn_local(async move {
                local.wait_eq(42, u64::MAX).await.expect("wait completes");
                assert_eq!(local.get().await.unwrap(), 42);
            });

            // let the wait get posted before publishing
            tokio::time::sleep(Duration::from_millis(5)).await;
            peer.notify_set(42).await.expect("set");

            waiter.await.expect("waiter");
            assert_eq!(peer.get().await.unwrap(), 42);
        })
        .await;
    });
}

#[test]
fn notify_add_fetches_the_previous_value() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::SyncEventPci]).unwrap();
        let create = SyncEvent::create(
            &engine,
            &[PublisherLocation::Device(&dev)],
            &[SubscriberLocation::Device(&dev)],
            8,
        )
        .unwrap();

        drive(&engine, async move {
            let event = create.await.unwrap();
            event.notify_set(7).await.unwrap();
            assert_eq!(event.notify_add(5).await.unwrap(), 7);
            assert_eq!(event.get().await.unwrap(), 12);

            // masked wait: only the low byte participates
            event.notify_set(0x0100_0000_0000_00aa).await.unwrap();
            event.wait_eq(0xaa, 0xff).await.unwrap();
            event.wait_neq(0x55, 0xff).await.unwrap();
        })
        .await;
    });
}
