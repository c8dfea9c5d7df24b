//! Context lifecycle: start/stop monotonicity, leaves-first stop cascades,
//! and the ordering hazard around the idle transition.

use doca_async::comch::{Client, Server, ServerLimits};
use doca_async::{
    AccessFlags, Capability, Device, DeviceRepresentor, Dma, EngineConfig, MemoryMap,
    ProgressEngine, RepFilter,
};
use doca_async_test::{AlignedRegion, block_on, drive};

fn engine() -> ProgressEngine {
    ProgressEngine::new(EngineConfig::default()).expect("engine")
}

#[test]
fn start_and_stop_complete_in_order() {
    block_on(async {
        let engine = engine();
        let dev = Device::find_by_capabilities(&[Capability::Dma]).unwrap();
        let create = Dma::create(&engine, dev, 8).unwrap();
        drive(&engine, async move {
            let ctx = create.await.expect("context starts");
            // explicit stop resolves once the context reached idle
            ctx.stop().unwrap().await.expect("context stops");
        })
        .await;
    });
}

#[test]
fn dropping_the_scope_stops_the_context_and_run_exits() {
    block_on(async {
        let engine = engine();
        let dev = Device::find_by_capabilities(&[Capability::Dma]).unwrap();
        // the context registers with the engine before its start is
        // initiated, so the run loop below sees a non-empty registry
        let create = Dma::create(&engine, dev, 8).unwrap();
        let runner = engine.clone();
        let run_task = tokio::task::spawn_local(async move { runner.run().await });

        let ctx = create.await.expect("context starts");
        drop(ctx);

        // the fire-and-forget stop drains through the engine; run() returns
        // once the last context detached
        run_task
            .await
            .expect("run task join")
            .expect("engine run");
    });
}

/// The idle transition notifies the parent before resuming the stop waiter;
/// the parent dropping its (only) owning reference inside that notification
/// must leave the waiter intact.
#[test]
fn stop_survives_parent_dropping_last_reference() {
    block_on(async {
        let engine = engine();
        let dev = Device::find_by_capabilities(&[Capability::Dma]).unwrap();
        let create = Dma::create(&engine, dev, 8).unwrap();
        drive(&engine, async move {
            let ctx = create.await.expect("context starts");
            let stop = ctx.stop().unwrap();
            // the engine registry holds the only other reference; it drops
            // it inside signal_stopped_child, while this future still waits
            stop.await.expect("stop future resumes exactly once");
        })
        .await;
    });
}

/// A composed stop cascades leaves-first: consumer children stop, then the
/// connection disconnects, then the server's own SDK stop runs.
#[test]
fn server_stop_cascades_through_connections_and_children() {
    block_on(async {
        let engine = engine();
        let dev = Device::find_by_capabilities(&[
            Capability::ComchServer,
            Capability::ComchClient,
        ])
        .unwrap();
        let rep = DeviceRepresentor::find_by_pci_addr(&dev, "0000:b1:00.0", RepFilter::All)
            .unwrap();
        let server_create =
            Server::create(&engine, "cascade", dev.clone(), rep, &ServerLimits::default())
                .unwrap();

        drive(&engine, async move {
            let server = server_create.await.expect("server starts");

            let client_create = Client::create(&engine, "cascade", dev.clone(), 16).unwrap();
            let accepted = server.accept();
            let client = client_create.await.expect("client connects");
            let conn = accepted.await.expect("server sees the connection");

            // hang a consumer child off the server side of the connection
            let region = AlignedRegion::zeroed(4096);
            let mmap = unsafe {
                MemoryMap::new(
                    &[dev.clone()],
                    region.as_mut_ptr(),
                    region.len(),
                    AccessFlags::LOCAL_READ_WRITE,
                )
            }
            .unwrap();
            let consumer = conn.create_consumer(&mmap, 4).unwrap().await.unwrap();

            assert_eq!(server.open_connection_count(), 1);

            // initiating the stop at the root must drain everything:
            // consumer first, then the connection, then the server itself
            let stopped = server.stop().unwrap();
            stopped.await.expect("server reaches idle");

            drop(consumer);
            drop(conn);
            drop(client);
        })
        .await;
    });
}
