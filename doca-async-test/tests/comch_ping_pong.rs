//! Ping/pong over the messaging channel: server listening under a name, a
//! client connecting, one message each way, orderly disconnection on drop.

use doca_async::comch::{Client, Server, ServerLimits};
use doca_async::{Capability, Device, DeviceRepresentor, EngineConfig, ProgressEngine, RepFilter};
use doca_async_test::{block_on, drive};

#[test]
fn ping_pong_round_trip() {
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
            Server::create(&engine, "test", dev.clone(), rep, &ServerLimits::default()).unwrap();

        let client_engine = engine.clone();
        drive(&engine, async move {
            let server = server_create.await.expect("server starts");

            let server_side = tokio::task::spawn_local(async move {
                let conn = server.accept().await.expect("client connection");
                let msg = conn.msg_recv().await.expect("request");
                assert_eq!(msg, b"ping");
                conn.send(b"pong").await.expect("reply sent");
                // scoped wrappers drop here; the connection disconnects and
                // the server stops
            });

            let client = Client::create(&client_engine, "test", dev, 16)
                .unwrap()
                .await
                .expect("client connects");
            client.send(b"ping").await.expect("request sent");
            let reply = client.msg_recv().await.expect("reply");
            assert_eq!(reply, b"pong");

            server_side.await.expect("server side");
        })
        .await;
    });
}

#[test]
fn client_without_server_fails_to_start() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::ComchClient]).unwrap();
        // no server has published this name; the connect fails at start
        assert!(Client::create(&engine, "nobody-home", dev, 16).is_err());
    });
}

#[test]
fn send_on_a_disconnected_connection_fails_fast() {
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
            Server::create(&engine, "failfast", dev.clone(), rep, &ServerLimits::default())
                .unwrap();

        let client_engine = engine.clone();
        drive(&engine, async move {
            let server = server_create.await.unwrap();
            let accepted = server.accept();
            let client = Client::create(&client_engine, "failfast", dev, 16)
                .unwrap()
                .await
                .unwrap();
            let conn = accepted.await.unwrap();

            conn.disconnect().await.unwrap();
            assert!(conn.send(b"too late").await.is_err());
            drop(client);
        })
        .await;
    });
}
