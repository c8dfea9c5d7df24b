//! RDMA verbs between two endpoints paired out-of-band, plus the
//! CM listen/connect pathway and the immediate-data round trip.

use doca_async::rdma::{AddrType, Rdma, RdmaAddress, RdmaConfig};
use doca_async::{
    AccessFlags, BufferInventory, Capability, Device, EngineConfig, Error, MemoryMap,
    ProgressEngine,
};
use doca_async_test::{AlignedRegion, block_on, drive};

fn rdma_flags() -> AccessFlags {
    AccessFlags::LOCAL_READ_WRITE
        | AccessFlags::RDMA_READ
        | AccessFlags::RDMA_WRITE
        | AccessFlags::RDMA_ATOMIC
}

struct Endpoint {
    region: AlignedRegion,
    mmap: MemoryMap,
    inventory: BufferInventory,
}

impl Endpoint {
    fn new(dev: &Device, len: usize) -> Endpoint {
        let region = AlignedRegion::zeroed(len);
        let mmap = unsafe {
            MemoryMap::new(&[dev.clone()], region.as_mut_ptr(), region.len(), rdma_flags())
        }
        .unwrap();
        let inventory = BufferInventory::new(16).unwrap();
        Endpoint {
            region,
            mmap,
            inventory,
        }
    }
}

#[test]
fn oob_pairing_send_receive_with_immediate() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::Rdma]).unwrap();

        let left_create = Rdma::create(&engine, dev.clone(), RdmaConfig::default()).unwrap();
        let right_create = Rdma::create(&engine, dev.clone(), RdmaConfig::default()).unwrap();

        drive(&engine, async move {
            let left = left_create.await.expect("left context");
            let right = right_create.await.expect("right context");

            // out-of-band detail exchange, normally over TCP
            let left_conn = left.export_connection().unwrap();
            let right_conn = right.export_connection().unwrap();
            left_conn.connect(right_conn.details()).unwrap();
            right_conn.connect(left_conn.details()).unwrap();

            let mut left_mem = Endpoint::new(&dev, 8192);
            let mut right_mem = Endpoint::new(&dev, 8192);

            // receive must be posted before the peer sends
            let mut dest = right_mem.inventory.buf_by_memory(&right_mem.mmap, 0, 4096).unwrap();
            let posted = right_conn.receive(&mut dest);

            left_mem.region.as_mut_slice()[..5].copy_from_slice(b"hello");
            let src = left_mem.inventory.buf_by_data(&left_mem.mmap, 0, 5).unwrap();
            left_conn.send_imm(&src, 0xfeed_beef).await.expect("send");

            let immediate = posted.await.expect("receive completes");
            assert_eq!(immediate, 0xfeed_beef);
            assert_eq!(dest.data().unwrap(), b"hello");

            // write and read against the peer's exported memory
            let descriptor = right_mem.mmap.export_pci(&dev).unwrap();
            let imported = MemoryMap::from_export(&dev, &descriptor).unwrap();

            left_mem.region.as_mut_slice()[1024..1028].copy_from_slice(b"wxyz");
            let wsrc = left_mem.inventory.buf_by_data(&left_mem.mmap, 1024, 4).unwrap();
            let mut wdst = left_mem.inventory.buf_by_memory(&imported, 4096, 16).unwrap();
            left_conn.write(&wsrc, &mut wdst).await.expect("write");
            assert_eq!(&right_mem.region.as_slice()[4096..4100], b"wxyz");

            let rsrc = left_mem.inventory.buf_by_data(&imported, 4096, 4).unwrap();
            let mut rdst = left_mem.inventory.buf_by_memory(&left_mem.mmap, 2048, 16).unwrap();
            left_conn.read(&rsrc, &mut rdst).await.expect("read");
            assert_eq!(rdst.data().unwrap(), b"wxyz");

            // atomics on an 8-byte remote location
            right_mem.region.as_mut_slice()[512..520].copy_from_slice(&7u64.to_ne_bytes());
            let mut atomic_dst = left_mem.inventory.buf_by_data(&imported, 512, 8).unwrap();
            let mut result = left_mem.inventory.buf_by_memory(&left_mem.mmap, 3072, 8).unwrap();
            left_conn
                .atomic_fetch_add(&mut atomic_dst, &mut result, 3)
                .await
                .expect("fetch add");
            assert_eq!(result.data().unwrap(), 7u64.to_ne_bytes());
            assert_eq!(
                &right_mem.region.as_slice()[512..520],
                &10u64.to_ne_bytes()
            );

            let mut result = left_mem.inventory.buf_by_memory(&left_mem.mmap, 3200, 8).unwrap();
            left_conn
                .atomic_cmp_swp(&mut atomic_dst, &mut result, 10, 99)
                .await
                .expect("compare and swap");
            assert_eq!(&right_mem.region.as_slice()[512..520], &99u64.to_ne_bytes());
        })
        .await;
    });
}

#[test]
fn cm_listen_and_connect() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::Rdma]).unwrap();

        let server_create = Rdma::create(&engine, dev.clone(), RdmaConfig::default()).unwrap();
        let client_create = Rdma::create(&engine, dev.clone(), RdmaConfig::default()).unwrap();

        drive(&engine, async move {
            let server = server_create.await.unwrap();
            let client = client_create.await.unwrap();

            let accepted = server.listen(4791).unwrap();
            let addr = RdmaAddress::new(AddrType::Ipv4, "192.168.100.2", 4791).unwrap();
            let client_conn = client.connect_addr(&addr).await.expect("client side");
            let server_conn = accepted.await.expect("server side");

            let mut server_mem = Endpoint::new(&dev, 4096);
            let mut client_mem = Endpoint::new(&dev, 4096);

            let mut dest = server_mem
                .inventory
                .buf_by_memory(&server_mem.mmap, 0, 1024)
                .unwrap();
            let posted = server_conn.receive(&mut dest);

            client_mem.region.as_mut_slice()[..4].copy_from_slice(b"ping");
            let src = client_mem.inventory.buf_by_data(&client_mem.mmap, 0, 4).unwrap();
            client_conn.send(&src).await.expect("send");

            let immediate = posted.await.expect("receive");
            assert_eq!(immediate, 0);
            assert_eq!(dest.data().unwrap(), b"ping");
        })
        .await;
    });
}

#[test]
fn verbs_on_an_unconnected_endpoint_fail_fast() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::Rdma]).unwrap();
        let create = Rdma::create(&engine, dev.clone(), RdmaConfig::default()).unwrap();

        drive(&engine, async move {
            let rdma = create.await.unwrap();
            let conn = rdma.export_connection().unwrap();

            let mut mem = Endpoint::new(&dev, 4096);
            mem.region.as_mut_slice()[..2].copy_from_slice(b"no");
            let src = mem.inventory.buf_by_data(&mem.mmap, 0, 2).unwrap();
            assert_eq!(conn.send(&src).await, Err(Error::NotConnected));
        })
        .await;
    });
}
