//! Emulated PCI device: hotplug, host-iova mapping, and DMA both ways
//! between host memory and a DPU-side buffer.

use doca_async::devemu::{HotplugState, PciDev, PciType};
use doca_async::{
    AccessFlags, BufferInventory, Capability, Device, Dma, EngineConfig, MemoryMap,
    ProgressEngine,
};
use doca_async_test::{AlignedRegion, block_on, drive};

const HOST_IOVA: u64 = 0x100_0000;
const SPAN: usize = 4096;

#[test]
fn hotplug_then_dma_host_to_dpu_and_back() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[
            Capability::DevemuMgmt,
            Capability::DevemuHotplug,
            Capability::Dma,
        ])
        .unwrap();

        let pci_type = PciType::new("stor0").unwrap();
        assert!(pci_type.is_hotplug_supported(&dev));
        pci_type.set_dev(dev.clone()).unwrap();
        pci_type.set_vendor_id(0x15b3).unwrap();
        pci_type.set_device_id(0x1021).unwrap();
        pci_type.set_class_code(0x010802).unwrap();
        pci_type.set_num_msix(4).unwrap();
        pci_type.set_num_db(2).unwrap();
        pci_type
            .set_memory_bar_conf(0, 14, doca_async::devemu::BarMemType::Mem64Bit, true)
            .unwrap();
        pci_type
            .set_bar_db_region_by_offset_conf(0, 0x0000, 0x1000, 2, 2)
            .unwrap();
        pci_type
            .set_bar_msix_table_region_conf(0, 0x1000, 0x1000)
            .unwrap();
        pci_type
            .set_bar_msix_pba_region_conf(0, 0x2000, 0x1000)
            .unwrap();
        pci_type
            .set_bar_stateful_region_conf(0, 0x3000, 0x1000)
            .unwrap();
        pci_type.start().unwrap();
        assert!(pci_type.is_started().unwrap());

        let rep = pci_type.create_representor().unwrap();
        let pci_create = PciDev::create(&engine, &pci_type, rep).unwrap();
        let dma_create = Dma::create(&engine, dev.clone(), 8).unwrap();

        drive(&engine, async move {
            let pci_dev = pci_create.await.expect("emulated device context");
            assert_eq!(pci_dev.hotplug_state().unwrap(), HotplugState::PowerOff);

            let state = pci_dev.hotplug().await.expect("hotplug completes");
            assert_eq!(state, HotplugState::PowerOn);
            assert_eq!(pci_dev.hotplug_state().unwrap(), HotplugState::PowerOn);

            // map the host's memory at the fixed iova
            let host_map = pci_dev
                .remote_mmap(
                    &[dev.clone()],
                    HOST_IOVA,
                    SPAN,
                    AccessFlags::LOCAL_READ_WRITE | AccessFlags::PCI_READ_WRITE,
                )
                .expect("host mapping");

            // the host writes a pattern into its side of the region
            let (host_base, host_len) = host_map.memrange().unwrap();
            assert_eq!(host_len, SPAN);
            let host_bytes = unsafe { std::slice::from_raw_parts_mut(host_base, host_len) };
            for (i, byte) in host_bytes.iter_mut().enumerate() {
                *byte = (i % 251) as u8;
            }

            // DPU-side buffer
            let mut dpu_region = AlignedRegion::zeroed(SPAN);
            let dpu_map = unsafe {
                MemoryMap::new(
                    &[dev],
                    dpu_region.as_mut_ptr(),
                    dpu_region.len(),
                    AccessFlags::LOCAL_READ_WRITE,
                )
            }
            .unwrap();
            let inventory = BufferInventory::new(8).unwrap();

            let dma = dma_create.await.expect("dma context");

            // host -> DPU
            let host_src = inventory.buf_by_data(&host_map, 0, SPAN).unwrap();
            let mut dpu_dst = inventory.buf_by_memory(&dpu_map, 0, SPAN).unwrap();
            dma.memcpy(&host_src, &mut dpu_dst).await.expect("host to dpu");
            assert!(dpu_region
                .as_slice()
                .iter()
                .enumerate()
                .all(|(i, &b)| b == (i % 251) as u8));

            // overwrite on the DPU, then DPU -> host
            dpu_region.as_mut_slice().fill(0x5a);
            let dpu_src = inventory.buf_by_data(&dpu_map, 0, SPAN).unwrap();
            let mut host_dst = inventory.buf_by_memory(&host_map, 0, SPAN).unwrap();
            dma.memcpy(&dpu_src, &mut host_dst).await.expect("dpu to host");
            let host_bytes = unsafe { std::slice::from_raw_parts(host_base, host_len) };
            assert!(host_bytes.iter().all(|&b| b == 0x5a));

            let state = pci_dev.hotunplug().await.expect("hotunplug completes");
            assert_eq!(state, HotplugState::PowerOff);
        })
        .await;
    });
}
