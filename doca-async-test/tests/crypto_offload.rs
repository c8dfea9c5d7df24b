//! SHA and AES-GCM offloads, including the deferred-stop discipline around
//! loaded keys.

use doca_async::{
    AccessFlags, AesGcm, AesGcmKeyType, BufferInventory, Capability, Device, EngineConfig, Error,
    MemoryMap, ProgressEngine, Sha, ShaAlgorithm,
};
use doca_async_test::{AlignedRegion, block_on, drive};

#[test]
fn sha256_one_shot_and_segmented_agree() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::Sha]).unwrap();
        let create = Sha::create(&engine, dev.clone(), 16).unwrap();

        drive(&engine, async move {
            let sha = create.await.unwrap();

            let mut region = AlignedRegion::zeroed(4096);
            region.as_mut_slice()[..11].copy_from_slice(b"hello world");
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

            let src = inventory.buf_by_data(&mmap, 0, 11).unwrap();
            let mut digest = inventory.buf_by_memory(&mmap, 1024, 64).unwrap();
            sha.hash(ShaAlgorithm::Sha256, &src, &mut digest)
                .await
                .expect("hash");
            let one_shot = digest.data().unwrap().to_vec();
            assert_eq!(one_shot.len(), 32);

            // the same bytes in two segments, final marker on the second
            let first = inventory.buf_by_data(&mmap, 0, 5).unwrap();
            let second = inventory.buf_by_data(&mmap, 5, 6).unwrap();
            let mut partial = inventory.buf_by_memory(&mmap, 2048, 64).unwrap();
            sha.partial_hash(ShaAlgorithm::Sha256, &first, &mut partial, false)
                .await
                .expect("first segment");
            sha.partial_hash(ShaAlgorithm::Sha256, &second, &mut partial, true)
                .await
                .expect("final segment");
            assert_eq!(partial.data().unwrap(), &one_shot[..]);
        })
        .await;
    });
}

#[test]
fn aes_gcm_round_trip() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::AesGcm]).unwrap();
        let create = AesGcm::create(&engine, dev.clone(), 16).unwrap();

        drive(&engine, async move {
            let aes = create.await.unwrap();
            let key = aes
                .load_key(&[0x11u8; 32], AesGcmKeyType::Aes256)
                .expect("key");

            let mut region = AlignedRegion::zeroed(8192);
            region.as_mut_slice()[..12].copy_from_slice(b"secret bytes");
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

            let iv = [0u8; 12];
            let plaintext = inventory.buf_by_data(&mmap, 0, 12).unwrap();
            let mut encrypted = inventory.buf_by_memory(&mmap, 1024, 256).unwrap();
            aes.encrypt(&plaintext, &mut encrypted, &key, &iv, 16, 0)
                .await
                .expect("encrypt");
            assert_eq!(encrypted.data().unwrap().len(), 12 + 16);

            let mut decrypted = inventory.buf_by_memory(&mmap, 2048, 256).unwrap();
            aes.decrypt(&encrypted, &mut decrypted, &key, &iv, 16, 0)
                .await
                .expect("decrypt");
            assert_eq!(decrypted.data().unwrap(), b"secret bytes");

            drop(key);
        })
        .await;
    });
}

#[test]
fn key_length_must_match_key_type() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::AesGcm]).unwrap();
        let create = AesGcm::create(&engine, dev, 16).unwrap();

        drive(&engine, async move {
            let aes = create.await.unwrap();
            assert!(matches!(
                aes.load_key(&[0u8; 16], AesGcmKeyType::Aes256),
                Err(Error::InvalidValue)
            ));
            assert!(matches!(
                aes.load_key(&[0u8; 32], AesGcmKeyType::Aes128),
                Err(Error::InvalidValue)
            ));
            assert!(aes.load_key(&[0u8; 16], AesGcmKeyType::Aes128).is_ok());
        })
        .await;
    });
}

/// The context's stop is deferred while keys are loaded, and completes once
/// the last key is dropped.
#[test]
fn stop_waits_for_loaded_keys() {
    block_on(async {
        let engine = ProgressEngine::new(EngineConfig::default()).unwrap();
        let dev = Device::find_by_capabilities(&[Capability::AesGcm]).unwrap();
        let create = AesGcm::create(&engine, dev, 16).unwrap();

        drive(&engine, async move {
            let aes = create.await.unwrap();
            let key = aes.load_key(&[0x22u8; 16], AesGcmKeyType::Aes128).unwrap();

            let stopping = aes.stop().unwrap();
            // give the engine a chance: the stop must not complete while the
            // key is alive
            let parked = tokio::time::timeout(
                std::time::Duration::from_millis(20),
                stopping,
            )
            .await;
            assert!(parked.is_err(), "stop completed with a live key");

            drop(key);
            // the deferred stop now runs; the engine drains it
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        })
        .await;
    });
}
