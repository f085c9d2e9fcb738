//! Integration tests for the driver against the simulated block service.
//!
//! These tests go through the public API only: open -> write -> seek ->
//! read -> close -> shutdown, with every request encoded, posted, decoded
//! and sequence-checked by the service.

use scatter_gather_core::{
    error::{Error, PositionError, TransportError},
    packet::{Operation, Packet, BLOCK_SIZE},
    service::{BlockService, ServiceConfig},
    Driver, DriverConfig,
};
use std::cell::Cell;

fn perfect_driver(seed: u64) -> Driver<BlockService> {
    Driver::new(BlockService::new(ServiceConfig::perfect(seed)))
}

/// One block of 'A', then 'B' written over the second slot.
#[test]
fn test_overwrite_slot_in_place() {
    let mut driver = perfect_driver(42);
    let fh = driver.open("f").expect("open failed");

    driver.write(fh, &[b'A'; BLOCK_SIZE]).expect("append failed");
    let stat = driver.stat(fh).unwrap();
    assert_eq!(stat.blocks, 1);
    assert_eq!(stat.size, BLOCK_SIZE);

    driver.seek(fh, 256).unwrap();
    driver.write(fh, &[b'B'; 256]).expect("update failed");
    let stat = driver.stat(fh).unwrap();
    assert_eq!(stat.blocks, 1, "update must not add a block");
    assert_eq!(stat.size, BLOCK_SIZE);
    assert_eq!(stat.position, 512);

    driver.seek(fh, 256).unwrap();
    assert_eq!(driver.read(fh, 256).unwrap(), vec![b'B'; 256]);

    driver.seek(fh, 0).unwrap();
    assert_eq!(driver.read(fh, 256).unwrap(), vec![b'A'; 256]);
    driver.seek(fh, 512).unwrap();
    assert_eq!(driver.read(fh, 512).unwrap(), vec![b'A'; 512]);

    // The service holds the merged block
    let location = driver.block_location(fh, 0).unwrap().unwrap();
    let stored = driver
        .transport()
        .block(location.node, location.block_id)
        .unwrap();
    assert!(stored[..256].iter().all(|&b| b == b'A'));
    assert!(stored[256..512].iter().all(|&b| b == b'B'));
    assert!(stored[512..].iter().all(|&b| b == b'A'));
}

#[test]
fn test_open_twice_returns_same_handle() {
    let mut driver = perfect_driver(1);
    let first = driver.open("same").unwrap();
    let second = driver.open("same").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_end_of_file_bounds() {
    let mut driver = perfect_driver(2);
    let fh = driver.open("f").unwrap();
    driver.write(fh, &[1u8; BLOCK_SIZE]).unwrap();
    driver.write(fh, &[2u8; BLOCK_SIZE]).unwrap();
    let size = driver.stat(fh).unwrap().size;
    assert_eq!(size, 2 * BLOCK_SIZE);

    assert!(matches!(
        driver.seek(fh, size),
        Err(Error::Position(PositionError::SeekPastEnd { .. }))
    ));
    assert!(driver.seek(fh, size + BLOCK_SIZE).is_err());

    // Position is at the end after the two appends
    assert!(matches!(
        driver.read(fh, 256),
        Err(Error::Position(PositionError::ReadPastEnd { .. }))
    ));
}

#[test]
fn test_cache_counters_after_shutdown() {
    let mut driver = perfect_driver(3);
    let fh = driver.open("f").unwrap();
    for byte in 0..4u8 {
        driver.write(fh, &[byte; BLOCK_SIZE]).unwrap();
    }
    for _ in 0..3 {
        for block in 0..4 {
            driver.seek(fh, block * BLOCK_SIZE).unwrap();
            driver.read(fh, 256).unwrap();
        }
    }

    let report = driver.shutdown().unwrap();
    assert!(report.cache.hits <= report.cache.queries);
    assert_eq!(report.cache.queries, 12);
    assert_eq!(report.cache.hits, 12);
    assert_eq!(driver.metrics().cache, Some(report.cache));
}

#[test]
fn test_small_cache_forces_obtain() {
    let service = BlockService::new(ServiceConfig::perfect(4));
    let mut driver = Driver::with_config(service, DriverConfig::with_cache_capacity(1));

    let fh = driver.open("f").unwrap();
    driver.write(fh, &[b'x'; BLOCK_SIZE]).unwrap();
    driver.write(fh, &[b'y'; BLOCK_SIZE]).unwrap();

    // Block 0 was evicted by block 1
    driver.seek(fh, 0).unwrap();
    assert_eq!(driver.read(fh, 256).unwrap(), vec![b'x'; 256]);
    driver.seek(fh, BLOCK_SIZE).unwrap();
    assert_eq!(driver.read(fh, 256).unwrap(), vec![b'y'; 256]);

    let metrics = driver.metrics();
    assert_eq!(metrics.blocks_obtained, 2);
    assert_eq!(driver.cache_stats().unwrap().hits, 0);
}

#[test]
fn test_disabled_cache_still_correct() {
    let service = BlockService::new(ServiceConfig::perfect(5));
    let mut driver = Driver::with_config(service, DriverConfig::with_cache_capacity(0));

    let fh = driver.open("f").unwrap();
    driver.write(fh, &[b'a'; 256]).unwrap();
    driver.write(fh, &[b'b'; 256]).unwrap();
    driver.seek(fh, 0).unwrap();
    assert_eq!(driver.read(fh, 256).unwrap(), vec![b'a'; 256]);
    assert_eq!(driver.read(fh, 256).unwrap(), vec![b'b'; 256]);

    // Append zero-fills the rest of the block
    assert_eq!(driver.read(fh, 512).unwrap(), vec![0u8; 512]);

    // Every update and read went to the service
    assert_eq!(driver.metrics().blocks_obtained, 4);
    assert_eq!(driver.metrics().blocks_updated, 1);
}

#[test]
fn test_reopen_keeps_contents() {
    let mut driver = perfect_driver(6);
    let fh = driver.open("kept").unwrap();
    driver.write(fh, &[7u8; BLOCK_SIZE]).unwrap();
    driver.close(fh).unwrap();

    let reopened = driver.open("kept").unwrap();
    assert_eq!(reopened, fh);
    let stat = driver.stat(reopened).unwrap();
    assert_eq!(stat.position, 0);
    assert_eq!(stat.size, BLOCK_SIZE);
    assert_eq!(driver.read(reopened, BLOCK_SIZE).unwrap(), vec![7u8; BLOCK_SIZE]);
}

#[test]
fn test_many_files_many_blocks() {
    let mut driver = Driver::new(BlockService::new(ServiceConfig {
        nodes: 3,
        failure_rate: 0.0,
        seed: 7,
    }));

    let handles: Vec<_> = (0..5)
        .map(|i| driver.open(&format!("file{i}")).unwrap())
        .collect();

    for (i, &fh) in handles.iter().enumerate() {
        for block in 0..=i {
            driver.write(fh, &[(i * 16 + block) as u8; BLOCK_SIZE]).unwrap();
        }
    }

    for (i, &fh) in handles.iter().enumerate() {
        assert_eq!(driver.stat(fh).unwrap().blocks, i + 1);
        for block in 0..=i {
            driver.seek(fh, block * BLOCK_SIZE + 768).unwrap();
            assert_eq!(
                driver.read(fh, 256).unwrap(),
                vec![(i * 16 + block) as u8; 256]
            );
        }
    }

    let report = driver.shutdown().unwrap();
    assert_eq!(report.files, 5);
    assert_eq!(report.blocks, 15);
    assert!(report.nodes >= 1 && report.nodes <= 3);
    assert_eq!(driver.transport().stats().clients, 0);
}

#[test]
fn test_transport_failure_leaves_state_unchanged() {
    let mut driver = perfect_driver(8);
    let fh = driver.open("f").unwrap();
    driver.write(fh, &[1u8; BLOCK_SIZE]).unwrap();
    let location = driver.block_location(fh, 0).unwrap().unwrap();
    let seq_before = driver.sequence_of(location.node);
    let stat_before = driver.stat(fh).unwrap();

    driver.transport_mut().set_failure_rate(1.0);

    // Append fails: no block added, size and position unchanged
    assert!(matches!(
        driver.write(fh, &[2u8; BLOCK_SIZE]),
        Err(Error::Transport(TransportError::Dropped))
    ));
    assert_eq!(driver.stat(fh).unwrap(), stat_before);

    // Update of a cached block fails at UPDATE: cache keeps the old bytes
    driver.seek(fh, 0).unwrap();
    assert!(driver.write(fh, &[9u8; 256]).is_err());
    assert_eq!(driver.sequence_of(location.node), seq_before);
    assert_eq!(driver.stat(fh).unwrap().position, 0);

    driver.transport_mut().set_failure_rate(0.0);

    // The conversation is still in step with the service
    assert_eq!(driver.read(fh, 256).unwrap(), vec![1u8; 256]);
    driver.seek(fh, 0).unwrap();
    driver.write(fh, &[3u8; 256]).unwrap();
    driver.seek(fh, 0).unwrap();
    assert_eq!(driver.read(fh, 256).unwrap(), vec![3u8; 256]);

    assert_eq!(driver.metrics().transport_failures, 2);
}

/// In-place write to an evicted block where OBTAIN succeeds and UPDATE is lost.
#[test]
fn test_failed_update_of_uncached_block() {
    let mut service = BlockService::new(ServiceConfig::perfect(14));
    let drop_updates = Cell::new(false);
    let transport = |request: &[u8]| {
        let is_update = matches!(
            Packet::decode(request),
            Ok(packet) if packet.operation == Operation::UpdateBlock
        );
        if is_update && drop_updates.get() {
            return Err(TransportError::Dropped);
        }
        service.handle(request)
    };
    let mut driver = Driver::with_config(transport, DriverConfig::with_cache_capacity(1));

    let fh = driver.open("f").unwrap();
    driver.write(fh, &[1u8; BLOCK_SIZE]).unwrap();
    driver.write(fh, &[2u8; BLOCK_SIZE]).unwrap();
    let first = driver.block_location(fh, 0).unwrap().unwrap();
    let second = driver.block_location(fh, BLOCK_SIZE).unwrap().unwrap();
    assert!(!driver.is_cached(first));
    assert!(driver.is_cached(second));

    driver.seek(fh, 0).unwrap();
    let seq_before = driver.sequence_of(first.node);
    drop_updates.set(true);

    assert!(matches!(
        driver.write(fh, &[9u8; 256]),
        Err(Error::Transport(TransportError::Dropped))
    ));

    // The OBTAIN went through, so its sequence sticks; the cache does not
    // change and the unrelated cached block survives
    assert_eq!(driver.sequence_of(first.node), seq_before.wrapping_add(1));
    assert!(!driver.is_cached(first));
    assert!(driver.is_cached(second));
    assert_eq!(driver.stat(fh).unwrap().position, 0);
    assert_eq!(driver.metrics().blocks_obtained, 1);
    assert_eq!(driver.metrics().blocks_updated, 0);

    drop_updates.set(false);
    driver.write(fh, &[9u8; 256]).unwrap();
    assert!(driver.is_cached(first));
    assert!(!driver.is_cached(second));

    driver.seek(fh, 0).unwrap();
    let expected = [vec![9u8; 256], vec![1u8; 256]].concat();
    assert_eq!(driver.read(fh, 512).unwrap(), expected);
    drop(driver);

    let stored = service.block(first.node, first.block_id).unwrap();
    assert!(stored[..256].iter().all(|&b| b == 9));
    assert!(stored[256..].iter().all(|&b| b == 1));
}

#[test]
fn test_init_failure_then_retry() {
    let mut service = BlockService::new(ServiceConfig::perfect(9));
    service.set_failure_rate(1.0);
    let mut driver = Driver::new(service);

    assert!(matches!(driver.open("f"), Err(Error::Init(_))));
    assert!(!driver.is_initialized());

    driver.transport_mut().set_failure_rate(0.0);
    let fh = driver.open("f").unwrap();
    assert!(driver.is_initialized());
    driver.write(fh, &[1u8; 256]).unwrap();
}

#[test]
fn test_stale_cache_after_external_overwrite() {
    let mut driver = perfect_driver(10);
    let fh = driver.open("f").unwrap();
    driver.write(fh, &[b'o'; BLOCK_SIZE]).unwrap();

    let location = driver.block_location(fh, 0).unwrap().unwrap();
    assert!(driver.is_cached(location));
    assert!(driver
        .transport_mut()
        .overwrite_block(location.node, location.block_id, &[b'n'; BLOCK_SIZE]));

    // No invalidation: the cached copy still wins
    driver.seek(fh, 0).unwrap();
    assert_eq!(driver.read(fh, 256).unwrap(), vec![b'o'; 256]);
}

#[test]
fn test_independent_drivers_share_service() {
    let mut service = BlockService::new(ServiceConfig::perfect(11));

    let first_node = {
        let transport = |request: &[u8]| service.handle(request);
        let mut driver = Driver::new(transport);
        let fh = driver.open("f").unwrap();
        driver.write(fh, &[1u8; BLOCK_SIZE]).unwrap();
        let node = driver.local_node().unwrap();
        driver.shutdown().unwrap();
        node
    };

    let second_node = {
        let transport = |request: &[u8]| service.handle(request);
        let mut driver = Driver::new(transport);
        driver.open("f").unwrap();
        driver.local_node().unwrap()
    };

    assert_ne!(first_node, second_node);
    assert_eq!(service.stats().blocks_stored, 1);
    assert_eq!(service.stats().clients, 1);
}

#[test]
fn test_requests_are_well_formed() {
    let mut service = BlockService::new(ServiceConfig::perfect(12));
    let mut sizes = Vec::new();
    {
        let transport = |request: &[u8]| {
            sizes.push(request.len());
            assert!(Packet::decode(request).is_ok());
            service.handle(request)
        };
        let mut driver = Driver::new(transport);
        let fh = driver.open("f").unwrap();
        driver.write(fh, &[5u8; 512]).unwrap();
        driver.read(fh, 256).unwrap();
        driver.shutdown().unwrap();
    }

    // INIT, CREATE (with payload), STOP; the read hit the cache
    assert_eq!(sizes, vec![41, 1065, 41]);
}
