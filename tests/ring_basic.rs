//! Core ring behaviour on a large simulated device
//!
//! Geometry: 64 KiB sectors, ring on sectors 3..16, 4-byte objects.

use ringfs_rs::{Location, Partition, RingConfig, RingFs, RingFsError, SimFlash};

const VERSION: u32 = 0x42;
const SECTOR_SIZE: usize = 65536;
const SECTOR_OFFSET: usize = 3;
const SECTOR_COUNT: usize = 13;

fn device() -> SimFlash {
    SimFlash::new(SECTOR_SIZE, SECTOR_OFFSET + SECTOR_COUNT)
}

fn ring(sim: &mut SimFlash, version: u32) -> RingFs<&mut SimFlash> {
    RingFs::new(
        sim,
        Partition::new(SECTOR_SIZE, SECTOR_OFFSET, SECTOR_COUNT),
        RingConfig::new(version, 4),
    )
    .unwrap()
}

fn obj(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

fn fetch_u32(fs: &mut RingFs<&mut SimFlash>) -> u32 {
    let bytes = fs.fetch().unwrap();
    u32::from_le_bytes(bytes.try_into().unwrap())
}

/// Slot index counted from the start of the partition
fn offset_of(fs: &RingFs<&mut SimFlash>, loc: Location) -> usize {
    (loc.sector - SECTOR_OFFSET) * fs.slots_per_sector() + loc.slot
}

#[test]
fn test_format() {
    let mut sim = device();
    let mut fs = ring(&mut sim, VERSION);
    fs.format().unwrap();

    assert_eq!(fs.read_location(), Location::new(SECTOR_OFFSET, 0));
    assert_eq!(fs.write_location(), Location::new(SECTOR_OFFSET, 0));
    assert_eq!(fs.count_exact().unwrap(), 0);

    // Sectors outside the partition are untouched
    for sector in 0..SECTOR_OFFSET {
        assert!(fs.flash().sector(sector).iter().all(|&b| b == 0xFF));
    }
}

#[test]
fn test_scan() {
    let mut sim = device();
    ring(&mut sim, VERSION).format().unwrap();

    let mut fs = ring(&mut sim, VERSION);
    fs.scan().unwrap();

    assert_eq!(fs.slots_per_sector(), (SECTOR_SIZE - 16) / (12 + 4));
    assert_eq!(offset_of(&fs, fs.read_location()), 0);
    assert_eq!(offset_of(&fs, fs.cursor_location()), 0);
    assert_eq!(offset_of(&fs, fs.write_location()), 0);

    for value in [0x11, 0x22, 0x33] {
        fs.append(&obj(value)).unwrap();
    }

    fs.scan().unwrap();
    assert_eq!(fs.count_exact().unwrap(), 3);

    let mut other = ring(&mut sim, VERSION + 1);
    assert!(matches!(other.scan(), Err(RingFsError::Corruption(_))));
}

#[test]
fn test_scan_blank_device_fails() {
    let mut sim = device();
    let mut fs = ring(&mut sim, VERSION);
    assert!(matches!(fs.scan(), Err(RingFsError::Corruption(_))));
}

#[test]
fn test_append_fetch_rewind() {
    let mut sim = device();
    let mut fs = ring(&mut sim, VERSION);
    fs.format().unwrap();

    for i in 0..3u32 {
        fs.append(&obj(0x11 * (i + 1))).unwrap();
        assert_eq!(offset_of(&fs, fs.write_location()), i as usize + 1);
    }

    for i in 0..3u32 {
        assert_eq!(fetch_u32(&mut fs), 0x11 * (i + 1));
        assert_eq!(offset_of(&fs, fs.cursor_location()), i as usize + 1);
    }
    assert!(matches!(fs.fetch(), Err(RingFsError::Empty)));

    fs.rewind().unwrap();
    assert_eq!(offset_of(&fs, fs.cursor_location()), 0);

    for i in 0..3u32 {
        assert_eq!(fetch_u32(&mut fs), 0x11 * (i + 1));
    }
}

#[test]
fn test_discard_fetched() {
    let mut sim = device();
    let mut fs = ring(&mut sim, VERSION);
    fs.format().unwrap();

    for i in 0..4u32 {
        fs.append(&obj(0x11 * (i + 1))).unwrap();
    }
    for i in 0..2u32 {
        assert_eq!(fetch_u32(&mut fs), 0x11 * (i + 1));
    }

    fs.discard_fetched().unwrap();
    assert_eq!(offset_of(&fs, fs.read_location()), 2);
    assert_eq!(offset_of(&fs, fs.cursor_location()), 2);
    assert_eq!(offset_of(&fs, fs.write_location()), 4);

    for i in 2..4u32 {
        assert_eq!(fetch_u32(&mut fs), 0x11 * (i + 1));
    }

    fs.discard_fetched().unwrap();
    assert_eq!(offset_of(&fs, fs.read_location()), 4);
    assert_eq!(offset_of(&fs, fs.cursor_location()), 4);
    assert_eq!(offset_of(&fs, fs.write_location()), 4);
}

#[test]
fn test_discard_single_objects() {
    let mut sim = device();
    let mut fs = ring(&mut sim, VERSION);
    fs.format().unwrap();

    assert!(matches!(fs.discard(), Err(RingFsError::Empty)));

    for i in 0..3u32 {
        fs.append(&obj(i)).unwrap();
    }

    fs.discard().unwrap();
    assert_eq!(fs.count_exact().unwrap(), 2);
    assert_eq!(fetch_u32(&mut fs), 1);

    fs.discard().unwrap();
    fs.discard().unwrap();
    assert_eq!(fs.count_exact().unwrap(), 0);
    assert!(matches!(fs.fetch(), Err(RingFsError::Empty)));
    assert!(matches!(fs.discard(), Err(RingFsError::Empty)));
}

#[test]
fn test_capacity() {
    let mut sim = device();
    let fs = ring(&mut sim, VERSION);
    let slots_per_sector = (SECTOR_SIZE - 16) / (12 + 4);
    assert_eq!(fs.capacity(), (SECTOR_COUNT - 1) * slots_per_sector);
}

#[test]
fn test_count() {
    let mut sim = device();
    let mut fs = ring(&mut sim, VERSION);
    fs.format().unwrap();
    assert_eq!(fs.count_exact().unwrap(), 0);

    for i in 0..10u32 {
        fs.append(&obj(0x11 * (i + 1))).unwrap();
    }
    assert_eq!(fs.count_exact().unwrap(), 10);
    assert_eq!(fs.count_estimate(), 10);

    fs.scan().unwrap();
    assert_eq!(fs.count_exact().unwrap(), 10);
    assert_eq!(fs.count_estimate(), 10);

    for i in 10..13u32 {
        fs.append(&obj(0x11 * (i + 1))).unwrap();
    }
    assert_eq!(fs.count_exact().unwrap(), 13);
    assert_eq!(fs.count_estimate(), 13);

    // fetch alone does not consume
    for i in 0..4u32 {
        assert_eq!(fetch_u32(&mut fs), 0x11 * (i + 1));
    }
    assert_eq!(fs.count_exact().unwrap(), 13);
    assert_eq!(fs.count_estimate(), 13);

    // scan forgets the cursor, so the same four come back
    fs.scan().unwrap();
    for i in 0..4u32 {
        assert_eq!(fetch_u32(&mut fs), 0x11 * (i + 1));
    }
    assert_eq!(fs.count_exact().unwrap(), 13);
    fs.discard_fetched().unwrap();
    assert_eq!(fs.count_exact().unwrap(), 9);
    assert_eq!(fs.count_estimate(), 9);

    // spill into the second sector
    let count = fs.slots_per_sector() - 4;
    for _ in 0..count {
        fs.append(&obj(0x42)).unwrap();
    }
    assert_eq!(fs.count_exact().unwrap(), 9 + count);
    assert_eq!(fs.count_estimate(), 9 + count);
}

#[test]
fn test_variable_length_objects() {
    let mut sim = device();
    let mut fs = ring(&mut sim, VERSION);
    fs.format().unwrap();

    fs.append(b"a").unwrap();
    fs.append(b"bcd").unwrap();
    fs.append(b"efgh").unwrap();

    assert_eq!(fs.fetch().unwrap(), b"a");
    assert_eq!(fs.fetch().unwrap(), b"bcd");

    let mut buf = [0u8; 2];
    assert_eq!(fs.fetch_into(&mut buf).unwrap(), 2);
    assert_eq!(&buf, b"ef");
}

#[test]
fn test_rejects_bad_object_sizes() {
    let mut sim = device();
    let mut fs = ring(&mut sim, VERSION);
    fs.format().unwrap();

    assert!(matches!(
        fs.append(&[]),
        Err(RingFsError::InvalidObjectSize { size: 0, max: 4 })
    ));
    assert!(matches!(
        fs.append(&[0; 5]),
        Err(RingFsError::InvalidObjectSize { size: 5, max: 4 })
    ));
    assert_eq!(fs.count_exact().unwrap(), 0);
}

#[test]
fn test_invalid_geometry() {
    let mut sim = device();
    assert!(matches!(
        RingFs::new(&mut sim, Partition::new(SECTOR_SIZE, 0, 1), RingConfig::new(VERSION, 4)),
        Err(RingFsError::Configuration(_))
    ));
    assert!(matches!(
        RingFs::new(&mut sim, Partition::new(64, 0, 4), RingConfig::new(VERSION, 64)),
        Err(RingFsError::Configuration(_))
    ));
    assert!(matches!(
        RingFs::new(&mut sim, Partition::new(SECTOR_SIZE, 0, 4), RingConfig::new(VERSION, 0)),
        Err(RingFsError::Configuration(_))
    ));
}

#[test]
fn test_dump_lists_every_sector() {
    let mut sim = device();
    let mut fs = ring(&mut sim, VERSION);
    fs.format().unwrap();
    fs.append(&obj(1)).unwrap();

    let text = fs.dump().unwrap();
    assert!(text.starts_with("RingFS read: {3,0} cursor: {3,0} write: {3,1}"));
    assert_eq!(text.lines().count(), 2 + SECTOR_COUNT);
    assert!(text.contains("[0003]"));
    assert!(text.contains("[0015]"));
    assert!(!text.contains("[0002]"));
}
