#![no_main]
use libfuzzer_sys::fuzz_target;
use ringfs_rs::flash::Flash;
use ringfs_rs::{Partition, RingConfig, RingFs, SimFlash};

const SECTOR_SIZE: usize = 128;
const SECTOR_COUNT: usize = 4;

// Arbitrary bytes as a flash image: scan must never panic, and whatever it
// accepts must stay usable.
fuzz_target!(|data: &[u8]| {
    let mut sim = SimFlash::new(SECTOR_SIZE, SECTOR_COUNT);
    for (sector, chunk) in data.chunks(SECTOR_SIZE).take(SECTOR_COUNT).enumerate() {
        sim.program(sector, 0, chunk).ok();
    }

    let mut fs = match RingFs::new(
        &mut sim,
        Partition::new(SECTOR_SIZE, 0, SECTOR_COUNT),
        RingConfig::new(0x42, 8),
    ) {
        Ok(fs) => fs,
        Err(_) => return,
    };

    if fs.scan().is_err() {
        return;
    }

    let _ = fs.count_exact();
    let _ = fs.dump();
    while fs.fetch().is_ok() {}
    let _ = fs.append(b"fuzz");
    let _ = fs.discard();
});
