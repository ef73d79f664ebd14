#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ringfs_rs::{Partition, RingConfig, RingFs, SimFlash};

#[derive(Arbitrary, Debug)]
enum Op {
    Append(Vec<u8>),
    Fetch,
    Discard,
    DiscardFetched,
    Rewind,
    Rescan,
    PowerLoss(u8),
}

#[derive(Arbitrary, Debug)]
struct Input {
    reject_when_full: bool,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let mut sim = SimFlash::new(256, 4);
    let config = RingConfig::new(1, 8).with_reject_write_when_full(input.reject_when_full);
    let partition = Partition::new(256, 0, 4);

    let mut fs = match RingFs::new(&mut sim, partition, config) {
        Ok(fs) => fs,
        Err(_) => return,
    };
    if fs.format().is_err() {
        return;
    }

    // Bookkeeping checks only hold while no write has been cut short
    let mut faulted = false;

    for op in input.ops.into_iter().take(512) {
        match op {
            Op::Append(bytes) => {
                let _ = fs.append(&bytes);
            }
            Op::Fetch => {
                let _ = fs.fetch();
            }
            Op::Discard => {
                let _ = fs.discard();
            }
            Op::DiscardFetched => {
                let _ = fs.discard_fetched();
            }
            Op::Rewind => {
                let _ = fs.rewind();
            }
            Op::Rescan => {
                fs.flash_mut().clear_faults();
                if fs.scan().is_err() {
                    return;
                }
                faulted = false;
            }
            Op::PowerLoss(budget) => {
                fs.flash_mut().fail_after_programs(budget as usize % 8);
                faulted = true;
            }
        }

        if faulted {
            continue;
        }
        if let Ok(exact) = fs.count_exact() {
            assert!(exact <= fs.count_estimate());
            assert!(exact <= fs.capacity());
        }
    }
});
