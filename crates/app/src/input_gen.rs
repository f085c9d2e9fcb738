//! Workload generation.
//!
//! When no workload file is given, we generate one that exercises every
//! driver path and checks itself: each READ carries the bytes a correct
//! driver must return.
//!
//! # Design
//!
//! The generated workload:
//! - Opens every object and writes it front to back, a block at a time or in
//!   256-byte slots (so both the append and the in-place update paths run)
//! - Reads back random slot-aligned ranges
//! - Closes, reopens, and overwrites random aligned ranges
//! - Re-reads the overwritten ranges and a few others, then closes
//! - Ends with EOF
//!
//! Objects are visited in a shuffled order in every phase so that requests
//! to different files interleave.

use crate::config::GeneratorConfig;
use crate::workload::WorkloadOp;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use scatter_gather_core::driver::SLOT_SIZE;
use scatter_gather_core::BLOCK_SIZE;

/// Payload characters; never a comma.
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const SLOTS_PER_BLOCK: usize = BLOCK_SIZE / SLOT_SIZE;

/// Expected contents of one object.
struct Object {
    name: String,
    contents: Vec<u8>,
}

/// Generate a self-checking workload.
pub fn generate_workload(config: &GeneratorConfig) -> Vec<WorkloadOp> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut ops = Vec::new();

    let mut objects: Vec<Object> = (0..config.files)
        .map(|idx| Object {
            name: format!("object{idx:03}.dat"),
            contents: Vec::new(),
        })
        .collect();
    let sizes: Vec<usize> = objects
        .iter()
        .map(|_| rng.gen_range(1..=config.max_blocks.max(1)))
        .collect();

    // Phase 1: create contents
    for idx in shuffled(objects.len(), &mut rng) {
        let object = &mut objects[idx];
        ops.push(WorkloadOp::Open {
            name: object.name.clone(),
        });

        for _ in 0..sizes[idx] {
            if rng.gen_bool(0.5) {
                let pos = object.contents.len();
                let data = random_data(&mut rng, BLOCK_SIZE);
                ops.push(write(object, pos, data));
            } else {
                let start = object.contents.len();
                for slot in 0..SLOTS_PER_BLOCK {
                    let data = random_data(&mut rng, SLOT_SIZE);
                    ops.push(write(object, start + slot * SLOT_SIZE, data));
                }
            }
        }
    }

    // Phase 2: verify, then close
    for idx in shuffled(objects.len(), &mut rng) {
        let object = &objects[idx];
        for _ in 0..rng.gen_range(1..=4) {
            let (pos, len) = aligned_range(&mut rng, object.contents.len());
            ops.push(read(object, pos, len));
        }
        ops.push(WorkloadOp::Close {
            name: object.name.clone(),
        });
    }

    // Phase 3: reopen, overwrite, re-read, close
    for idx in shuffled(objects.len(), &mut rng) {
        let object = &mut objects[idx];
        ops.push(WorkloadOp::Open {
            name: object.name.clone(),
        });

        let mut touched = Vec::new();
        for _ in 0..rng.gen_range(1..=4) {
            let (pos, len) = aligned_range(&mut rng, object.contents.len());
            let data = random_data(&mut rng, len);
            ops.push(write(object, pos, data));
            touched.push((pos, len));
        }

        let (pos, len) = aligned_range(&mut rng, object.contents.len());
        touched.push((pos, len));
        for (pos, len) in touched {
            ops.push(read(object, pos, len));
        }

        ops.push(WorkloadOp::Close {
            name: object.name.clone(),
        });
    }

    ops.push(WorkloadOp::Eof);
    ops
}

/// Write `data` at `pos` into the model and return the operation.
///
/// Writing at the end of the object grows it by a zero-filled block.
fn write(object: &mut Object, pos: usize, data: Vec<u8>) -> WorkloadOp {
    if pos == object.contents.len() {
        object.contents.resize(pos + BLOCK_SIZE, 0);
    }
    object.contents[pos..pos + data.len()].copy_from_slice(&data);

    WorkloadOp::Write {
        name: object.name.clone(),
        pos,
        data,
    }
}

fn read(object: &Object, pos: usize, len: usize) -> WorkloadOp {
    WorkloadOp::Read {
        name: object.name.clone(),
        pos,
        data: object.contents[pos..pos + len].to_vec(),
    }
}

/// A slot-aligned range inside one block of an object of `size` bytes.
fn aligned_range(rng: &mut ChaCha8Rng, size: usize) -> (usize, usize) {
    let block = rng.gen_range(0..size / BLOCK_SIZE);
    let slot = rng.gen_range(0..SLOTS_PER_BLOCK);
    let slots = rng.gen_range(1..=SLOTS_PER_BLOCK - slot);
    (block * BLOCK_SIZE + slot * SLOT_SIZE, slots * SLOT_SIZE)
}

fn random_data(rng: &mut ChaCha8Rng, len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
        .collect()
}

fn shuffled(len: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(rng);
    order
}
