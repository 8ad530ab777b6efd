use serde::Serialize;

use crate::condition::Partition;

/// Number of buckets keys are spread across. Partition sizes and traffic allocations are
/// expressed on this scale.
pub const BUCKET_COUNT: u32 = 100;

/// The hash function a flag was issued with. The rule source picks it per flag and every
/// implementation evaluating that flag has to reproduce it bit for bit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HashAlgorithm {
    /// Multiply-by-31 string hash xor-ed with the seed. Wire code 1, and the default when a
    /// payload does not say.
    #[default]
    Legacy,
    /// MurmurHash3 x86 32-bit. Wire code 2.
    Murmur3,
}

impl HashAlgorithm {
    pub(crate) fn from_code(algo: Option<i64>) -> Option<HashAlgorithm> {
        match algo {
            None => Some(HashAlgorithm::default()),
            Some(1) => Some(HashAlgorithm::Legacy),
            Some(2) => Some(HashAlgorithm::Murmur3),
            Some(_) => None,
        }
    }

    /// The bucket in `[0, BUCKET_COUNT)` that `key` falls into for this `seed`.
    pub fn bucket(self, key: &str, seed: i64) -> u32 {
        match self {
            HashAlgorithm::Legacy => legacy_hash(key, seed).unsigned_abs() % BUCKET_COUNT,
            HashAlgorithm::Murmur3 => murmur3_32(key.as_bytes(), seed as u32) % BUCKET_COUNT,
        }
    }
}

/// Picks the treatment for `bucketing_key` out of `partitions`.
///
/// Partitions are walked in order, accumulating sizes; the first whose running total exceeds the
/// bucket wins. If the sizes never get there the last partition is returned. This is None only
/// for an empty partition list, which a built [crate::Condition] never has.
pub fn assign<'a>(
    algorithm: HashAlgorithm,
    bucketing_key: &str,
    seed: i64,
    partitions: &'a [Partition],
) -> Option<&'a str> {
    let bucket = algorithm.bucket(bucketing_key, seed);
    treatment_for_bucket(bucket, partitions)
}

pub(crate) fn treatment_for_bucket(bucket: u32, partitions: &[Partition]) -> Option<&str> {
    let mut covered = 0;
    for partition in partitions {
        covered += partition.size;
        if bucket < covered {
            return Some(&partition.treatment);
        }
    }
    partitions.last().map(|p| p.treatment.as_str())
}

fn legacy_hash(key: &str, seed: i64) -> i32 {
    let mut h: i32 = 0;
    for c in key.chars() {
        h = h.wrapping_mul(31).wrapping_add(c as i32);
    }
    // the wire seed is truncated to 32 bits
    h ^ (seed as i32)
}

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;

    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h ^= mix_k(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k ^= u32::from(*byte) << (8 * i);
        }
        h ^= mix_k(k);
    }

    h ^= data.len() as u32;
    fmix32(h)
}

fn mix_k(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}
