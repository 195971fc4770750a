use std::fmt::Write as _;

use sha1::{Digest, Sha1};

/// Mix one 32-bit value into a running seed. All arithmetic wraps.
///
/// The mixer is the classic two-round xorshift-multiply finalizer followed
/// by a boost-style seed combine, so identical sequences always fold to
/// identical seeds regardless of platform.
pub fn hash_int(x: u32, seed: u32) -> u32 {
    let mut t = x;
    t = ((t >> 16) ^ t).wrapping_mul(0x45d9_f3b);
    t = ((t >> 16) ^ t).wrapping_mul(0x45d9_f3b);
    t = (t >> 16) ^ t;
    seed ^ t
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// Fold a sequence of 32-bit values, seeding with the sequence length.
pub fn hash_vector(values: &[u32]) -> u32 {
    let mut seed = values.len() as u32;
    for &x in values {
        seed = hash_int(x, seed);
    }
    seed
}

/// [`hash_vector`] over per-target exit codes. Negative codes reinterpret
/// as their two's-complement bit pattern, matching the fold over `u32`.
pub fn hash_exit_codes(codes: &[i32]) -> u32 {
    let mut seed = codes.len() as u32;
    for &c in codes {
        seed = hash_int(c as u32, seed);
    }
    seed
}

/// Lowercase SHA-1 hex of `bytes`, used only as an artifact-name suffix.
pub fn input_digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
