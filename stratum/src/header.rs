//! Header Assembler & Hasher (C5, §4.5).
//!
//! Four byte orders meet here: the header's own little-endian fields, the
//! "display" hash order chain-core stores (`Block::hash`, reversed, the form
//! block explorers print), the internal order sha256 actually produces, and
//! the Stratum wire's word-swapped prevhash. This module is the only place
//! that converts between them.

use chain_core::{double_sha256, Hash256};
use num_bigint::BigUint;
use num_traits::Zero;

pub const HEADER_LEN: usize = 80;

/// Full byte reversal. `Block::hash`/`previous_hash` are stored in this
/// "display" order; everything else in this module works in internal order.
pub fn reverse_bytes(hash: &Hash256) -> Hash256 {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = hash[31 - i];
    }
    out
}

/// Swap bytes within each of the eight 4-byte words. An involution:
/// `word_swap(word_swap(x)) == x`.
pub fn word_swap(hash: &Hash256) -> Hash256 {
    let mut out = [0u8; 32];
    for word in 0..8 {
        for byte in 0..4 {
            out[word * 4 + byte] = hash[word * 4 + (3 - byte)];
        }
    }
    out
}

/// The prevhash as it goes out over the wire in `mining.notify` (§6),
/// derived from the stored display-order previous block hash.
pub fn wire_prevhash(previous_hash_display: &Hash256) -> Hash256 {
    word_swap(&reverse_bytes(previous_hash_display))
}

/// Recover the header's internal-order previous-hash field from the wire
/// prevhash. `word_swap` is its own inverse, so this is the same transform.
pub fn internal_prev_hash_from_wire(wire_prevhash: &Hash256) -> Hash256 {
    reverse_bytes(&word_swap(wire_prevhash))
}

/// Merkle root from the coinbase hash (internal order) and the branch
/// hashes supplied by the Job Manager (§4.5, §4.6), also internal order.
pub fn merkle_root(coinbase_hash: Hash256, branch: &[Hash256]) -> Hash256 {
    let mut acc = coinbase_hash;
    for node in branch {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&acc);
        buf[32..].copy_from_slice(node);
        acc = double_sha256(&buf);
    }
    acc
}

/// Branch of sibling hashes a miner needs to recompute the merkle root from
/// the coinbase hash alone, given the other transactions in the block
/// (internal order, in block order). The coinbase always occupies leaf 0,
/// so at each level its sibling is the branch entry (§4.4, §4.5).
pub fn merkle_branch(other_tx_hashes: &[Hash256]) -> Vec<Hash256> {
    let placeholder = [0u8; 32];
    let mut level: Vec<Hash256> = std::iter::once(placeholder)
        .chain(other_tx_hashes.iter().copied())
        .collect();
    let mut branch = Vec::new();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().expect("non-empty");
            level.push(last);
        }
        branch.push(level[1]);

        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&pair[0]);
            buf[32..].copy_from_slice(&pair[1]);
            next.push(double_sha256(&buf));
        }
        level = next;
    }
    branch
}

/// Fields needed to assemble an 80-byte header (§3 "Stratum Job" /
/// `mining.submit` combined).
pub struct HeaderFields {
    pub version: u32,
    pub previous_hash_internal: Hash256,
    pub merkle_root_internal: Hash256,
    pub ntime: u32,
    pub nbits: u32,
    pub nonce: u32,
}

/// Assemble the 80-byte block header, all multi-byte integer fields
/// little-endian, hash fields in internal order (§4.5).
pub fn assemble_header(fields: &HeaderFields) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&fields.version.to_le_bytes());
    header[4..36].copy_from_slice(&fields.previous_hash_internal);
    header[36..68].copy_from_slice(&fields.merkle_root_internal);
    header[68..72].copy_from_slice(&fields.ntime.to_le_bytes());
    header[72..76].copy_from_slice(&fields.nbits.to_le_bytes());
    header[76..80].copy_from_slice(&fields.nonce.to_le_bytes());
    header
}

/// Double-sha256 of the header, internal order (the form compared against
/// the target, not the display form stored on `Block`).
pub fn header_hash_internal(header: &[u8; HEADER_LEN]) -> Hash256 {
    double_sha256(header)
}

/// Display-order hash suitable for `Block::hash`/human-readable logging.
pub fn header_hash_display(header: &[u8; HEADER_LEN]) -> Hash256 {
    reverse_bytes(&header_hash_internal(header))
}

/// Decode compact `nbits` into a 256-bit target (§4.5, §6).
pub fn bits_to_target(bits: u32) -> BigUint {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    if mantissa == 0 {
        return BigUint::zero();
    }
    if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3))
    }
}

/// Encode a 256-bit target back into compact `nbits` form (Bitcoin Core's
/// `GetCompact`), the inverse of `bits_to_target`.
pub fn target_to_bits(target: &BigUint) -> u32 {
    if target.is_zero() {
        return 0;
    }
    let bytes = target.to_bytes_be();
    let mut size = bytes.len() as u32;
    let mut mantissa: u32 = if size <= 3 {
        let mut m: u32 = 0;
        for &b in &bytes {
            m = (m << 8) | b as u32;
        }
        m << (8 * (3 - size))
    } else {
        ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
    };

    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        size += 1;
    }
    (size << 24) | mantissa
}

/// Interpret a hash (internal order, i.e. little-endian as a number) and
/// compare it against a target. The share/block is valid when `hash <= target`.
pub fn hash_meets_target(hash_internal: &Hash256, target: &BigUint) -> bool {
    BigUint::from_bytes_le(hash_internal) <= *target
}
