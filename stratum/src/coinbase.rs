//! Coinbase Codec (C4, §4.4).
//!
//! Builds the Bitcoin-format coinbase transaction split into `coinb1`/
//! `coinb2` hex halves around the extranonce region, so that
//! `coinbase = coinb1 ‖ extranonce1 ‖ extranonce2 ‖ coinb2`.

use sha2::{Digest, Sha256};

/// Pool tag embedded after the BIP34 height push in the coinbase script.
const POOL_TAG: &[u8] = b"/bricspool/";

fn varint(n: u64) -> Vec<u8> {
    if n < 0xFD {
        vec![n as u8]
    } else if n <= 0xFFFF {
        let mut v = vec![0xFD];
        v.extend_from_slice(&(n as u16).to_le_bytes());
        v
    } else if n <= 0xFFFF_FFFF {
        let mut v = vec![0xFE];
        v.extend_from_slice(&(n as u32).to_le_bytes());
        v
    } else {
        let mut v = vec![0xFF];
        v.extend_from_slice(&n.to_le_bytes());
        v
    }
}

/// BIP34 height push (§4.4).
pub fn bip34_height_push(height: u64) -> Vec<u8> {
    if height < 17 {
        vec![0x50 + height as u8]
    } else if height < 128 {
        vec![0x01, height as u8]
    } else if height < 32768 {
        let mut v = vec![0x02];
        v.extend_from_slice(&(height as u16).to_le_bytes());
        v
    } else {
        let mut v = vec![0x03];
        let bytes = (height as u32).to_le_bytes();
        v.extend_from_slice(&bytes[..3]);
        v
    }
}

/// P2PKH-shaped output script over `SHA256(address)[:20]` (§9: not a
/// Bitcoin-valid address encoding, preserved because on-chain script
/// validation is out of scope).
fn pay_to_address_script(address: &str) -> Vec<u8> {
    let digest = Sha256::digest(address.as_bytes());
    let mut script = vec![0x76, 0xa9, 0x14]; // OP_DUP OP_HASH160 <push 20>
    script.extend_from_slice(&digest[..20]);
    script.push(0x88); // OP_EQUALVERIFY
    script.push(0xac); // OP_CHECKSIG
    script
}

/// The two coinbase halves, hex-encoded, ready to embed in a `mining.notify`.
pub struct CoinbaseHalves {
    pub coinb1: String,
    pub coinb2: String,
}

/// Build the coinbase split for a block at `height` paying `reward_sats`
/// to `recipient`. `extranonce1_len`/`extranonce2_size` determine the
/// scriptSig length declared in `coinb1`.
pub fn build_coinbase(
    height: u64,
    reward_sats: u64,
    recipient: &str,
    extranonce1_len: usize,
    extranonce2_size: usize,
) -> CoinbaseHalves {
    let mut script_prefix = bip34_height_push(height);
    script_prefix.extend_from_slice(POOL_TAG);

    let script_len = script_prefix.len() + extranonce1_len + extranonce2_size;

    let mut coinb1 = Vec::new();
    coinb1.extend_from_slice(&1u32.to_le_bytes()); // version
    coinb1.extend_from_slice(&varint(1)); // txin count
    coinb1.extend_from_slice(&[0u8; 32]); // null prev-tx
    coinb1.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // prev-index
    coinb1.extend_from_slice(&varint(script_len as u64));
    coinb1.extend_from_slice(&script_prefix);

    let pk_script = pay_to_address_script(recipient);
    let mut coinb2 = Vec::new();
    coinb2.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // sequence
    coinb2.extend_from_slice(&varint(1)); // txout count
    coinb2.extend_from_slice(&reward_sats.to_le_bytes());
    coinb2.extend_from_slice(&varint(pk_script.len() as u64));
    coinb2.extend_from_slice(&pk_script);
    coinb2.extend_from_slice(&0u32.to_le_bytes()); // locktime

    CoinbaseHalves {
        coinb1: hex::encode(coinb1),
        coinb2: hex::encode(coinb2),
    }
}
