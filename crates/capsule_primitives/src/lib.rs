#![forbid(unsafe_code)]
#![deny(
    warnings,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

//! Capsule primitives: Keccak-256 hashing, fixed-width big-endian word
//! encodings, signed-message prefixing, and address derivation.
//!
//! These are the normative utilities shared across the capsule crates. The
//! claim digest produced by `capsule_claims` is a hash over the packed
//! encodings defined here, and the signing side wraps that digest with
//! [`eth_signed_message_hash`] before producing a signature. Field widths,
//! ordering, and the prefix bytes are a hard compatibility contract between
//! off-chain signing tooling and settlement verification; none of them may
//! drift.

use primitive_types::U256;
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;

/// 32-byte hash (Keccak-256 output).
pub type Hash256 = [u8; 32];

/// 20-byte account identity: the trailing 20 bytes of the Keccak-256 hash of
/// an uncompressed secp256k1 public key.
pub type Address = [u8; 20];

/// 65-byte recoverable signature encoding `r || s || v`.
pub type Sig65 = [u8; 65];

pub const ADDRESS_LEN: usize = 20;
pub const WORD_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 65;

/// The all-zero address. Recovery reports this identity when a structurally
/// valid signature does not resolve to a curve point; no funded account can
/// ever have it.
pub const ZERO_ADDRESS: Address = [0u8; ADDRESS_LEN];

/// Prefix applied to a 32-byte digest before signing, per the standard
/// personal-message convention. The trailing `32` is the ASCII length of the
/// digest that follows.
pub const ETH_SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Keccak-256 of `input`.
#[must_use]
pub fn keccak256(input: &[u8]) -> Hash256 {
    let mut hasher = Keccak256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Encode an unsigned integer as a 32-byte big-endian word.
///
/// Every integer field of a claim is widened to this width before hashing,
/// so the packed layout matches a 256-bit encoding byte for byte.
#[must_use]
pub fn be_word(x: u128) -> [u8; WORD_LEN] {
    let mut out = [0u8; WORD_LEN];
    U256::from(x).to_big_endian(&mut out);
    out
}

/// Wrap a digest with [`ETH_SIGNED_MESSAGE_PREFIX`] and rehash.
///
/// Signers sign this wrapped hash, never the raw digest; verification must
/// apply the identical wrap or no signature ever validates.
#[must_use]
pub fn eth_signed_message_hash(digest: &Hash256) -> Hash256 {
    let mut buf = [0u8; 28 + WORD_LEN];
    buf[..28].copy_from_slice(ETH_SIGNED_MESSAGE_PREFIX);
    buf[28..].copy_from_slice(digest);
    keccak256(&buf)
}

/// Derive the 20-byte account identity from the 64-byte body of an
/// uncompressed secp256k1 public key (the SEC-1 point without its `0x04`
/// tag byte).
#[must_use]
pub fn address_from_pubkey(uncompressed: &[u8; 64]) -> Address {
    let digest = keccak256(uncompressed);
    let mut out = [0u8; ADDRESS_LEN];
    out.copy_from_slice(&digest[WORD_LEN - ADDRESS_LEN..]);
    out
}

/// Constant-time equality for 32-byte digests.
#[must_use]
pub fn ct_eq_hash(a: &Hash256, b: &Hash256) -> bool {
    bool::from(a.ct_eq(b))
}

/// Constant-time equality for addresses.
#[must_use]
pub fn ct_eq_addr(a: &Address, b: &Address) -> bool {
    bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_word_widens_to_32_bytes() {
        let w = be_word(0x0102_0304);
        assert_eq!(&w[..28], &[0u8; 28]);
        assert_eq!(&w[28..], &[1, 2, 3, 4]);
        assert_eq!(be_word(0), [0u8; WORD_LEN]);
    }

    #[test]
    fn be_word_max_u128_fills_low_half() {
        let w = be_word(u128::MAX);
        assert_eq!(&w[..16], &[0u8; 16]);
        assert_eq!(&w[16..], &[0xFF; 16]);
    }

    #[test]
    fn prefix_is_28_bytes() {
        assert_eq!(ETH_SIGNED_MESSAGE_PREFIX.len(), 28);
    }

    #[test]
    fn signed_message_hash_is_prefix_then_digest() {
        let digest = keccak256(b"capsule");
        let mut manual = Vec::new();
        manual.extend_from_slice(ETH_SIGNED_MESSAGE_PREFIX);
        manual.extend_from_slice(&digest);
        assert_eq!(eth_signed_message_hash(&digest), keccak256(&manual));
    }

    #[test]
    fn address_is_low_20_bytes_of_pubkey_hash() {
        let pubkey = [7u8; 64];
        let digest = keccak256(&pubkey);
        let addr = address_from_pubkey(&pubkey);
        assert_eq!(&addr[..], &digest[12..]);
    }

    #[test]
    fn ct_helpers_agree_with_plain_eq() {
        let a = keccak256(b"a");
        let b = keccak256(b"b");
        assert!(ct_eq_hash(&a, &a));
        assert!(!ct_eq_hash(&a, &b));
        let x: Address = [1u8; 20];
        let y: Address = [2u8; 20];
        assert!(ct_eq_addr(&x, &x));
        assert!(!ct_eq_addr(&x, &y));
    }
}
