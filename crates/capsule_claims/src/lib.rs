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
    clippy::missing_panics_doc,
    clippy::result_large_err
)]

//! Capsule claims — offline-authorized transfer settlement.
//!
//! A token holder pre-signs a claim: a binding promise to transfer a fixed
//! amount to a fixed destination, settleable only from a fixed block height
//! onward, and consumable at most once. Authorization happens anywhere (the
//! signer never touches the ledger); settlement happens here, gated by
//! signature recovery, a height check, and a per-issuer consumed-nonce set.
//!
//! The claim digest layout and the signed-message wrap are the compatibility
//! contract with signing tooling; see [`hash_for_claim`] and
//! `capsule_primitives::eth_signed_message_hash`.

use std::collections::BTreeSet;

use capsule_primitives::{
    address_from_pubkey, be_word, ct_eq_addr, eth_signed_message_hash, keccak256, Address,
    Hash256, ADDRESS_LEN, SIGNATURE_LEN, WORD_LEN, ZERO_ADDRESS,
};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use thiserror::Error;

/// Packed claim encoding: issuer ‖ destination ‖ amount ‖ validity ‖ nonce.
pub const CLAIM_ENCODING_LEN: usize = 2 * ADDRESS_LEN + 3 * WORD_LEN;

/// Canonical claim digest over the caller-supplied fields.
///
/// Layout (136 bytes, then Keccak-256): `issuer(20) ‖ destination(20) ‖
/// amount(32, big-endian) ‖ valid_from_block(32, big-endian) ‖
/// nonce(32, big-endian)`. Pure and deterministic; identical inputs yield the
/// identical digest across processes. Signers sign the
/// signed-message wrap of this digest, not the digest itself.
#[must_use]
pub fn hash_for_claim(
    issuer: Address,
    destination: Address,
    amount: u128,
    valid_from_block: u64,
    nonce: u64,
) -> Hash256 {
    let mut buf = [0u8; CLAIM_ENCODING_LEN];
    buf[..20].copy_from_slice(&issuer);
    buf[20..40].copy_from_slice(&destination);
    buf[40..72].copy_from_slice(&be_word(amount));
    buf[72..104].copy_from_slice(&be_word(u128::from(valid_from_block)));
    buf[104..136].copy_from_slice(&be_word(u128::from(nonce)));
    keccak256(&buf)
}

/// Structural defects in a 65-byte `r ‖ s ‖ v` proof. These are terminal and
/// never retried; a proof that parses but recovers to the wrong identity is
/// reported as [`ClaimError::BadProof`] instead.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProofError {
    #[error("proof length invalid: expected 65 got {got}")]
    Length { got: usize },

    #[error("recovery parameter out of range: {v}")]
    RecoveryParam { v: u8 },

    #[error("r or s is not a valid scalar")]
    Scalar,

    #[error("non-canonical s value")]
    NonCanonicalS,
}

fn split_proof(proof: &[u8]) -> Result<(Signature, RecoveryId), ProofError> {
    if proof.len() != SIGNATURE_LEN {
        return Err(ProofError::Length { got: proof.len() });
    }
    let v = proof[SIGNATURE_LEN - 1];
    if v != 27 && v != 28 {
        return Err(ProofError::RecoveryParam { v });
    }
    let recovery = RecoveryId::from_byte(v - 27).ok_or(ProofError::RecoveryParam { v })?;
    let signature =
        Signature::from_slice(&proof[..SIGNATURE_LEN - 1]).map_err(|_| ProofError::Scalar)?;
    if signature.normalize_s().is_some() {
        return Err(ProofError::NonCanonicalS);
    }
    Ok((signature, recovery))
}

fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let mut body = [0u8; 64];
    body.copy_from_slice(&point.as_bytes()[1..]);
    address_from_pubkey(&body)
}

/// Recover the signing identity for `digest` from a 65-byte proof.
///
/// The signed-message wrap is applied here; callers pass the raw claim
/// digest. A structurally valid proof that does not resolve to a curve point
/// recovers to [`ZERO_ADDRESS`] rather than failing, so the caller's
/// identity comparison is the single authorization decision.
pub fn recover_claim_signer(digest: &Hash256, proof: &[u8]) -> Result<Address, ProofError> {
    let (signature, recovery) = split_proof(proof)?;
    let wrapped = eth_signed_message_hash(digest);
    Ok(
        VerifyingKey::recover_from_prehash(&wrapped, &signature, recovery)
            .map_or(ZERO_ADDRESS, |key| address_from_verifying_key(&key)),
    )
}

/// Seam to the underlying fungible-token ledger.
///
/// Settlement depends on `transfer` being atomic (no partial debit/credit)
/// and on its balance-insufficiency failure; it re-implements neither.
pub trait TokenLedger {
    type Error;

    fn transfer(&mut self, from: Address, to: Address, amount: u128) -> Result<(), Self::Error>;
}

/// Terminal outcome of a rejected settlement attempt.
///
/// `BadProof` deliberately conflates a wrong signer, a tampered field, and a
/// corrupted signature: all three shift the recovered identity, and keeping
/// them indistinguishable denies a prober the knowledge of which field was
/// wrong. `Transfer` carries the ledger's own error unchanged.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClaimError<E> {
    #[error("malformed proof: {0}")]
    MalformedSignature(#[from] ProofError),

    #[error("proof does not authorize this claim")]
    BadProof,

    #[error("height {current} below claim validity {valid_from}")]
    TooEarly { valid_from: u64, current: u64 },

    #[error("nonce already consumed for this issuer")]
    AlreadyUsed,

    #[error("token ledger rejected transfer: {0}")]
    Transfer(E),
}

/// Settlement state: the per-issuer consumed-nonce set.
///
/// Exclusively owns the replay ledger. Entries are created lazily (absence
/// means unconsumed), written exactly once on settlement success, and never
/// removed. The exclusive borrow taken by [`Self::claim_offchain_grant`]
/// serializes check-then-consume, so two attempts for the same `(issuer,
/// nonce)` can never both observe it unconsumed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettlementState {
    consumed: BTreeSet<(Address, u64)>,
}

impl SettlementState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            consumed: BTreeSet::new(),
        }
    }

    /// Whether `(issuer, nonce)` has already settled.
    #[must_use]
    pub fn nonce_used(&self, issuer: Address, nonce: u64) -> bool {
        self.consumed.contains(&(issuer, nonce))
    }

    /// Settle an offline-authorized claim. Callable by anyone holding the
    /// claim parameters and proof; the proof alone authorizes.
    ///
    /// `current_height` is the ledger height snapshot for this attempt; it is
    /// consulted exactly once, so the outcome is a pure function of one
    /// reading. Checks run in a fixed order and the first failure is the
    /// attempt's terminal outcome with no state change; only a fully
    /// successful attempt consumes the nonce, so a balance-rejected claim
    /// stays retryable.
    #[allow(clippy::too_many_arguments)]
    pub fn claim_offchain_grant<L: TokenLedger>(
        &mut self,
        ledger: &mut L,
        current_height: u64,
        proof: &[u8],
        issuer: Address,
        destination: Address,
        amount: u128,
        valid_from_block: u64,
        nonce: u64,
    ) -> Result<(), ClaimError<L::Error>> {
        // 1) Recompute the digest from the caller-supplied fields. A forged
        //    field shifts the digest, which shifts the recovered signer.
        let digest = hash_for_claim(issuer, destination, amount, valid_from_block, nonce);

        // 2) Authorization: proof must recover to the claimed issuer. The
        //    zero identity (unrecoverable proof) can never authorize.
        let recovered = recover_claim_signer(&digest, proof)?;
        if ct_eq_addr(&recovered, &ZERO_ADDRESS) || !ct_eq_addr(&recovered, &issuer) {
            return Err(ClaimError::BadProof);
        }

        // 3) Height gate (strict: settleable once height >= validity).
        if current_height < valid_from_block {
            return Err(ClaimError::TooEarly {
                valid_from: valid_from_block,
                current: current_height,
            });
        }

        // 4) Replay gate.
        if self.consumed.contains(&(issuer, nonce)) {
            return Err(ClaimError::AlreadyUsed);
        }

        // 5) Delegated balance transfer; its failure leaves the nonce
        //    unconsumed.
        ledger
            .transfer(issuer, destination, amount)
            .map_err(ClaimError::Transfer)?;

        // 6) Consume. Terminal for this (issuer, nonce), forever.
        self.consumed.insert((issuer, nonce));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Address = [0x11; 20];
    const B: Address = [0x22; 20];

    // Pinned output of the packed layout: any drift here breaks every claim
    // ever signed against the old encoding.
    #[test]
    fn digest_matches_pinned_vector() {
        let d = hash_for_claim(A, B, 10_000, 7, 1);
        assert_eq!(
            hex::encode(d),
            "dcf5f4b8823e6bbfb76b54bbaf9a415229b37bd8c381d499a09e2646f7b81722"
        );
    }

    #[test]
    fn digest_is_deterministic_and_field_sensitive() {
        let d = hash_for_claim(A, B, 10_000, 7, 1);
        assert_eq!(d, hash_for_claim(A, B, 10_000, 7, 1));
        assert_ne!(d, hash_for_claim(B, B, 10_000, 7, 1));
        assert_ne!(d, hash_for_claim(A, A, 10_000, 7, 1));
        assert_ne!(d, hash_for_claim(A, B, 10_001, 7, 1));
        assert_ne!(d, hash_for_claim(A, B, 10_000, 8, 1));
        assert_ne!(d, hash_for_claim(A, B, 10_000, 7, 2));
    }

    #[test]
    fn proof_length_is_checked() {
        let digest = hash_for_claim(A, B, 1, 0, 0);
        assert_eq!(
            recover_claim_signer(&digest, &[0u8; 64]),
            Err(ProofError::Length { got: 64 })
        );
        assert_eq!(
            recover_claim_signer(&digest, &[]),
            Err(ProofError::Length { got: 0 })
        );
        assert_eq!(
            recover_claim_signer(&digest, &[0u8; 66]),
            Err(ProofError::Length { got: 66 })
        );
    }

    #[test]
    fn recovery_param_must_be_27_or_28() {
        let digest = hash_for_claim(A, B, 1, 0, 0);
        for v in [0u8, 1, 26, 29, 255] {
            let mut proof = [1u8; 65];
            proof[64] = v;
            assert_eq!(
                recover_claim_signer(&digest, &proof),
                Err(ProofError::RecoveryParam { v })
            );
        }
    }

    #[test]
    fn zero_scalars_are_structural_failures() {
        let digest = hash_for_claim(A, B, 1, 0, 0);
        let mut proof = [0u8; 65];
        proof[64] = 27;
        assert_eq!(recover_claim_signer(&digest, &proof), Err(ProofError::Scalar));
    }

    #[test]
    fn fresh_state_has_no_consumed_nonces() {
        let st = SettlementState::new();
        assert!(!st.nonce_used(A, 0));
        assert!(!st.nonce_used(A, u64::MAX));
    }
}
