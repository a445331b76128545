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

//! Capsule vesting — off-chain compilation of vesting schedules into signed
//! claim bundles.
//!
//! A schedule names, per beneficiary, the calendar times at which token
//! tranches unlock. The compiler converts each entry into a claim: the unlock
//! time becomes a block height (estimated from seconds-per-block against one
//! chain snapshot), the whole-token count becomes an exact raw amount, and
//! the injected signing credential authorizes the result. The output bundle
//! is the JSON artifact handed to recipients; its field names are a
//! compatibility contract.
//!
//! This crate never touches settlement state or the replay ledger; it only
//! drives the digest and signing primitives.

use std::collections::BTreeMap;

use capsule_claims::hash_for_claim;
use capsule_primitives::{
    address_from_pubkey, eth_signed_message_hash, Address, Hash256, Sig65, ADDRESS_LEN,
    SIGNATURE_LEN,
};
use k256::ecdsa::SigningKey;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Estimated block interval used when a deployment does not supply its own.
pub const DEFAULT_SECONDS_PER_BLOCK: u64 = 30;

/// One vesting tranche: `epoch` is a unix timestamp, `tokens` a whole-token
/// count (pre-decimals).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VestingEpoch {
    pub epoch: u64,
    pub tokens: u128,
}

/// Vesting description: beneficiary address (hex string, as it appears in the
/// JSON artifact) to its ordered tranches.
pub type VestingSchedule = BTreeMap<String, Vec<VestingEpoch>>;

/// Chain state read once per compilation run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub height: u64,
    pub timestamp: u64,
}

/// One signed claim in the bundle artifact. Field names and types are fixed;
/// `amount` is the decimal string of the raw integer amount and `proof` the
/// `0x`-prefixed 65-byte signature.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimRecord {
    pub proof: String,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub validity: u64,
    pub nonce: u64,
}

/// Bundle artifact: destination address to its ordered claims.
pub type ClaimBundle = BTreeMap<String, Vec<ClaimRecord>>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("claim signing failed")]
pub struct SignerError;

/// Signing credential injected into the compiler. Implementations sign the
/// signed-message wrap of the claim digest.
pub trait ClaimSigner {
    fn issuer(&self) -> Address;

    fn sign_digest(&self, digest: &Hash256) -> Result<Sig65, SignerError>;
}

/// In-process signer over a raw secp256k1 secret.
#[derive(Clone)]
pub struct LocalSigner {
    key: SigningKey,
}

impl LocalSigner {
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, SignerError> {
        SigningKey::from_slice(secret)
            .map(|key| Self { key })
            .map_err(|_| SignerError)
    }

    #[must_use]
    pub fn address(&self) -> Address {
        let point = self.key.verifying_key().to_encoded_point(false);
        let mut body = [0u8; 64];
        body.copy_from_slice(&point.as_bytes()[1..]);
        address_from_pubkey(&body)
    }
}

impl ClaimSigner for LocalSigner {
    fn issuer(&self) -> Address {
        self.address()
    }

    fn sign_digest(&self, digest: &Hash256) -> Result<Sig65, SignerError> {
        let wrapped = eth_signed_message_hash(digest);
        let (sig, recovery) = self
            .key
            .sign_prehash_recoverable(&wrapped)
            .map_err(|_| SignerError)?;
        let mut out = [0u8; SIGNATURE_LEN];
        out[..SIGNATURE_LEN - 1].copy_from_slice(&sig.to_bytes()[..]);
        out[SIGNATURE_LEN - 1] = 27 + recovery.to_byte();
        Ok(out)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VestingError {
    #[error("beneficiary address invalid: {0}")]
    BadBeneficiary(String),

    #[error("amount overflow scaling {tokens} whole tokens by 10^{decimals}")]
    AmountOverflow { tokens: u128, decimals: u32 },

    #[error(transparent)]
    Signer(#[from] SignerError),
}

/// Convert an unlock time into the first height at which the claim settles.
///
/// Integer floor of the remaining seconds over `seconds_per_block`, added to
/// the snapshot height. Unlock times at or before the snapshot clamp to the
/// snapshot height (immediately claimable).
#[must_use]
pub const fn valid_from_block(
    snapshot: ChainSnapshot,
    unlock_time: u64,
    seconds_per_block: u64,
) -> u64 {
    assert!(seconds_per_block > 0, "seconds_per_block must be positive");
    if unlock_time <= snapshot.timestamp {
        return snapshot.height;
    }
    snapshot
        .height
        .saturating_add((unlock_time - snapshot.timestamp) / seconds_per_block)
}

/// Scale a whole-token count to raw units: `tokens * 10^decimals`, exact.
pub fn raw_amount(tokens: u128, decimals: u32) -> Result<u128, VestingError> {
    let overflow = VestingError::AmountOverflow { tokens, decimals };
    let scale = U256::from(10u8)
        .checked_pow(U256::from(decimals))
        .ok_or_else(|| overflow.clone())?;
    let raw = U256::from(tokens)
        .checked_mul(scale)
        .ok_or_else(|| overflow.clone())?;
    if raw > U256::from(u128::MAX) {
        return Err(overflow);
    }
    Ok(raw.as_u128())
}

/// Parse a `0x`-prefixed (or bare) 40-hex-digit address string.
pub fn parse_address(s: &str) -> Result<Address, VestingError> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    let bytes =
        hex::decode(digits).map_err(|_| VestingError::BadBeneficiary(s.to_string()))?;
    if bytes.len() != ADDRESS_LEN {
        return Err(VestingError::BadBeneficiary(s.to_string()));
    }
    let mut out = [0u8; ADDRESS_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[must_use]
pub fn encode_address(a: &Address) -> String {
    format!("0x{}", hex::encode(a))
}

#[must_use]
fn encode_proof(p: &Sig65) -> String {
    format!("0x{}", hex::encode(p))
}

/// Compile a schedule into a signed claim bundle.
///
/// Beneficiaries are processed in key order and tranches in list order; the
/// nonce starts at `starting_nonce` and increments once per emitted claim,
/// so a bundle never reuses a nonce. The same schedule, snapshot, and signer
/// always produce the identical bundle.
pub fn compile_claim_bundle<S: ClaimSigner>(
    schedule: &VestingSchedule,
    snapshot: ChainSnapshot,
    signer: &S,
    decimals: u32,
    seconds_per_block: u64,
    starting_nonce: u64,
) -> Result<ClaimBundle, VestingError> {
    let issuer = signer.issuer();
    let from = encode_address(&issuer);
    let mut nonce = starting_nonce;
    let mut bundle = ClaimBundle::new();

    for (beneficiary, epochs) in schedule {
        let destination = parse_address(beneficiary)?;
        let to = encode_address(&destination);
        let mut records = Vec::with_capacity(epochs.len());

        for tranche in epochs {
            let validity = valid_from_block(snapshot, tranche.epoch, seconds_per_block);
            let amount = raw_amount(tranche.tokens, decimals)?;
            let digest = hash_for_claim(issuer, destination, amount, validity, nonce);
            let proof = signer.sign_digest(&digest)?;
            records.push(ClaimRecord {
                proof: encode_proof(&proof),
                from: from.clone(),
                to: to.clone(),
                amount: amount.to_string(),
                validity,
                nonce,
            });
            nonce += 1;
        }
        bundle.insert(to, records);
    }
    Ok(bundle)
}
