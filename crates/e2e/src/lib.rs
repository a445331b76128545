//! End-to-end harness for the capsule token and claim settlement.
//!
//! Wires the capped token, the settlement state, and an advancing block
//! height into one fixture, and can replay compiled claim-bundle records
//! against it the way a recipient would.

#![forbid(unsafe_code)]
#![deny(warnings)]

use capsule_claims::{ClaimError, SettlementState};
use capsule_primitives::Address;
use capsule_token::{CappedToken, TokenError};
use capsule_vesting::{parse_address, ClaimRecord};

/// A single-node chain fixture: token ledger, settlement state, and height.
pub struct Chain {
    pub token: CappedToken,
    pub settlement: SettlementState,
    pub height: u64,
}

impl Chain {
    /// Deploy at height 1 with the full cap in `vault`.
    #[must_use]
    pub fn new(owner: Address, vault: Address) -> Self {
        Self {
            token: CappedToken::new(owner, vault),
            settlement: SettlementState::new(),
            height: 1,
        }
    }

    pub fn advance(&mut self, blocks: u64) {
        self.height += blocks;
    }

    /// Submit a claim for settlement at the current height.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_claim(
        &mut self,
        proof: &[u8],
        issuer: Address,
        destination: Address,
        amount: u128,
        valid_from_block: u64,
        nonce: u64,
    ) -> Result<(), ClaimError<TokenError>> {
        let height = self.height;
        self.settlement.claim_offchain_grant(
            &mut self.token,
            height,
            proof,
            issuer,
            destination,
            amount,
            valid_from_block,
            nonce,
        )
    }

    /// Submit one record from a compiled claim bundle, exactly as a
    /// recipient would: every field is taken from the artifact.
    pub fn submit_record(
        &mut self,
        record: &ClaimRecord,
    ) -> Result<(), ClaimError<TokenError>> {
        let issuer = parse_address(&record.from).expect("issuer address in record");
        let destination = parse_address(&record.to).expect("destination address in record");
        let amount: u128 = record.amount.parse().expect("amount is a decimal string");
        let proof = hex::decode(record.proof.trim_start_matches("0x")).expect("proof is hex");
        self.submit_claim(
            &proof,
            issuer,
            destination,
            amount,
            record.validity,
            record.nonce,
        )
    }
}
