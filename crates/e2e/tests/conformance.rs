//! Conformance checks: the packed digest layout and the bundle artifact
//! format, recomputed from first principles.

use capsule_claims::{hash_for_claim, recover_claim_signer};
use capsule_primitives::{be_word, keccak256};
use capsule_vesting::{
    compile_claim_bundle, encode_address, parse_address, ChainSnapshot, ClaimSigner, LocalSigner,
    VestingEpoch, VestingSchedule, DEFAULT_SECONDS_PER_BLOCK,
};

fn signer() -> LocalSigner {
    LocalSigner::from_secret_bytes(&[0x42; 32]).expect("secret is a valid scalar")
}

fn tiny_bundle() -> capsule_vesting::ClaimBundle {
    let snapshot = ChainSnapshot {
        height: 500,
        timestamp: 1_700_000_000,
    };
    let dest = [0xD0u8; 20];
    let mut schedule = VestingSchedule::new();
    schedule.insert(
        encode_address(&dest),
        vec![VestingEpoch {
            epoch: snapshot.timestamp + 90,
            tokens: 25,
        }],
    );
    compile_claim_bundle(
        &schedule,
        snapshot,
        &signer(),
        18,
        DEFAULT_SECONDS_PER_BLOCK,
        0,
    )
    .expect("bundle compiles")
}

#[test]
fn claim_digest_matches_the_packed_layout() {
    let issuer = [1u8; 20];
    let dest = [2u8; 20];
    let (amount, validity, nonce) = (10_000u128, 7u64, 1u64);

    let mut packed = Vec::with_capacity(136);
    packed.extend_from_slice(&issuer);
    packed.extend_from_slice(&dest);
    packed.extend_from_slice(&be_word(amount));
    packed.extend_from_slice(&be_word(u128::from(validity)));
    packed.extend_from_slice(&be_word(u128::from(nonce)));
    assert_eq!(packed.len(), 136);

    assert_eq!(
        hash_for_claim(issuer, dest, amount, validity, nonce),
        keccak256(&packed)
    );
}

#[test]
fn bundle_records_carry_the_agreed_field_names() {
    let bundle = tiny_bundle();
    let records = bundle.values().next().expect("one beneficiary");
    let value = serde_json::to_value(&records[0]).expect("serialize");
    let obj = value.as_object().expect("record is an object");

    assert_eq!(obj.len(), 6);
    for key in ["proof", "from", "to", "amount", "validity", "nonce"] {
        assert!(obj.contains_key(key), "missing field {key}");
    }
    assert!(obj["proof"].as_str().expect("proof").starts_with("0x"));
    assert!(obj["from"].as_str().expect("from").starts_with("0x"));
    assert!(obj["to"].as_str().expect("to").starts_with("0x"));
    assert!(obj["amount"]
        .as_str()
        .expect("amount is a decimal string")
        .chars()
        .all(|c| c.is_ascii_digit()));
    assert!(obj["validity"].is_u64());
    assert!(obj["nonce"].is_u64());
}

#[test]
fn bundle_round_trips_through_json() {
    let bundle = tiny_bundle();
    let json = serde_json::to_string_pretty(&bundle).expect("encode");
    let decoded: capsule_vesting::ClaimBundle = serde_json::from_str(&json).expect("decode");
    assert_eq!(decoded, bundle);
}

#[test]
fn bundle_proofs_recover_to_the_issuer() {
    let signer = signer();
    let bundle = tiny_bundle();
    for records in bundle.values() {
        for record in records {
            let issuer = parse_address(&record.from).expect("from");
            let dest = parse_address(&record.to).expect("to");
            let amount: u128 = record.amount.parse().expect("amount");
            let digest = hash_for_claim(issuer, dest, amount, record.validity, record.nonce);
            let proof = hex::decode(record.proof.trim_start_matches("0x")).expect("proof hex");
            assert_eq!(recover_claim_signer(&digest, &proof), Ok(signer.issuer()));
        }
    }
}

#[test]
fn bundle_compilation_is_deterministic() {
    assert_eq!(tiny_bundle(), tiny_bundle());
}
