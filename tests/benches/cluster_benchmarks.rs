//! # Cluster Consensus Benchmarks
//!
//! | Operation | Expectation |
//! |-----------|-------------|
//! | ClusterId derivation | one SHA-256 over 8 bytes per operator |
//! | MessageId decode | constant time, no allocation |
//! | Signing root | one SHA-256 per validator duty |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qc_18_cluster_consensus::domain::{
    decode_message_id, derive_cluster_id, AttestationData, Checkpoint, ConsensusData, Duty,
    MessageId, OperatorId, Recipient, Role, SigningPayload, ValidatorPubkey, MAINNET_DOMAIN,
};
use rand::Rng;

fn bench_cluster_id_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-cluster-id");
    let mut rng = rand::thread_rng();

    for size in [4usize, 7, 10, 13] {
        let operators: Vec<OperatorId> = (0..size).map(|_| OperatorId(rng.gen())).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("derive", size), &operators, |b, ops| {
            b.iter(|| black_box(derive_cluster_id(ops).unwrap()))
        });
    }
    group.finish();
}

fn bench_message_id_decode(c: &mut Criterion) {
    let id = MessageId::new(
        MAINNET_DOMAIN,
        Role::Attester,
        Recipient::Validator(ValidatorPubkey([7; 48])),
    )
    .unwrap();
    let bytes = id.as_bytes().to_vec();

    c.bench_function("qc-18-message-id-decode", |b| {
        b.iter(|| black_box(decode_message_id(&bytes).unwrap()))
    });
}

fn bench_signing_root_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-signing-root");
    let value = ConsensusData {
        slot: 64,
        attestation: Some(AttestationData {
            slot: 64,
            index: 0,
            beacon_block_root: [1; 32],
            source: Checkpoint { epoch: 1, root: [2; 32] },
            target: Checkpoint { epoch: 2, root: [3; 32] },
        }),
        sync_committee_block_root: None,
    };

    for validators in [1usize, 32, 500] {
        let duties: Vec<Duty> = (0..validators)
            .map(|i| Duty::attester(ValidatorPubkey([i as u8; 48]), i as u64, 64, (i % 64) as u64))
            .collect();
        group.throughput(Throughput::Elements(validators as u64));
        group.bench_with_input(BenchmarkId::new("attester", validators), &duties, |b, duties| {
            b.iter(|| {
                for duty in duties {
                    let payload = SigningPayload::derive(Role::Attester, &value, duty).unwrap();
                    black_box(payload.signing_root(MAINNET_DOMAIN));
                }
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_cluster_id_derivation,
    bench_message_id_decode,
    bench_signing_root_fan_out
);
criterion_main!(benches);
