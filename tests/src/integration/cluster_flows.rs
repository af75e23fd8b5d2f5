//! # Cluster Consensus Flows
//!
//! Several operators, each running its own node, take the same duties
//! through cluster consensus and partial signature aggregation:
//!
//! 1. **Start**: every operator proposes duty-agnostic data for the slot
//! 2. **Decide**: commits are exchanged until the cluster instance decides
//! 3. **Fan-out**: each validator runner signs its own payload
//! 4. **Aggregate**: partial signatures reach quorum and are reconstructed

#[cfg(test)]
mod tests {
    use super::super::harness::{init_tracing, validator, Testbed, ValidatorSpec};
    use qc_18_cluster_consensus::adapters::{HashShareSigner, StaticBeaconNode};
    use qc_18_cluster_consensus::domain::{
        derive_cluster_id, BlsSignature, ClusterError, ConsensusData, Duty, MessageId, OperatorId,
        PartialSigState, Recipient, Role, SigningPayload, Slot,
    };
    use qc_18_cluster_consensus::events::{ConsensusStart, NetworkMessage, PartialSignatureMessage};
    use qc_18_cluster_consensus::ports::BeaconNode;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const COMMITTEE: [u64; 4] = [1, 2, 3, 4];

    /// The value every honest operator proposes for `slot`
    async fn expected_value(slot: Slot, with_sync: bool) -> ConsensusData {
        let beacon = StaticBeaconNode::new();
        let mut attestation = beacon.attestation_data(slot).await.unwrap();
        attestation.index = 0;
        ConsensusData {
            slot,
            attestation: Some(attestation),
            sync_committee_block_root: if with_sync {
                Some(beacon.sync_committee_block_root(slot).await.unwrap())
            } else {
                None
            },
        }
    }

    fn expected_signature(duty: &Duty, value: &ConsensusData, testbed: &Testbed) -> BlsSignature {
        let root = SigningPayload::derive(duty.role, value, duty)
            .unwrap()
            .signing_root(testbed.config.domain);
        HashShareSigner::validator_signature(&duty.validator_pubkey, &root)
    }

    fn assert_finalized(testbed: &Testbed, operator: u64, duty: &Duty, expected: BlsSignature) {
        let node = testbed.node(operator);
        let cluster_id = node
            .router
            .cluster_of(&duty.validator_pubkey)
            .expect("validator registered");
        let runner = node
            .router
            .cluster(&cluster_id)
            .and_then(|cluster| cluster.runner(&duty.validator_pubkey, duty.role))
            .expect("runner created at duty start");
        assert_eq!(runner.state(), PartialSigState::Finalized, "operator {}", operator);
        assert_eq!(runner.aggregate(), Some(expected), "operator {}", operator);
    }

    fn committee_of(validators: &[u8]) -> Vec<ValidatorSpec> {
        validators
            .iter()
            .map(|&v| ValidatorSpec::new(v, &COMMITTEE))
            .collect()
    }

    // =============================================================================
    // INTEGRATION TESTS
    // =============================================================================

    /// Four honest operators: every duty ends with the same reconstructed signature everywhere
    #[tokio::test]
    async fn test_four_operators_finalize_every_duty() {
        init_tracing();
        let testbed = Testbed::new(&committee_of(&[1, 2, 3]));
        let slot = 64;
        let duties = vec![
            Duty::attester(validator(1), 1, slot, 4),
            Duty::attester(validator(2), 2, slot, 9),
            Duty::sync_committee(validator(3), 3, slot, vec![17]),
        ];

        let started = testbed.start_duties(&duties, slot).await;
        assert_eq!(started.len(), 4);
        for (_, outcome) in &started {
            let outcome = outcome.as_ref().unwrap();
            assert_eq!(outcome.consensus, Some(ConsensusStart::Started));
        }

        let rejections = testbed.pump().await;
        assert!(rejections
            .iter()
            .all(|(_, e)| matches!(e, ClusterError::AlreadyDecided(_))));

        let value = expected_value(slot, true).await;
        let cluster_id = derive_cluster_id(&COMMITTEE.map(OperatorId)).unwrap();
        for operator in COMMITTEE {
            let cluster = testbed.node(operator).router.cluster(&cluster_id).unwrap();
            assert_eq!(cluster.consensus().decided_root(slot), Some(value.root()));
            for duty in &duties {
                assert_finalized(&testbed, operator, duty, expected_signature(duty, &value, &testbed));
            }
        }
    }

    /// One silent operator (f = 1) does not stop the other three
    #[tokio::test]
    async fn test_silent_operator_does_not_block_quorum() {
        init_tracing();
        let mut testbed = Testbed::new(&committee_of(&[1]));
        testbed.set_offline(4);
        let slot = 70;
        let duty = Duty::attester(validator(1), 1, slot, 2);

        testbed.start_duties(std::slice::from_ref(&duty), slot).await;
        testbed.pump().await;

        let value = expected_value(slot, false).await;
        for operator in [1, 2, 3] {
            assert_finalized(&testbed, operator, &duty, expected_signature(&duty, &value, &testbed));
        }
        assert!(!testbed
            .node(4)
            .router
            .cluster(&derive_cluster_id(&COMMITTEE.map(OperatorId)).unwrap())
            .unwrap()
            .has_running_instance());
    }

    /// A forged partial signature is rejected as a peer fault and changes nothing
    #[tokio::test]
    async fn test_forged_partial_signature_rejected() {
        init_tracing();
        let testbed = Testbed::new(&committee_of(&[1]));
        let slot = 80;
        let duty = Duty::attester(validator(1), 1, slot, 0);
        testbed.start_duties(std::slice::from_ref(&duty), slot).await;

        let forged = PartialSignatureMessage {
            slot,
            signer: OperatorId(4),
            signing_root: [0xEE; 32],
            partial_signature: BlsSignature([0x11; 96]),
        };
        let message_id = MessageId::new(
            testbed.config.domain,
            Role::Attester,
            Recipient::Validator(validator(1)),
        )
        .unwrap();
        let envelope = NetworkMessage::partial_signature(message_id, &forged).unwrap();

        for (_, result) in testbed.deliver(OperatorId(4), &envelope).await {
            let err = result.unwrap_err();
            assert!(matches!(err, ClusterError::InvalidPartialSignature { .. }));
            assert!(err.is_peer_fault());
        }

        testbed.pump().await;
        let value = expected_value(slot, false).await;
        for operator in COMMITTEE {
            assert_finalized(&testbed, operator, &duty, expected_signature(&duty, &value, &testbed));
        }
    }

    /// Two clusters sharing operators decide and sign independently
    #[tokio::test]
    async fn test_overlapping_clusters_are_independent() {
        init_tracing();
        let testbed = Testbed::new(&[
            ValidatorSpec::new(1, &[1, 2, 3, 4]),
            ValidatorSpec::new(2, &[1, 2, 3, 5]),
        ]);
        let slot = 96;
        let duties = vec![
            Duty::attester(validator(1), 1, slot, 1),
            Duty::attester(validator(2), 2, slot, 2),
        ];

        let started = testbed.start_duties(&duties, slot).await;
        // Operators 1-3 start both clusters, 4 and 5 one each
        assert_eq!(started.len(), 8);
        assert!(started.iter().all(|(_, outcome)| outcome.is_ok()));

        let rejections = testbed.pump().await;
        // Operators outside a cluster drop its traffic
        assert!(rejections.iter().all(|(_, e)| matches!(
            e,
            ClusterError::AlreadyDecided(_) | ClusterError::UnroutableMessage(_)
        )));

        let value = expected_value(slot, false).await;
        for operator in [1, 2, 3, 4] {
            assert_finalized(&testbed, operator, &duties[0], expected_signature(&duties[0], &value, &testbed));
        }
        for operator in [1, 2, 3, 5] {
            assert_finalized(&testbed, operator, &duties[1], expected_signature(&duties[1], &value, &testbed));
        }
        assert!(testbed.node(4).router.cluster_of(&validator(2)).is_none());
    }

    /// Clusters of four and seven operators each decide with their own quorum
    #[tokio::test]
    async fn test_clusters_of_different_sizes() {
        init_tracing();
        let large: Vec<u64> = (1..=7).collect();
        let mut testbed = Testbed::new(&[
            ValidatorSpec::new(1, &COMMITTEE),
            ValidatorSpec::new(2, &large),
        ]);
        // Four of seven is below the quorum of five
        for operator in [5, 6, 7] {
            testbed.set_offline(operator);
        }
        let slot = 128;
        let duties = vec![
            Duty::attester(validator(1), 1, slot, 1),
            Duty::attester(validator(2), 2, slot, 2),
        ];
        testbed.start_duties(&duties, slot).await;
        testbed.pump().await;

        let value = expected_value(slot, false).await;
        assert_finalized(&testbed, 1, &duties[0], expected_signature(&duties[0], &value, &testbed));

        let large_id = derive_cluster_id(&large.iter().copied().map(OperatorId).collect::<Vec<_>>()).unwrap();
        let cluster = testbed.node(1).router.cluster(&large_id).unwrap();
        assert_eq!(cluster.consensus().highest_decided_slot(), None);
        assert_eq!(cluster.consensus().running_slot(), Some(slot));
    }

    /// Consecutive slots run back to back on the same cluster instance
    #[tokio::test]
    async fn test_consecutive_slots() {
        init_tracing();
        let testbed = Testbed::new(&committee_of(&[1, 2]));
        let cluster_id = derive_cluster_id(&COMMITTEE.map(OperatorId)).unwrap();

        for slot in [100, 101] {
            let duties: Vec<Duty> = [1u8, 2]
                .iter()
                .map(|&v| Duty::attester(validator(v), v as u64, slot, v as u64))
                .collect();
            testbed.start_duties(&duties, slot).await;
            testbed.pump().await;

            let value = expected_value(slot, false).await;
            for duty in &duties {
                assert_finalized(&testbed, 2, duty, expected_signature(duty, &value, &testbed));
            }
        }

        let cluster = testbed.node(1).router.cluster(&cluster_id).unwrap();
        assert_eq!(cluster.consensus().highest_decided_slot(), Some(101));
        assert!(matches!(
            testbed
                .start_duties(&[Duty::attester(validator(1), 1, 100, 1)], 100)
                .await[0]
                .1,
            Err(ClusterError::StaleSlot { .. })
        ));
    }
}
