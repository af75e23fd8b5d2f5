//! Deterministic hash-based share signer
//!
//! Stands in for threshold BLS in tests and simulations. Share keys,
//! partial signatures and the reconstructed signature are all SHA-256
//! expansions, so every operator reconstructs the same validator signature
//! from any quorum. Offers no security whatsoever.

use crate::domain::{
    BlsSignature, OperatorId, Root, ShareMember, SharePubkey, ValidatorPubkey, ValidatorShare,
};
use crate::ports::{ShareSigner, SignatureVerifier};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

fn expand<const N: usize>(label: &[u8], parts: &[&[u8]]) -> [u8; N] {
    let mut out = [0u8; N];
    for (counter, chunk) in out.chunks_mut(32).enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(label);
        hasher.update((counter as u32).to_le_bytes());
        for part in parts {
            hasher.update(part);
        }
        let digest = hasher.finalize();
        chunk.copy_from_slice(&digest[..chunk.len()]);
    }
    out
}

/// Hash-based signer for one operator, also usable as verifier.
#[derive(Clone, Debug)]
pub struct HashShareSigner {
    operator: OperatorId,
}

impl HashShareSigner {
    pub fn new(operator: OperatorId) -> Self {
        Self { operator }
    }

    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    /// Share key `operator` holds for `validator`.
    pub fn share_pubkey(validator: &ValidatorPubkey, operator: OperatorId) -> SharePubkey {
        SharePubkey(expand(b"share", &[validator.as_bytes(), &operator.to_bytes()]))
    }

    /// Validator share with a committee made of `operators`.
    pub fn validator_share(
        validator: ValidatorPubkey,
        validator_index: u64,
        operators: &[OperatorId],
    ) -> ValidatorShare {
        ValidatorShare {
            validator_pubkey: validator,
            validator_index,
            committee: operators
                .iter()
                .map(|&operator_id| ShareMember {
                    operator_id,
                    share_pubkey: Self::share_pubkey(&validator, operator_id),
                })
                .collect(),
        }
    }

    /// Partial signature produced with `share_pubkey` over `signing_root`.
    pub fn partial_signature(share_pubkey: &SharePubkey, signing_root: &Root) -> BlsSignature {
        BlsSignature(expand(b"partial", &[&share_pubkey.0, signing_root]))
    }

    /// Validator signature any quorum reconstructs.
    pub fn validator_signature(validator: &ValidatorPubkey, signing_root: &Root) -> BlsSignature {
        BlsSignature(expand(b"validator", &[validator.as_bytes(), signing_root]))
    }
}

#[async_trait]
impl ShareSigner for HashShareSigner {
    async fn sign(
        &self,
        validator: &ValidatorPubkey,
        signing_root: &Root,
    ) -> Result<BlsSignature, String> {
        let share = Self::share_pubkey(validator, self.operator);
        Ok(Self::partial_signature(&share, signing_root))
    }
}

impl SignatureVerifier for HashShareSigner {
    fn verify_partial(
        &self,
        share_pubkey: &SharePubkey,
        signing_root: &Root,
        signature: &BlsSignature,
    ) -> bool {
        Self::partial_signature(share_pubkey, signing_root) == *signature
    }

    fn reconstruct(
        &self,
        validator: &ValidatorPubkey,
        signing_root: &Root,
        shares: &[(OperatorId, BlsSignature)],
    ) -> Result<BlsSignature, String> {
        for (operator, signature) in shares {
            let share = Self::share_pubkey(validator, *operator);
            if !self.verify_partial(&share, signing_root, signature) {
                return Err(format!("share of operator {} does not verify", operator));
            }
        }
        if shares.is_empty() {
            return Err("no shares to reconstruct from".into());
        }
        Ok(Self::validator_signature(validator, signing_root))
    }
}
