//! Cryptographic key pairs and signatures.
//!
//! Supports:
//! - ED25519: node identity and transport-level signing
//! - BLS12-381: provisioner keys; votes aggregate into one signature

use sbor::prelude::*;
use std::fmt;

/// Supported key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum KeyType {
    /// ED25519 - Fast, widely supported.
    Ed25519,
    /// BLS12-381 - Supports signature aggregation.
    Bls12381,
}

/// A cryptographic key pair for signing.
#[derive(Clone)]
pub enum KeyPair {
    /// ED25519 key pair.
    Ed25519(ed25519_dalek::SigningKey),
    /// BLS12-381 key pair.
    Bls12381(blst::min_pk::SecretKey),
}

impl KeyPair {
    /// Generate a new random Ed25519 keypair.
    pub fn generate_ed25519() -> Self {
        let mut csprng = rand::rngs::OsRng;
        let signing_key = ed25519_dalek::SigningKey::generate(&mut csprng);
        KeyPair::Ed25519(signing_key)
    }

    /// Generate a new random BLS12-381 keypair.
    pub fn generate_bls() -> Self {
        let mut ikm = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut ikm);
        let sk = blst::min_pk::SecretKey::key_gen(&ikm, &[]).unwrap();
        KeyPair::Bls12381(sk)
    }

    /// Generate a keypair from a seed (for testing and fixed fixtures).
    pub fn from_seed(key_type: KeyType, seed: &[u8; 32]) -> Self {
        match key_type {
            KeyType::Ed25519 => {
                let signing_key = ed25519_dalek::SigningKey::from_bytes(seed);
                KeyPair::Ed25519(signing_key)
            }
            KeyType::Bls12381 => {
                let sk = blst::min_pk::SecretKey::key_gen(seed, &[]).unwrap();
                KeyPair::Bls12381(sk)
            }
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        match self {
            KeyPair::Ed25519(signing_key) => {
                use ed25519_dalek::Signer;
                let sig = signing_key.sign(message);
                Signature::Ed25519(sig.to_bytes().to_vec())
            }
            KeyPair::Bls12381(sk) => {
                let sig = sk.sign(message, &[], &[]);
                Signature::Bls12381(sig.to_bytes().to_vec())
            }
        }
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        match self {
            KeyPair::Ed25519(signing_key) => {
                PublicKey::Ed25519(signing_key.verifying_key().to_bytes())
            }
            KeyPair::Bls12381(sk) => PublicKey::Bls12381(sk.sk_to_pk().to_bytes().to_vec()),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.public_key())
    }
}

/// A public key for signature verification.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub enum PublicKey {
    /// ED25519 public key (32 bytes).
    Ed25519([u8; 32]),
    /// BLS12-381 public key (48 bytes compressed).
    Bls12381(Vec<u8>),
}

impl PublicKey {
    /// Verify a signature.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        match (self, signature) {
            (PublicKey::Ed25519(pk_bytes), Signature::Ed25519(sig_bytes)) => {
                use ed25519_dalek::Verifier;
                let pk = match ed25519_dalek::VerifyingKey::from_bytes(pk_bytes) {
                    Ok(pk) => pk,
                    Err(_) => return false,
                };
                let sig_array: [u8; 64] = match sig_bytes.as_slice().try_into() {
                    Ok(arr) => arr,
                    Err(_) => return false,
                };
                let sig = ed25519_dalek::Signature::from_bytes(&sig_array);
                pk.verify(message, &sig).is_ok()
            }
            (PublicKey::Bls12381(pk_bytes), Signature::Bls12381(sig_bytes)) => {
                let pk = match blst::min_pk::PublicKey::from_bytes(pk_bytes) {
                    Ok(pk) => pk,
                    Err(_) => return false,
                };
                let sig = match blst::min_pk::Signature::from_bytes(sig_bytes) {
                    Ok(sig) => sig,
                    Err(_) => return false,
                };
                sig.verify(true, message, &[], &[], &pk, true) == blst::BLST_ERROR::BLST_SUCCESS
            }
            _ => false, // Mismatched types
        }
    }

    /// Raw key bytes. BLS keys order the provisioner set with these.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            PublicKey::Ed25519(bytes) => bytes.to_vec(),
            PublicKey::Bls12381(bytes) => bytes.clone(),
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicKey::Ed25519(bytes) => {
                write!(f, "PublicKey::Ed25519({})", hex::encode(bytes))
            }
            PublicKey::Bls12381(bytes) => {
                let hex = hex::encode(bytes);
                write!(
                    f,
                    "PublicKey::Bls12381({}..{})",
                    &hex[..8],
                    &hex[hex.len() - 8..]
                )
            }
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.to_bytes());
        write!(f, "{}..", &hex[..12.min(hex.len())])
    }
}

/// A cryptographic signature.
#[derive(Clone, PartialEq, Eq, BasicSbor)]
pub enum Signature {
    /// ED25519 signature (64 bytes).
    Ed25519(Vec<u8>),
    /// BLS12-381 signature (96 bytes compressed).
    Bls12381(Vec<u8>),
}

impl Signature {
    /// Get signature as bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Signature::Ed25519(bytes) => bytes.to_vec(),
            Signature::Bls12381(bytes) => bytes.clone(),
        }
    }

    /// Aggregate multiple BLS signatures into one.
    pub fn aggregate_bls(signatures: &[Signature]) -> Result<Self, AggregateError> {
        if signatures.is_empty() {
            return Err(AggregateError::Empty);
        }

        let bls_sigs: Vec<_> = signatures
            .iter()
            .filter_map(|s| match s {
                Signature::Bls12381(bytes) => blst::min_pk::Signature::from_bytes(bytes).ok(),
                _ => None,
            })
            .collect();

        if bls_sigs.len() != signatures.len() {
            return Err(AggregateError::MixedTypes);
        }

        let refs: Vec<&blst::min_pk::Signature> = bls_sigs.iter().collect();
        let agg = blst::min_pk::AggregateSignature::aggregate(&refs, true)
            .map_err(|_| AggregateError::AggregationFailed)?;

        Ok(Signature::Bls12381(agg.to_signature().to_bytes().to_vec()))
    }

    /// Verify an aggregated BLS signature over one message against a set of
    /// public keys.
    ///
    /// This is the fast-aggregate-verify path: all signers signed the exact
    /// same message bytes.
    pub fn aggregate_verify(&self, message: &[u8], signers: &[PublicKey]) -> bool {
        let sig_bytes = match self {
            Signature::Bls12381(bytes) => bytes,
            Signature::Ed25519(_) => return false,
        };

        let sig = match blst::min_pk::Signature::from_bytes(sig_bytes) {
            Ok(sig) => sig,
            Err(_) => return false,
        };

        let pks: Vec<_> = signers
            .iter()
            .filter_map(|pk| match pk {
                PublicKey::Bls12381(bytes) => blst::min_pk::PublicKey::from_bytes(bytes).ok(),
                _ => None,
            })
            .collect();

        if pks.is_empty() || pks.len() != signers.len() {
            return false;
        }

        let refs: Vec<&blst::min_pk::PublicKey> = pks.iter().collect();
        sig.fast_aggregate_verify(true, message, &[], &refs) == blst::BLST_ERROR::BLST_SUCCESS
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signature::Ed25519(bytes) => {
                write!(f, "Signature::Ed25519({}..)", &hex::encode(bytes)[..16])
            }
            Signature::Bls12381(bytes) => {
                let hex = hex::encode(bytes);
                write!(f, "Signature::Bls12381({}..)", &hex[..16])
            }
        }
    }
}

/// Errors that can occur during aggregation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    /// Empty list provided.
    #[error("Cannot aggregate empty list")]
    Empty,

    /// Mixed key/signature types.
    #[error("Cannot aggregate mixed types (ED25519 and BLS)")]
    MixedTypes,

    /// Aggregation operation failed.
    #[error("Aggregation failed")]
    AggregationFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_sign_verify() {
        let keypair = KeyPair::generate_ed25519();
        let message = b"test message";

        let signature = keypair.sign(message);
        let pubkey = keypair.public_key();

        assert!(pubkey.verify(message, &signature));
        assert!(!pubkey.verify(b"wrong message", &signature));
    }

    #[test]
    fn test_bls_sign_verify() {
        let keypair = KeyPair::generate_bls();
        let message = b"test message";

        let signature = keypair.sign(message);
        let pubkey = keypair.public_key();

        assert!(pubkey.verify(message, &signature));
    }

    #[test]
    fn test_bls_aggregate_verify() {
        let message = b"block hash";

        let keypairs: Vec<_> = (0..3).map(|_| KeyPair::generate_bls()).collect();
        let sigs: Vec<_> = keypairs.iter().map(|kp| kp.sign(message)).collect();
        let pubkeys: Vec<_> = keypairs.iter().map(|kp| kp.public_key()).collect();

        let agg = Signature::aggregate_bls(&sigs).unwrap();
        assert!(agg.aggregate_verify(message, &pubkeys));

        // A subset of signers must not verify
        assert!(!agg.aggregate_verify(message, &pubkeys[..2]));
    }

    #[test]
    fn test_keypair_from_seed_is_deterministic() {
        let seed = [42u8; 32];

        let kp1 = KeyPair::from_seed(KeyType::Bls12381, &seed);
        let kp2 = KeyPair::from_seed(KeyType::Bls12381, &seed);

        assert_eq!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn test_mixed_aggregation_rejected() {
        let ed = KeyPair::generate_ed25519().sign(b"m");
        let bls = KeyPair::generate_bls().sign(b"m");
        assert_eq!(
            Signature::aggregate_bls(&[ed, bls]),
            Err(AggregateError::MixedTypes)
        );
    }
}
