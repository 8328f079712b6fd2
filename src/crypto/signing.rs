use anyhow::{Context, Result};
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use schnorrkel::{
    ExpansionMode, Keypair as Sr25519Keypair, MiniSecretKey, PublicKey as Sr25519PublicKey,
    Signature as Sr25519Signature,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::crypto::identity::{
    DEFAULT_SS58_PREFIX, PUBLIC_KEY_LENGTH, decode_public_key, encode_ss58,
};

/// Length of an sr25519/ed25519 signature in bytes
pub const SIGNATURE_LENGTH: usize = 64;

/// Signing context used by substrate wallets for sr25519
const SUBSTRATE_CONTEXT: &[u8] = b"substrate";

/// Signature scheme used by identities on this network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    /// Schnorrkel signatures (network hotkeys)
    #[default]
    Sr25519,
    /// Ed25519 signatures
    Ed25519,
}

impl FromStr for SignatureScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sr25519" => Ok(Self::Sr25519),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(anyhow::anyhow!(
                "Unknown signature scheme '{}' (expected sr25519 or ed25519)",
                other
            )),
        }
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sr25519 => write!(f, "sr25519"),
            Self::Ed25519 => write!(f, "ed25519"),
        }
    }
}

/// Action covered by a client signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedAction {
    Bind,
    Unbind,
    UnbindAll,
}

impl SignedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Unbind => "unbind",
            Self::UnbindAll => "unbind_all",
        }
    }
}

/// Canonical bytes a client signs: `<action>:<worker_name>:<timestamp>`
///
/// For bulk unbinds the subject is the identity itself.
pub fn canonical_message(action: SignedAction, subject: &str, timestamp: i64) -> Vec<u8> {
    format!("{}:{}:{}", action.as_str(), subject, timestamp).into_bytes()
}

/// Verifies that a message was signed by the key behind an identity.
///
/// Fails closed: malformed identities, malformed signatures and library errors
/// all report "not authentic".
#[derive(Debug, Clone, Copy)]
pub struct SignatureVerifier {
    scheme: SignatureScheme,
}

impl SignatureVerifier {
    pub fn new(scheme: SignatureScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// Returns `true` only if `signature_hex` authenticates `message` for `identity`
    pub fn verify(&self, identity: &str, message: &[u8], signature_hex: &str) -> bool {
        let Some(public_key) = decode_public_key(identity) else {
            debug!(identity = %identity, "Identity does not decode to a public key");
            return false;
        };
        let Some(signature) = decode_signature(signature_hex) else {
            debug!(identity = %identity, "Signature is not 64 hex-encoded bytes");
            return false;
        };

        match self.scheme {
            SignatureScheme::Sr25519 => verify_sr25519(&public_key, message, &signature),
            SignatureScheme::Ed25519 => verify_ed25519(&public_key, message, &signature),
        }
    }

    /// Verify a signature over the canonical message for `action`
    pub fn verify_action(
        &self,
        identity: &str,
        action: SignedAction,
        subject: &str,
        timestamp: i64,
        signature_hex: &str,
    ) -> bool {
        let message = canonical_message(action, subject, timestamp);
        self.verify(identity, &message, signature_hex)
    }
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new(SignatureScheme::default())
    }
}

fn decode_signature(signature_hex: &str) -> Option<[u8; SIGNATURE_LENGTH]> {
    let trimmed = signature_hex.trim();
    let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(stripped).ok()?;
    bytes.try_into().ok()
}

fn verify_sr25519(
    public_key: &[u8; PUBLIC_KEY_LENGTH],
    message: &[u8],
    signature: &[u8; SIGNATURE_LENGTH],
) -> bool {
    let Ok(public) = Sr25519PublicKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Sr25519Signature::from_bytes(signature) else {
        return false;
    };

    if public
        .verify_simple(SUBSTRATE_CONTEXT, message, &signature)
        .is_ok()
    {
        return true;
    }

    // Browser wallets wrap raw payloads before signing them
    let wrapped = [b"<Bytes>".as_slice(), message, b"</Bytes>".as_slice()].concat();
    public
        .verify_simple(SUBSTRATE_CONTEXT, &wrapped, &signature)
        .is_ok()
}

fn verify_ed25519(
    public_key: &[u8; PUBLIC_KEY_LENGTH],
    message: &[u8],
    signature: &[u8; SIGNATURE_LENGTH],
) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = Ed25519Signature::from_bytes(signature);
    verifying_key.verify_strict(message, &signature).is_ok()
}

// ============================================================================
// Local signing (client tooling and tests)
// ============================================================================

enum SignerKey {
    Sr25519(Box<Sr25519Keypair>),
    Ed25519(SigningKey),
}

/// Holds a private key and produces signatures the verifier accepts
pub struct LocalSigner {
    scheme: SignatureScheme,
    key: SignerKey,
}

impl LocalSigner {
    /// Derive a signer from a 32-byte seed
    pub fn from_seed(scheme: SignatureScheme, seed: &[u8; 32]) -> Result<Self> {
        let key = match scheme {
            SignatureScheme::Sr25519 => {
                let mini = MiniSecretKey::from_bytes(seed)
                    .map_err(|e| anyhow::anyhow!("Invalid sr25519 seed: {}", e))?;
                SignerKey::Sr25519(Box::new(mini.expand_to_keypair(ExpansionMode::Ed25519)))
            }
            SignatureScheme::Ed25519 => SignerKey::Ed25519(SigningKey::from_bytes(seed)),
        };
        Ok(Self { scheme, key })
    }

    /// Derive a signer from a hex-encoded 32-byte seed (optional `0x`)
    pub fn from_seed_hex(scheme: SignatureScheme, seed_hex: &str) -> Result<Self> {
        let trimmed = seed_hex.trim();
        let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
            .context("Seed is not valid hex")?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Seed must be exactly 32 bytes"))?;
        Self::from_seed(scheme, &seed)
    }

    /// Generate a fresh random signer, returning it with its seed
    pub fn generate(scheme: SignatureScheme) -> Result<(Self, [u8; 32])> {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Ok((Self::from_seed(scheme, &seed)?, seed))
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        match &self.key {
            SignerKey::Sr25519(keypair) => keypair.public.to_bytes(),
            SignerKey::Ed25519(signing_key) => signing_key.verifying_key().to_bytes(),
        }
    }

    /// SS58 address of this signer on the generic prefix
    pub fn identity(&self) -> String {
        encode_ss58(&self.public_key(), DEFAULT_SS58_PREFIX as u8)
    }

    /// Sign raw bytes, returning the hex-encoded signature
    pub fn sign(&self, message: &[u8]) -> String {
        let bytes = match &self.key {
            SignerKey::Sr25519(keypair) => keypair.sign_simple(SUBSTRATE_CONTEXT, message).to_bytes(),
            SignerKey::Ed25519(signing_key) => signing_key.sign(message).to_bytes(),
        };
        hex::encode(bytes)
    }

    /// Sign the canonical message for an action
    pub fn sign_action(&self, action: SignedAction, subject: &str, timestamp: i64) -> String {
        self.sign(&canonical_message(action, subject, timestamp))
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("scheme", &self.scheme)
            .field("identity", &self.identity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(scheme: SignatureScheme, byte: u8) -> LocalSigner {
        LocalSigner::from_seed(scheme, &[byte; 32]).unwrap()
    }

    #[test]
    fn test_sr25519_roundtrip() {
        let signer = signer(SignatureScheme::Sr25519, 7);
        let verifier = SignatureVerifier::new(SignatureScheme::Sr25519);
        let identity = signer.identity();
        let worker = format!("rig_{}", identity);

        let signature = signer.sign_action(SignedAction::Bind, &worker, 1_700_000_000);
        assert!(verifier.verify_action(&identity, SignedAction::Bind, &worker, 1_700_000_000, &signature));
    }

    #[test]
    fn test_ed25519_roundtrip() {
        let signer = signer(SignatureScheme::Ed25519, 9);
        let verifier = SignatureVerifier::new(SignatureScheme::Ed25519);
        let identity = signer.identity();

        let signature = signer.sign(b"payload");
        assert!(verifier.verify(&identity, b"payload", &signature));
        assert!(verifier.verify(&format!("0x{}", hex::encode(signer.public_key())), b"payload", &signature));
    }

    #[test]
    fn test_signature_bound_to_worker_and_timestamp() {
        let signer = signer(SignatureScheme::Sr25519, 3);
        let verifier = SignatureVerifier::new(SignatureScheme::Sr25519);
        let identity = signer.identity();

        let signature = signer.sign_action(SignedAction::Bind, "worker_a", 100);
        assert!(!verifier.verify_action(&identity, SignedAction::Bind, "worker_b", 100, &signature));
        assert!(!verifier.verify_action(&identity, SignedAction::Bind, "worker_a", 101, &signature));
        assert!(!verifier.verify_action(&identity, SignedAction::Unbind, "worker_a", 100, &signature));
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let alice = signer(SignatureScheme::Sr25519, 1);
        let mallory = signer(SignatureScheme::Sr25519, 2);
        let verifier = SignatureVerifier::new(SignatureScheme::Sr25519);

        let signature = mallory.sign(b"message");
        assert!(!verifier.verify(&alice.identity(), b"message", &signature));
    }

    #[test]
    fn test_wrapped_payload_accepted_for_sr25519() {
        let signer = signer(SignatureScheme::Sr25519, 4);
        let verifier = SignatureVerifier::new(SignatureScheme::Sr25519);

        let signature = signer.sign(b"<Bytes>bind:w:1</Bytes>");
        assert!(verifier.verify(&signer.identity(), b"bind:w:1", &signature));
    }

    #[test]
    fn test_fails_closed_on_malformed_input() {
        let signer = signer(SignatureScheme::Ed25519, 5);
        let verifier = SignatureVerifier::new(SignatureScheme::Ed25519);
        let identity = signer.identity();

        assert!(!verifier.verify(&identity, b"m", ""));
        assert!(!verifier.verify(&identity, b"m", "zz"));
        assert!(!verifier.verify(&identity, b"m", &"ab".repeat(63)));
        assert!(!verifier.verify("5Invalid", b"m", &signer.sign(b"m")));
        assert!(!verifier.verify(&identity, b"m", &"00".repeat(64)));
    }

    #[test]
    fn test_scheme_mismatch_rejected() {
        let signer = signer(SignatureScheme::Ed25519, 6);
        let verifier = SignatureVerifier::new(SignatureScheme::Sr25519);
        assert!(!verifier.verify(&signer.identity(), b"m", &signer.sign(b"m")));
    }

    #[test]
    fn test_scheme_parsing() {
        assert_eq!("SR25519".parse::<SignatureScheme>().unwrap(), SignatureScheme::Sr25519);
        assert_eq!("ed25519".parse::<SignatureScheme>().unwrap(), SignatureScheme::Ed25519);
        assert!("rsa".parse::<SignatureScheme>().is_err());
    }
}
