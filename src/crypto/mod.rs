//! Cryptographic utilities for the validator
//!
//! Provides identity decoding and signature verification for:
//! - SS58 and raw hex identities
//! - sr25519 (substrate context) and ed25519 signatures
//! - Canonical signed messages for bind/unbind actions
//! - Local signing for client tooling

pub mod identity;
pub mod signing;

pub use identity::{decode_public_key, decode_ss58, encode_ss58};
pub use signing::{
    LocalSigner, SignatureScheme, SignatureVerifier, SignedAction, canonical_message,
};
