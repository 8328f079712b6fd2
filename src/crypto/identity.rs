//! Identity decoding
//!
//! Identities arrive as SS58 addresses (the network's hotkey format) or as a raw
//! 32-byte public key in hex. Both decode to the public key used for signature
//! verification. Decoding never panics; anything malformed yields `None`.

use blake2::{Blake2b512, Digest};

/// Length of an sr25519/ed25519 public key
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Generic substrate SS58 prefix, used when encoding addresses locally
pub const DEFAULT_SS58_PREFIX: u16 = 42;

const SS58_CHECKSUM_PREIMAGE: &[u8] = b"SS58PRE";
const SS58_CHECKSUM_LENGTH: usize = 2;

/// Decode an identity string to its 32-byte public key
pub fn decode_public_key(identity: &str) -> Option<[u8; PUBLIC_KEY_LENGTH]> {
    let identity = identity.trim();
    if identity.is_empty() {
        return None;
    }

    decode_hex_key(identity).or_else(|| decode_ss58(identity).map(|(key, _)| key))
}

/// Decode an SS58 address into `(public_key, network_prefix)`
pub fn decode_ss58(address: &str) -> Option<([u8; PUBLIC_KEY_LENGTH], u16)> {
    let data = bs58::decode(address).into_vec().ok()?;

    // One-byte prefixes cover 0..=63, two-byte prefixes 64..=16383
    let (prefix_len, prefix) = match data.first()? {
        0..=63 => (1, u16::from(data[0])),
        64..=127 => {
            let second = *data.get(1)?;
            let lower = (data[0] << 2) | (second >> 6);
            let upper = second & 0b0011_1111;
            (2, u16::from(lower) | (u16::from(upper) << 8))
        }
        _ => return None,
    };

    if data.len() != prefix_len + PUBLIC_KEY_LENGTH + SS58_CHECKSUM_LENGTH {
        return None;
    }

    let body_end = prefix_len + PUBLIC_KEY_LENGTH;
    let checksum = ss58_checksum(&data[..body_end]);
    if data[body_end..] != checksum[..SS58_CHECKSUM_LENGTH] {
        return None;
    }

    let mut key = [0u8; PUBLIC_KEY_LENGTH];
    key.copy_from_slice(&data[prefix_len..body_end]);
    Some((key, prefix))
}

/// Encode a public key as an SS58 address with a one-byte network prefix
pub fn encode_ss58(public_key: &[u8; PUBLIC_KEY_LENGTH], prefix: u8) -> String {
    let prefix = prefix & 0b0011_1111;
    let mut data = Vec::with_capacity(1 + PUBLIC_KEY_LENGTH + SS58_CHECKSUM_LENGTH);
    data.push(prefix);
    data.extend_from_slice(public_key);
    let checksum = ss58_checksum(&data);
    data.extend_from_slice(&checksum[..SS58_CHECKSUM_LENGTH]);
    bs58::encode(data).into_string()
}

fn ss58_checksum(body: &[u8]) -> Vec<u8> {
    let mut hasher = Blake2b512::new();
    hasher.update(SS58_CHECKSUM_PREIMAGE);
    hasher.update(body);
    hasher.finalize().to_vec()
}

fn decode_hex_key(identity: &str) -> Option<[u8; PUBLIC_KEY_LENGTH]> {
    let stripped = identity.strip_prefix("0x").unwrap_or(identity);
    if stripped.len() != PUBLIC_KEY_LENGTH * 2 {
        return None;
    }
    let bytes = hex::decode(stripped).ok()?;
    bytes.try_into().ok()
}
