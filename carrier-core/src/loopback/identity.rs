//! Node identity: X25519 keypair, base58 user id, and the checksummed friend address.

use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

const KEY_LEN: usize = 32;
const NOSPAM_LEN: usize = 4;
const CHECKSUM_LEN: usize = 2;
const ADDRESS_LEN: usize = KEY_LEN + NOSPAM_LEN + CHECKSUM_LEN;

/// Keypair of one node. The user id is derived from the public key.
pub struct Keypair {
    secret: StaticSecret,
    public: [u8; KEY_LEN],
}

impl Keypair {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Restore a keypair from persisted secret bytes.
    pub fn from_secret_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    pub fn secret_bytes(&self) -> [u8; KEY_LEN] {
        self.secret.to_bytes()
    }

    pub fn public_key(&self) -> &[u8; KEY_LEN] {
        &self.public
    }

    pub fn user_id(&self) -> String {
        bs58::encode(self.public).into_string()
    }

    pub fn address(&self, nospam: u32) -> String {
        encode_address(&self.public, nospam)
    }
}

fn checksum(key: &[u8; KEY_LEN], nospam: u32) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(nospam.to_be_bytes());
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

/// base58(public key ‖ nospam (big endian) ‖ checksum).
pub fn encode_address(key: &[u8; KEY_LEN], nospam: u32) -> String {
    let mut raw = Vec::with_capacity(ADDRESS_LEN);
    raw.extend_from_slice(key);
    raw.extend_from_slice(&nospam.to_be_bytes());
    raw.extend_from_slice(&checksum(key, nospam));
    bs58::encode(raw).into_string()
}

/// Split an address into public key and nospam. `None` for bad encoding or checksum.
pub fn parse_address(address: &str) -> Option<([u8; KEY_LEN], u32)> {
    let raw = bs58::decode(address).into_vec().ok()?;
    if raw.len() != ADDRESS_LEN {
        return None;
    }
    let key: [u8; KEY_LEN] = raw[..KEY_LEN].try_into().ok()?;
    let nospam = u32::from_be_bytes(raw[KEY_LEN..KEY_LEN + NOSPAM_LEN].try_into().ok()?);
    if raw[KEY_LEN + NOSPAM_LEN..] != checksum(&key, nospam) {
        return None;
    }
    Some((key, nospam))
}

/// User id carried by a valid address.
pub fn user_id_from_address(address: &str) -> Option<String> {
    parse_address(address).map(|(key, _)| bs58::encode(key).into_string())
}

pub fn is_valid_user_id(id: &str) -> bool {
    bs58::decode(id)
        .into_vec()
        .map(|raw| raw.len() == KEY_LEN)
        .unwrap_or(false)
}
