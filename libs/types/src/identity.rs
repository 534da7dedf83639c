//! Node identity types
//!
//! Every node is identified by a 20-byte address derived from its ed25519
//! public key. Addresses carry a total order over their raw bytes; symmetric
//! protocols (stream establishment, arc setup) use that order as the tiebreak
//! that decides which side dials.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::errors::IdentityError;

/// Number of bytes in an [`Address`].
pub const ADDRESS_LENGTH: usize = 20;

/// Length of a detached signature: 32-byte public key followed by the 64-byte
/// ed25519 signature over the message digest.
pub const SIGNATURE_LENGTH: usize = 96;

/// Keccak-256 over a sequence of byte slices.
pub fn keccak256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Stable 20-byte node address, the trailing bytes of the keccak-256 hash of
/// the node's public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Build an address directly from raw bytes.
    pub fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derive the address of a public key.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        let digest = keccak256(&[key.as_bytes()]);
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest[32 - ADDRESS_LENGTH..]);
        Self(bytes)
    }

    /// Raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Byte-wise XOR distance to another address, used to order peers in
    /// swarm queries.
    pub fn distance(&self, other: &Address) -> [u8; ADDRESS_LENGTH] {
        let mut out = [0u8; ADDRESS_LENGTH];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }
}

// The byte-lexicographic order is the protocol tiebreak. Keep it explicit
// rather than derived so the dependency is visible at the definition site.
impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(hex_part)
            .map_err(|_| IdentityError::InvalidAddress(s.to_string()))?;
        if bytes.len() != ADDRESS_LENGTH {
            return Err(IdentityError::InvalidAddress(s.to_string()));
        }
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(DeError::custom)
    }
}

/// Network location plus address: where a node can be reached, and who it
/// claims to be. Rendered as `/ip4/<host>/tcp/<port>/dark/<address>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MultiAddress {
    pub host: String,
    pub port: u16,
    pub address: Address,
}

impl MultiAddress {
    pub fn new(host: impl Into<String>, port: u16, address: Address) -> Self {
        Self {
            host: host.into(),
            port,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// `host:port` form suitable for a TCP dial.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for MultiAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/ip4/{}/tcp/{}/dark/{}",
            self.host, self.port, self.address
        )
    }
}

impl FromStr for MultiAddress {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            ["", "ip4", host, "tcp", port, "dark", addr] => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| IdentityError::InvalidMultiAddress(s.to_string()))?;
                let address = addr
                    .parse::<Address>()
                    .map_err(|_| IdentityError::InvalidMultiAddress(s.to_string()))?;
                Ok(Self {
                    host: host.to_string(),
                    port,
                    address,
                })
            }
            _ => Err(IdentityError::InvalidMultiAddress(s.to_string())),
        }
    }
}

impl Serialize for MultiAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MultiAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(DeError::custom)
    }
}

/// Node signing identity.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut seed[..]);
        Self::from_seed(seed)
    }

    /// Deterministic identity from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key())
    }

    pub fn multi_address(&self, host: impl Into<String>, port: u16) -> MultiAddress {
        MultiAddress::new(host, port, self.address())
    }

    /// Sign the keccak-256 digest of `message`. The returned bytes are the
    /// signer's public key followed by the ed25519 signature, so the verifier
    /// can bind the signature back to a claimed [`Address`].
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let digest = keccak256(&[message]);
        let signature = self.signing_key.sign(&digest);
        let mut out = Vec::with_capacity(SIGNATURE_LENGTH);
        out.extend_from_slice(self.public_key().as_bytes());
        out.extend_from_slice(&signature.to_bytes());
        out
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish()
    }
}

/// Verify a detached signature produced by [`Keypair::sign`] against the
/// address that claims to have produced it.
///
/// Checks both that the embedded public key hashes to `address` and that the
/// ed25519 signature over the keccak-256 digest of `message` verifies.
pub fn verify(address: &Address, message: &[u8], signature: &[u8]) -> Result<(), IdentityError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(IdentityError::InvalidSignature);
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&signature[..32]);
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| IdentityError::InvalidSignature)?;

    if Address::from_public_key(&key) != *address {
        return Err(IdentityError::AddressMismatch);
    }

    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(&signature[32..]);
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);

    let digest = keccak256(&[message]);
    key.verify(&digest, &sig)
        .map_err(|_| IdentityError::InvalidSignature)
}

/// The payload a dialer signs when opening a compute stream: binds the
/// connection to both endpoint addresses.
pub fn connect_message(from: &Address, to: &Address) -> Vec<u8> {
    format!("Republic Protocol: connect: from {} to {}", from, to).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_roundtrip() {
        let keypair = Keypair::generate();
        let addr = keypair.address();
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("not-an-address".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_ordering_is_bytewise() {
        let low = Address::from_bytes([0u8; ADDRESS_LENGTH]);
        let mut high_bytes = [0u8; ADDRESS_LENGTH];
        high_bytes[0] = 1;
        let high = Address::from_bytes(high_bytes);
        assert!(low < high);
    }

    #[test]
    fn test_multi_address_roundtrip() {
        let keypair = Keypair::generate();
        let multi = keypair.multi_address("127.0.0.1", 18514);
        let parsed: MultiAddress = multi.to_string().parse().unwrap();
        assert_eq!(multi, parsed);
        assert_eq!(parsed.socket_addr(), "127.0.0.1:18514");
    }

    #[test]
    fn test_sign_verify() {
        let keypair = Keypair::generate();
        let message = b"hello darkpool";
        let sig = keypair.sign(message);
        assert!(verify(&keypair.address(), message, &sig).is_ok());
    }

    #[test]
    fn test_verify_rejects_wrong_address() {
        let signer = Keypair::generate();
        let other = Keypair::generate();
        let sig = signer.sign(b"message");
        assert_eq!(
            verify(&other.address(), b"message", &sig),
            Err(IdentityError::AddressMismatch)
        );
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let signer = Keypair::generate();
        let sig = signer.sign(b"message");
        assert!(verify(&signer.address(), b"tampered", &sig).is_err());
    }

    #[test]
    fn test_connect_message_binds_both_endpoints() {
        let a = Keypair::generate().address();
        let b = Keypair::generate().address();
        assert_ne!(connect_message(&a, &b), connect_message(&b, &a));
    }

    #[test]
    fn test_keccak256_empty_input() {
        // Known keccak-256 digest of the empty string.
        assert_eq!(
            hex::encode(keccak256(&[])),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
