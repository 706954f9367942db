//! Primitive value types shared by every component: participant keys,
//! 32-byte hashes and millisecond timestamps.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{TenureError, TenureResult};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Round number, starting at 1.
pub type RoundNumber = u64;

/// Term number, starting at 1.
pub type TermNumber = u64;

/// Block height.
pub type BlockHeight = u64;

/// Opaque participant public key.
///
/// The consensus core never verifies signatures made with these keys; it only
/// uses them as identities and as the input of the term-change tie-break.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Leading byte used by the term-change ordering, 0 for an empty key.
    pub fn first_byte(&self) -> u8 {
        self.0.first().copied().unwrap_or(0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> TenureResult<Self> {
        hex::decode(s)
            .map(Self)
            .map_err(|e| TenureError::InvalidConfig(format!("invalid public key hex {s}: {e}")))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        let full = self.to_hex();
        if full.len() > 12 {
            write!(f, "{}..", &full[..12])
        } else {
            f.write_str(&full)
        }
    }
}

impl From<&str> for PublicKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// 32-byte hash value used for in-values, out-values and consensus signatures.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// SHA-256 of arbitrary data.
    pub fn digest(data: &[u8]) -> Self {
        let out: [u8; 32] = Sha256::digest(data).into();
        Self(out)
    }

    /// SHA-256 of this hash's bytes. Out-values are `in_value.rehash()`.
    pub fn rehash(&self) -> Self {
        Self::digest(&self.0)
    }

    pub fn xor(&self, other: &Hash) -> Hash {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Hash(out)
    }

    /// Leading eight bytes as a big-endian integer.
    pub fn as_u64(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(head)
    }

    /// Maps the hash onto an order in `1..=modulus`.
    pub fn to_order(&self, modulus: usize) -> TenureResult<u32> {
        if modulus == 0 {
            return Err(TenureError::ArithmeticOverflow(
                "order modulus must be positive".to_string(),
            ));
        }
        let modulus = u64::try_from(modulus)
            .map_err(|_| TenureError::ArithmeticOverflow("participant count".to_string()))?;
        let order = (self.as_u64() % modulus) + 1;
        u32::try_from(order)
            .map_err(|_| TenureError::ArithmeticOverflow(format!("order {order} exceeds u32")))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0[..6]))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_is_self_inverse() {
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");
        assert_eq!(a.xor(&b).xor(&b), a);
        assert_eq!(a.xor(&a), Hash::ZERO);
    }

    #[test]
    fn test_to_order_range() {
        for i in 0..64u8 {
            let h = Hash::digest(&[i]);
            let order = h.to_order(7).unwrap();
            assert!((1..=7).contains(&order));
        }
        assert!(Hash::ZERO.to_order(0).is_err());
        assert_eq!(Hash::ZERO.to_order(5).unwrap(), 1);
    }

    #[test]
    fn test_public_key_hex_round_trip() {
        let key = PublicKey::new(vec![0xab, 0x01, 0xff]);
        assert_eq!(PublicKey::from_hex(&key.to_hex()).unwrap(), key);
        assert_eq!(key.first_byte(), 0xab);
        assert!(PublicKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_default_key_is_empty() {
        let key = PublicKey::default();
        assert!(key.is_empty());
        assert_eq!(key.first_byte(), 0);
        assert!(crate::round::Round::default().extra_block_producer_pubkey.is_empty());
    }
}
