use std::fmt;
use std::str;

#[rustfmt::skip]
use ct_codecs::{
    Error as CodecError,

    Hex,

    Encoder,
    Decoder
};
use sha2::{Digest, Sha256};

/// A raw SHA-256 digest. Renders and parses as 64 lowercase hex characters.
#[derive(PartialEq, Eq, Clone)]
pub struct Sha256Sum([u8; 32]);

impl Sha256Sum {
    pub fn from_bytes(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn from_hex(hash_hex: &str) -> Result<Self, CodecError> {
        // Hex::decode accepts mixed case; the registry contract wants
        // exactly 64 lowercase characters.
        if hash_hex.len() != 64 || !hash_hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(CodecError::InvalidInput);
        }

        let mut digest = [0u8; 32];
        Hex::decode(&mut digest, hash_hex, None)?;
        Ok(Self(digest))
    }
}

impl fmt::Debug for Sha256Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[rustfmt::skip]
        let hash_hex = Hex::encode_to_string(self.0.as_ref())
            .map_err(|_| fmt::Error)?;

        f.debug_tuple("Sha256Sum").field(&hash_hex).finish()
    }
}

impl fmt::Display for Sha256Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[rustfmt::skip]
        let hash_hex = Hex::encode_to_string(self.0.as_ref())
            .map_err(|_| fmt::Error)?;

        f.write_str(&hash_hex)
    }
}

impl str::FromStr for Sha256Sum {
    type Err = CodecError;

    fn from_str(hash_hex: &str) -> Result<Self, Self::Err> {
        Self::from_hex(hash_hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let hex = "a".repeat(64);
        let sum = Sha256Sum::from_hex(&hex).unwrap();
        assert_eq!(sum.to_string(), hex);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(Sha256Sum::from_hex(&"a".repeat(63)).is_err());
        assert!(Sha256Sum::from_hex(&"a".repeat(65)).is_err());
        assert!(Sha256Sum::from_hex(&"A".repeat(64)).is_err());
        assert!(Sha256Sum::from_hex(&"g".repeat(64)).is_err());
    }

    #[test]
    fn digest_of_bytes() {
        // sha256 of the empty string
        let sum = Sha256Sum::of(b"");
        assert_eq!(sum.to_string(), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }
}
