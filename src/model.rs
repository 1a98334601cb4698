//! Shared identifiers used across the storage client, claim parser and
//! attribute index: blob references and claim references.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Width of a blob reference in bytes. The wire format and the textual
/// hex form are both fixed-width; see `claims.c`'s `evr_blob_ref_t` in
/// the original implementation.
pub const BLOB_REF_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum BlobRefParseError {
    #[error("blob ref has wrong length: expected {BLOB_REF_SIZE} bytes hex-encoded, got {0} chars")]
    WrongLength(usize),
    #[error("blob ref is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A fixed-width cryptographic digest identifying an opaque blob in the
/// archive. Equality is bytewise; the textual form is lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobRef([u8; BLOB_REF_SIZE]);

impl BlobRef {
    pub fn from_bytes(bytes: [u8; BLOB_REF_SIZE]) -> Self {
        BlobRef(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; BLOB_REF_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for BlobRef {
    type Err = BlobRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != BLOB_REF_SIZE * 2 {
            return Err(BlobRefParseError::WrongLength(s.len()));
        }
        let mut buf = [0u8; BLOB_REF_SIZE];
        hex::decode_to_slice(s, &mut buf)?;
        Ok(BlobRef(buf))
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", self.to_hex())
    }
}

/// A claim reference: the blob holding the claim-set, plus the
/// zero-based index of the claim within that claim-set's element
/// children (spec.md §3).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ClaimRef {
    pub claim_set: BlobRef,
    pub claim_index: u16,
}

impl ClaimRef {
    pub fn new(claim_set: BlobRef, claim_index: u16) -> Self {
        ClaimRef {
            claim_set,
            claim_index,
        }
    }
}

impl fmt::Display for ClaimRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.claim_set, self.claim_index)
    }
}

#[derive(Debug, Error)]
pub enum ClaimRefParseError {
    #[error("claim ref must be '<blob-ref>-<index>', got {0:?}")]
    BadShape(String),
    #[error(transparent)]
    BlobRef(#[from] BlobRefParseError),
    #[error("claim index is not a valid number: {0}")]
    Index(#[from] std::num::ParseIntError),
}

impl FromStr for ClaimRef {
    type Err = ClaimRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (blob_part, idx_part) = s
            .rsplit_once('-')
            .ok_or_else(|| ClaimRefParseError::BadShape(s.to_string()))?;
        let claim_set = blob_part.parse::<BlobRef>()?;
        let claim_index = idx_part.parse::<u16>()?;
        Ok(ClaimRef::new(claim_set, claim_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_ref_round_trips_through_hex() {
        let bytes = [7u8; BLOB_REF_SIZE];
        let r = BlobRef::from_bytes(bytes);
        let s = r.to_string();
        let parsed: BlobRef = s.parse().unwrap();
        assert_eq!(r, parsed);
    }

    #[test]
    fn blob_ref_rejects_wrong_length() {
        let err = "deadbeef".parse::<BlobRef>().unwrap_err();
        assert!(matches!(err, BlobRefParseError::WrongLength(_)));
    }

    #[test]
    fn claim_ref_round_trips() {
        let r = ClaimRef::new(BlobRef::from_bytes([9u8; BLOB_REF_SIZE]), 3);
        let s = r.to_string();
        let parsed: ClaimRef = s.parse().unwrap();
        assert_eq!(r, parsed);
    }
}
