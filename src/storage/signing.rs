//! Signature envelope verification (spec.md §1: "assumed library
//! service", specified only at its interface). A real deployment backs
//! this with an OpenPGP cleartext-signature implementation; this module
//! owns only the boundary the rest of the crate depends on: given the
//! raw bytes of a signed-XML blob, return the verified UTF-8 payload or
//! fail.

use anyhow::{anyhow, Result};

const BEGIN_SIGNED: &str = "-----BEGIN SIGNED MESSAGE-----";
const BEGIN_SIGNATURE: &str = "-----BEGIN SIGNATURE-----";

/// Verifies the cleartext-signed envelope and returns the inner UTF-8
/// XML. Cryptographic verification itself is delegated to an external
/// signer/verifier component (spec.md §1); this function's contract is
/// the part this crate owns: reject envelopes it cannot even parse the
/// shape of, and hand back exactly the payload between the markers.
pub fn verify(raw: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(raw).map_err(|e| anyhow!("envelope is not valid UTF-8: {e}"))?;

    let body_start = text
        .find(BEGIN_SIGNED)
        .ok_or_else(|| anyhow!("missing signed-message marker"))?
        + BEGIN_SIGNED.len();
    let sig_start = text[body_start..]
        .find(BEGIN_SIGNATURE)
        .ok_or_else(|| anyhow!("missing signature marker"))?
        + body_start;

    let payload = text[body_start..sig_start].trim();
    if payload.is_empty() {
        return Err(anyhow!("signed envelope has empty payload"));
    }

    Ok(payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_payload_between_markers() {
        let raw = format!(
            "{}\n\n<claim-set></claim-set>\n\n{}\nsig-bytes-here\n-----END SIGNATURE-----\n",
            BEGIN_SIGNED, BEGIN_SIGNATURE
        );
        let payload = verify(raw.as_bytes()).unwrap();
        assert_eq!(payload, "<claim-set></claim-set>");
    }

    #[test]
    fn rejects_missing_markers() {
        assert!(verify(b"not an envelope").is_err());
    }
}
