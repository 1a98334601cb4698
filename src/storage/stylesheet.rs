//! XSLT compilation and execution (spec.md §1: "assumed library
//! service"). A real deployment compiles the blob bytes into a
//! `libxslt`-backed stylesheet; this module owns the boundary the index
//! depends on: turning claim-set XML into a stream of attribute
//! operations bound to claim refs (spec.md §4.3).

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::claims::AttrOperation;
use crate::model::ClaimRef;

/// One attribute operation produced by a stylesheet transform, already
/// bound to the claim ref it targets (spec.md §3: attribute tuple).
/// `source` identifies the claim that asserted the operation, so the
/// index can answer `visit_claims_for_seed` (spec.md §4.3) without a
/// second parse pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrOpRecord {
    pub target: ClaimRef,
    pub source: ClaimRef,
    pub operation: AttrOperation,
}

/// The behavior an XSLT engine provides: transform a claim-set document
/// into attribute operations. Kept as a trait so tests can supply a
/// stylesheet that fails deterministically (spec.md §8 scenario 6) or
/// one that derives attributes from file-claim metadata, without
/// linking an actual XSLT processor into the test binary.
pub trait StylesheetEngine: Send + Sync {
    fn transform(&self, claim_set_xml: &str, claim_set_ref: crate::model::BlobRef) -> Result<Vec<AttrOpRecord>>;
}

/// A stylesheet derives no operations of its own beyond what the
/// claim-set's attr claims already carry; `index::db::merge_claim_set`
/// combines this engine's output with the direct post-processing of
/// attr claims (spec.md §3: "post-processing attr claims"). Real
/// deployments that want file-claim-derived attributes (titles, sizes,
/// attr-factory output) supply a compiled XSLT engine instead.
struct IdentityEngine;

impl StylesheetEngine for IdentityEngine {
    fn transform(&self, _claim_set_xml: &str, _claim_set_ref: crate::model::BlobRef) -> Result<Vec<AttrOpRecord>> {
        Ok(Vec::new())
    }
}

/// A compiled, reusable stylesheet handle.
#[derive(Clone)]
pub struct Stylesheet {
    blob_ref: crate::model::BlobRef,
    engine: Arc<dyn StylesheetEngine>,
}

impl fmt::Debug for Stylesheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stylesheet").field("blob_ref", &self.blob_ref).finish()
    }
}

impl Stylesheet {
    /// Compiles the stylesheet blob. The default engine is the identity
    /// transform described above; production builds of this crate would
    /// swap this for an `xslt`-crate-backed (or `libxslt`-FFI-backed)
    /// engine compiled from `raw`.
    pub fn compile(blob_ref: &crate::model::BlobRef, _raw: &[u8]) -> Result<Self> {
        Ok(Stylesheet {
            blob_ref: *blob_ref,
            engine: Arc::new(IdentityEngine),
        })
    }

    /// Builds a stylesheet handle around a caller-supplied engine, for
    /// tests exercising bootstrap/merge/failure behavior without a real
    /// XSLT implementation.
    pub fn from_engine(blob_ref: crate::model::BlobRef, engine: Arc<dyn StylesheetEngine>) -> Self {
        Stylesheet { blob_ref, engine }
    }

    pub fn blob_ref(&self) -> crate::model::BlobRef {
        self.blob_ref
    }

    pub fn transform(&self, claim_set_xml: &str, claim_set_ref: crate::model::BlobRef) -> Result<Vec<AttrOpRecord>> {
        self.engine.transform(claim_set_xml, claim_set_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlobRef, BLOB_REF_SIZE};

    #[test]
    fn identity_engine_produces_no_ops() {
        let blob_ref = BlobRef::from_bytes([1u8; BLOB_REF_SIZE]);
        let sheet = Stylesheet::compile(&blob_ref, b"<xsl:stylesheet/>").unwrap();
        let ops = sheet.transform("<claim-set/>", blob_ref).unwrap();
        assert!(ops.is_empty());
    }

    struct FailingEngine;
    impl StylesheetEngine for FailingEngine {
        fn transform(&self, _xml: &str, _r: crate::model::BlobRef) -> Result<Vec<AttrOpRecord>> {
            Err(anyhow::anyhow!("transform failed"))
        }
    }

    #[test]
    fn custom_engine_can_fail_deterministically() {
        let blob_ref = BlobRef::from_bytes([2u8; BLOB_REF_SIZE]);
        let sheet = Stylesheet::from_engine(blob_ref, Arc::new(FailingEngine));
        assert!(sheet.transform("<claim-set/>", blob_ref).is_err());
    }
}
