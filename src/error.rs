//! Structured error types for the parts of the system a caller may want
//! to match on. Worker loops and `main` otherwise traffic in
//! `anyhow::Error`, following the teacher's convention of reserving
//! `thiserror` enums for errors whose variants are inspected by callers
//! (see `src/backup/data_blob.rs` in the teacher for the same split).

use thiserror::Error;

use crate::model::ClaimRef;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage server at {host}:{port} refused the connection: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("storage server returned status {status:#x} for {op}")]
    BadStatus { op: &'static str, status: u8 },
    #[error("blob body of {size} bytes exceeds server-declared maximum of {max}")]
    BlobTooLarge { size: u64, max: u64 },
    #[error("malformed watch record: {0}")]
    MalformedRecord(String),
    #[error("signature verification failed for blob {0}")]
    SignatureInvalid(crate::model::BlobRef),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ClaimParseError {
    #[error("root element is not claim-set in the claims namespace")]
    NotAClaimSet,
    #[error("claim-set element {elem} is missing required attribute {attr}")]
    MissingAttribute { elem: &'static str, attr: &'static str },
    #[error("claim-set child element {0:?} is not a known claim type")]
    UnknownClaimElement(String),
    #[error("claim-set attribute dc:created is not a valid ISO-8601 UTC timestamp: {0:?}")]
    BadTimestamp(String),
    #[error("slice element has invalid ref: {0}")]
    BadSliceRef(String),
    #[error("slice element has invalid size: {0}")]
    BadSliceSize(String),
    #[error("file claim slice size {size} meets or exceeds the 100 MiB limit")]
    SliceTooLarge { size: u64 },
    #[error("attr claim element {elem} has unknown op {op:?} (expected one of =, +, -)")]
    UnknownOp { elem: &'static str, op: String },
    #[error("attr operation {op:?} requires a value but none was given for key {key:?}")]
    MissingOpValue { op: char, key: String },
    #[error("attr-spec attr-def {0} has unknown type (expected str or int)")]
    UnknownAttrType(String),
    #[error("attr-spec transformation element has unsupported type (expected xslt)")]
    UnsupportedTransformation,
    #[error("attr-spec claim has no transformation element")]
    MissingTransformation,
    #[error("attr-factory element has unsupported type (expected executable)")]
    UnsupportedAttrFactory,
    #[error("xml is not well-formed: {0}")]
    Xml(#[from] roxmltree::Error),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index directory {0:?} already holds an index for a different attr-spec")]
    SpecMismatch(std::path::PathBuf),
    #[error("index is not yet set up; call setup() before prepare()")]
    NotSetUp,
    #[error("unknown state key {0:?}")]
    UnknownStateKey(String),
    #[error("claim ref {0} not found while visiting seeds")]
    SeedNotFound(ClaimRef),
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum QueryParseError {
    #[error("expected '<key>=<value>' or '<key>' term, got {0:?}")]
    BadTerm(String),
}
