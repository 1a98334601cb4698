//! Typed claim records (spec.md §3). These are the output of the
//! parser in `claims::parser` and the input to `index::db::merge_claim_set`.

use chrono::{DateTime, Utc};

use crate::model::{BlobRef, ClaimRef};

/// The target of an attr claim: either another claim, or the enclosing
/// claim-set at a given claim index (spec.md §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrTarget {
    Ref(ClaimRef),
    SelfClaim { claim_index: u16 },
}

/// One of the three attribute operation kinds (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrOp {
    Replace,
    Add,
    Remove,
}

impl AttrOp {
    pub fn from_char(c: char) -> Option<AttrOp> {
        match c {
            '=' => Some(AttrOp::Replace),
            '+' => Some(AttrOp::Add),
            '-' => Some(AttrOp::Remove),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            AttrOp::Replace => '=',
            AttrOp::Add => '+',
            AttrOp::Remove => '-',
        }
    }
}

/// A single attribute operation: `op key [value]` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrOperation {
    pub op: AttrOp,
    pub key: String,
    pub value: Option<String>,
}

/// A (blob ref, size) slice of a file claim (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSlice {
    pub ref_: BlobRef,
    pub size: u64,
}

/// The maximum permitted size of a single file-claim slice (spec.md §3, §4.2).
pub const MAX_SLICE_SIZE: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileClaim {
    pub title: Option<String>,
    pub slices: Vec<FileSlice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrClaim {
    pub target: AttrTarget,
    pub operations: Vec<AttrOperation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrValueType {
    Str,
    Int,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrDef {
    pub key: String,
    pub value_type: AttrValueType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrFactory {
    pub executable_blob: BlobRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformation {
    pub stylesheet_blob: BlobRef,
}

/// An attr-spec claim: describes how to build an index (spec.md §3, §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrSpecClaim {
    pub attr_defs: Vec<AttrDef>,
    pub attr_factories: Vec<AttrFactory>,
    pub transformation: Transformation,
}

/// One claim inside a claim-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    File(FileClaim),
    Attr(AttrClaim),
    AttrSpec(AttrSpecClaim),
}

/// A fully parsed claim-set document (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSet {
    pub created: DateTime<Utc>,
    pub claims: Vec<Claim>,
}

/// A claim-set bundled with the raw XML it was parsed from. Threaded
/// through the merge pipeline because the stylesheet transform
/// (spec.md §4.3) operates on the document, not the typed claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSetDoc {
    pub claim_set: ClaimSet,
    pub xml: String,
}

impl ClaimSet {
    /// Returns the *n*-th element child, one-based (spec.md §4.2,
    /// `nth_claim`).
    pub fn nth_claim(&self, n: usize) -> Option<&Claim> {
        if n == 0 {
            return None;
        }
        self.claims.get(n - 1)
    }

    /// Locates the first `attr-spec` claim in document order, if any.
    pub fn attr_spec(&self) -> Option<&AttrSpecClaim> {
        self.claims.iter().find_map(|c| match c {
            Claim::AttrSpec(spec) => Some(spec),
            _ => None,
        })
    }
}
