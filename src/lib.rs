//! `evr-attr-index`: the attribute-index service for the everarch
//! content-addressed archive (spec.md §1). Observes the archive for
//! attr-spec and content claims, bootstraps and maintains a queryable
//! attribute index, and serves it over a line-oriented TCP protocol.

pub mod claims;
pub mod config;
pub mod error;
pub mod handover;
pub mod index;
pub mod model;
pub mod runtime;
pub mod storage;
pub mod workers;
