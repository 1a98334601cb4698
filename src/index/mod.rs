//! The attribute index: schema, query parsing, and the `AttrIndexDb`
//! that the build-index, sync and query-server workers share through
//! `runtime::Runtime`'s index handover (spec.md §4.3, §4.4).

pub mod db;
pub mod query;
pub mod schema;

pub use db::{AttrIndexDb, MergeOutcome, Stage, StateKey};
pub use query::{parse as parse_query, Query, Term};
