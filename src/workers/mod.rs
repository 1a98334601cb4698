//! The four long-lived worker loops (spec.md §4.5-§4.8), each taking a
//! borrowed `Runtime` and `StorageClient` for the process lifetime.

pub mod build_index;
pub mod query_server;
pub mod sync;
pub mod watch_specs;
