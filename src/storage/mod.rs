//! Storage client (spec.md §4.1): everything needed to talk to the
//! out-of-scope blob storage server.

pub mod client;
pub mod protocol;
pub mod signing;
pub mod stylesheet;

pub use client::{StorageClient, WatchStream};
pub use protocol::{WatchFilter, WatchFlags, WatchRecord};
pub use stylesheet::{AttrOpRecord, Stylesheet, StylesheetEngine};
