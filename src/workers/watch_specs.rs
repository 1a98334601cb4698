//! Watch-specs worker (spec.md §4.5): discovers the latest attr-spec
//! blob and hands it over to build-index.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::handover::Wait;
use crate::model::BlobRef;
use crate::runtime::{Runtime, SpecHandoff};
use crate::storage::{StorageClient, WatchFilter, WatchFlags};

/// Runs until shutdown, reconnecting on transient watch failures
/// (spec.md §7: transient I/O — close and reopen on the next
/// iteration).
pub fn run(runtime: &Runtime, client: &StorageClient) {
    while runtime.is_running() {
        if let Err(err) = watch_once(runtime, client) {
            log::warn!("watch-specs: {:#}", err);
            thread::sleep(Duration::from_secs(1));
        }
    }
}

fn watch_once(runtime: &Runtime, client: &StorageClient) -> Result<()> {
    let filter = WatchFilter {
        flags_filter: WatchFlags::INDEX_RULE,
        last_modified_after: 0,
    };
    let mut watch = client.watch_blobs(filter)?;

    let mut candidate: Option<SpecHandoff> = None;
    let mut seen: HashSet<BlobRef> = HashSet::new();

    while runtime.is_running() {
        let record = match watch.next_record()? {
            Some(record) => record,
            None => continue,
        };

        if record.end_of_backlog() {
            if let Some(handoff) = candidate.take() {
                log::info!(
                    "watch-specs: candidate attr-spec {} (created {})",
                    handoff.spec_blob_ref,
                    handoff.created
                );
                match runtime.spec_handover.wait_for_available() {
                    Wait::Ready(guard) => guard.occupy(handoff),
                    Wait::ShuttingDown => return Ok(()),
                }
            }
            continue;
        }

        if !seen.insert(record.blob_ref) {
            continue;
        }

        let doc = match client.fetch_claim_set(&record.blob_ref) {
            Ok(doc) => doc,
            Err(err) => {
                log::warn!("watch-specs: could not fetch {}: {:#}", record.blob_ref, err);
                continue;
            }
        };

        let spec = match doc.claim_set.attr_spec() {
            Some(spec) => spec,
            None => continue,
        };

        let is_newer = candidate
            .as_ref()
            .map_or(true, |c| doc.claim_set.created > c.created);
        if is_newer {
            candidate = Some(SpecHandoff {
                spec: spec.clone(),
                spec_blob_ref: record.blob_ref,
                created: doc.claim_set.created,
            });
        }
    }

    Ok(())
}
