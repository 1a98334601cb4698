//! Build-index worker (spec.md §4.6): consumes attr-spec handovers,
//! bootstraps a fresh index from scratch (or skips straight to publish
//! if the index was already built in a previous run), and hands the
//! index's identity over to the sync worker.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::handover::Wait;
use crate::index::{AttrIndexDb, Stage};
use crate::runtime::{Runtime, SpecHandoff};
use crate::storage::{StorageClient, WatchFilter, WatchFlags};

/// Seconds of overlap applied to `last_modified_after` when (re)opening
/// a claim watch, guarding against a claim-set's arrival racing the
/// persistence of the previous high-water mark (spec.md §4.6 step 4).
const WATCH_OVERLAP_SECS: u64 = 600;

pub fn run(runtime: &Runtime, client: &StorageClient, state_dir: &Path) {
    loop {
        let handoff = match runtime.spec_handover.wait_for_occupied() {
            Wait::Ready(guard) => guard.take(),
            Wait::ShuttingDown => return,
        };

        if let Err(err) = build_one(runtime, client, state_dir, handoff) {
            log::error!("build-index: {:#}", err);
        }
    }
}

fn build_one(runtime: &Runtime, client: &StorageClient, state_dir: &Path, handoff: SpecHandoff) -> Result<()> {
    let db = AttrIndexDb::open(state_dir, &handoff.spec_blob_ref)
        .with_context(|| format!("opening index for attr-spec {}", handoff.spec_blob_ref))?;
    db.setup(&handoff.spec)?;
    db.prepare()?;

    if db.stage()? == Stage::Built {
        log::info!("build-index: {} already built, skipping bootstrap", handoff.spec_blob_ref);
        return publish(runtime, handoff.spec_blob_ref);
    }

    let stylesheet = client
        .fetch_stylesheet(&handoff.spec.transformation.stylesheet_blob)
        .context("fetching stylesheet")?;

    let last_ts = db.last_indexed_claim_ts()?;
    let after = last_ts.saturating_sub(WATCH_OVERLAP_SECS);
    let filter = WatchFilter {
        flags_filter: WatchFlags::CLAIM,
        last_modified_after: after,
    };
    let mut watch = client.watch_blobs(filter)?;

    loop {
        if !runtime.is_running() {
            return Ok(());
        }
        let record = match watch.next_record()? {
            Some(record) => record,
            None => continue,
        };
        if record.end_of_backlog() {
            break;
        }

        let doc = match client.fetch_claim_set(&record.blob_ref) {
            Ok(doc) => doc,
            Err(err) => {
                log::warn!("build-index: could not fetch {}: {:#}", record.blob_ref, err);
                continue;
            }
        };
        db.merge_claim_set(
            record.blob_ref,
            record.last_modified,
            &doc,
            &stylesheet,
            Utc::now(),
            false,
        )?;
    }

    db.mark_built()?;
    log::info!("build-index: {} bootstrap complete", handoff.spec_blob_ref);
    publish(runtime, handoff.spec_blob_ref)
}

fn publish(runtime: &Runtime, spec_blob_ref: crate::model::BlobRef) -> Result<()> {
    match runtime.index_handover.wait_for_available() {
        Wait::Ready(guard) => {
            guard.occupy(spec_blob_ref);
            Ok(())
        }
        Wait::ShuttingDown => Ok(()),
    }
}
