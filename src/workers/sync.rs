//! Sync worker (spec.md §4.7): the most delicate sequence in the
//! system. Maintains a live index, continuously merges new claim-sets,
//! periodically reindexes failed ones, and republishes the "current
//! index" pointer consumed by the query server — switching to a newer
//! index never exposes a torn state to readers, because the
//! current-index slot is updated *before* the old session's resources
//! are torn down (they simply go out of scope once replaced).

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::handover::Wait;
use crate::index::AttrIndexDb;
use crate::model::BlobRef;
use crate::runtime::{CurrentIndex, Runtime};
use crate::storage::{StorageClient, Stylesheet, WatchFilter, WatchFlags, WatchStream};

const WATCH_OVERLAP_SECS: u64 = 600;

struct Session {
    db: Arc<AttrIndexDb>,
    stylesheet: Stylesheet,
    watch: WatchStream,
    spec_blob_ref: BlobRef,
    last_reindex: Instant,
}

impl Session {
    /// Opens the named index, fetches its spec and stylesheet, opens a
    /// fresh overlap-windowed watch, and publishes into the
    /// current-index slot (spec.md §4.7 steps 2-4). Publishing happens
    /// last, once every fallible step has succeeded, so a half-open
    /// session is never advertised to readers.
    fn open(runtime: &Runtime, client: &StorageClient, state_dir: &Path, spec_blob_ref: BlobRef) -> Result<Self> {
        let db = Arc::new(
            AttrIndexDb::open(state_dir, &spec_blob_ref)
                .with_context(|| format!("opening index {}", spec_blob_ref))?,
        );
        db.prepare()?;

        let doc = client
            .fetch_claim_set(&spec_blob_ref)
            .context("refetching attr-spec claim-set")?;
        let spec = doc
            .claim_set
            .attr_spec()
            .ok_or_else(|| anyhow::anyhow!("blob {} carries no attr-spec claim", spec_blob_ref))?
            .clone();
        let stylesheet = client
            .fetch_stylesheet(&spec.transformation.stylesheet_blob)
            .context("fetching stylesheet")?;

        let last_ts = db.last_indexed_claim_ts()?;
        let after = last_ts.saturating_sub(WATCH_OVERLAP_SECS);
        let watch = client.watch_blobs(WatchFilter {
            flags_filter: WatchFlags::CLAIM,
            last_modified_after: after,
        })?;

        runtime.current_index.publish(Arc::new(CurrentIndex {
            db: Arc::clone(&db),
            spec_blob_ref,
        }));
        log::info!("sync: now serving index {}", spec_blob_ref);

        Ok(Session {
            db,
            stylesheet,
            watch,
            spec_blob_ref,
            last_reindex: Instant::now(),
        })
    }

    fn reopen_watch(&mut self, client: &StorageClient) -> Result<()> {
        let last_ts = self.db.last_indexed_claim_ts()?;
        let after = last_ts.saturating_sub(WATCH_OVERLAP_SECS);
        self.watch = client.watch_blobs(WatchFilter {
            flags_filter: WatchFlags::CLAIM,
            last_modified_after: after,
        })?;
        Ok(())
    }
}

/// Runs until shutdown. Returns an error only for failures the spec
/// classifies as fatal to this worker (index corruption, DB open
/// failure) — the caller propagates that into process shutdown
/// (spec.md §7).
pub fn run(runtime: &Runtime, client: &StorageClient, state_dir: &Path, reindex_interval: Duration) -> Result<()> {
    let mut session: Option<Session> = None;

    while runtime.is_running() {
        if session.is_none() {
            let spec_blob_ref = match runtime.index_handover.wait_for_occupied() {
                Wait::Ready(guard) => guard.take(),
                Wait::ShuttingDown => return Ok(()),
            };
            session = Some(Session::open(runtime, client, state_dir, spec_blob_ref)?);
        }
        let s = session.as_mut().expect("just ensured Some");

        match s.watch.next_record() {
            Ok(Some(record)) => {
                if record.end_of_backlog() {
                    // Already live by construction; nothing to mark.
                } else {
                    let doc = match client.fetch_claim_set(&record.blob_ref) {
                        Ok(doc) => doc,
                        Err(err) => {
                            log::warn!("sync: could not fetch {}: {:#}", record.blob_ref, err);
                            continue;
                        }
                    };
                    s.db.merge_claim_set(
                        record.blob_ref,
                        record.last_modified,
                        &doc,
                        &s.stylesheet,
                        Utc::now(),
                        false,
                    )?;
                }
            }
            Ok(None) => {
                if s.last_reindex.elapsed() >= reindex_interval {
                    let recovered = s
                        .db
                        .reindex_failed(&s.stylesheet, Utc::now(), |blob_ref| client.fetch_claim_set(&blob_ref))?;
                    if recovered > 0 {
                        log::info!("sync: reindexed {} previously failed claim-set(s)", recovered);
                    }
                    s.last_reindex = Instant::now();
                }
            }
            Err(err) => {
                log::warn!("sync: watch error, reconnecting: {:#}", err);
                if let Err(err) = s.reopen_watch(client) {
                    log::warn!("sync: could not reopen watch: {:#}", err);
                }
            }
        }

        if runtime.index_handover.is_occupied() {
            let new_ref = match runtime.index_handover.wait_for_occupied() {
                Wait::Ready(guard) => guard.take(),
                Wait::ShuttingDown => return Ok(()),
            };
            log::info!("sync: switching from {} to {}", s.spec_blob_ref, new_ref);
            session = Some(Session::open(runtime, client, state_dir, new_ref)?);
        }
    }

    Ok(())
}
