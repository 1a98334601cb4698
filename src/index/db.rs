//! The attribute index DB (spec.md §4.3): schema setup, state table,
//! merge/transform of a claim-set, re-index of failed claim-sets, and
//! query evaluation. One `AttrIndexDb` per index directory; the
//! directory is named after the attr-spec's blob reference (spec.md
//! §3, invariant IDX-1).
//!
//! A single `Mutex<rusqlite::Connection>` stands in for the teacher's
//! "bind prepared statements once, reuse them" pattern — `rusqlite`'s
//! own statement cache (`prepare_cached`) is the idiomatic Rust
//! equivalent, so `prepare()` here just validates that `setup()` has
//! already run rather than binding anything by hand.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::claims::{AttrClaim, AttrOp, AttrSpecClaim, AttrTarget, Claim, ClaimSetDoc};
use crate::error::IndexError;
use crate::model::{BlobRef, ClaimRef};
use crate::storage::{AttrOpRecord, Stylesheet};

use super::query::{self, Query};
use super::schema::{self, DDL, STAGE_BUILT, STAGE_INITIAL, STATE_KEY_LAST_INDEXED_CLAIM_TS, STATE_KEY_STAGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKey {
    Stage,
    LastIndexedClaimTs,
}

impl StateKey {
    fn column(self) -> &'static str {
        match self {
            StateKey::Stage => STATE_KEY_STAGE,
            StateKey::LastIndexedClaimTs => STATE_KEY_LAST_INDEXED_CLAIM_TS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initial,
    Built,
}

/// Outcome of a single `merge_claim_set` call, so callers (the sync and
/// build-index workers) can update their own bookkeeping without
/// re-querying state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    Failed,
    AlreadyApplied,
}

pub struct AttrIndexDb {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl AttrIndexDb {
    /// Opens (creating if absent) the index directory named by
    /// `spec_blob_ref`'s textual form (spec.md §3, §6).
    pub fn open(state_dir: &Path, spec_blob_ref: &BlobRef) -> Result<Self> {
        let dir = state_dir.join(spec_blob_ref.to_hex());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating index directory {:?}", dir))?;
        let db_path = dir.join("index.sqlite3");
        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening index database {:?}", db_path))?;
        Ok(AttrIndexDb {
            path: dir,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Idempotent schema creation; initializes state to
    /// `stage=initial, last_indexed_claim_ts=0` only on first open
    /// (spec.md §4.3).
    pub fn setup(&self, spec: &AttrSpecClaim) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(DDL).context("applying index schema")?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT value FROM state WHERE key = ?1",
                params![STATE_KEY_STAGE],
                |row| row.get(0),
            )
            .optional()
            .context("checking existing stage")?;

        if existing.is_none() {
            conn.execute(
                "INSERT INTO state (key, value) VALUES (?1, ?2)",
                params![STATE_KEY_STAGE, STAGE_INITIAL],
            )?;
            conn.execute(
                "INSERT INTO state (key, value) VALUES (?1, ?2)",
                params![STATE_KEY_LAST_INDEXED_CLAIM_TS, 0i64],
            )?;
            for def in &spec.attr_defs {
                conn.execute(
                    "INSERT OR REPLACE INTO schema_attrs (key, value_type) VALUES (?1, ?2)",
                    params![def.key, format!("{:?}", def.value_type)],
                )?;
            }
        }

        Ok(())
    }

    /// Binds the connection for use; in this implementation that means
    /// only verifying that `setup()` has already established the state
    /// table (spec.md requires `prepare()` before any other read/write
    /// operation after each open).
    pub fn prepare(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let exists: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='state'",
                [],
                |row| row.get(0),
            )
            .context("checking schema presence")?;
        if exists == 0 {
            return Err(IndexError::NotSetUp.into());
        }
        Ok(())
    }

    pub fn get_state(&self, key: StateKey) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM state WHERE key = ?1",
                params![key.column()],
                |row| row.get(0),
            )
            .context("reading state")?;
        Ok(value)
    }

    pub fn set_state(&self, key: StateKey, value: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key.column(), value],
        )?;
        Ok(())
    }

    pub fn stage(&self) -> Result<Stage> {
        match self.get_state(StateKey::Stage)? {
            v if v == STAGE_INITIAL => Ok(Stage::Initial),
            v if v == STAGE_BUILT => Ok(Stage::Built),
            other => anyhow::bail!("unknown stage value {other}"),
        }
    }

    pub fn mark_built(&self) -> Result<()> {
        self.set_state(StateKey::Stage, STAGE_BUILT)
    }

    pub fn last_indexed_claim_ts(&self) -> Result<u64> {
        Ok(self.get_state(StateKey::LastIndexedClaimTs)? as u64)
    }

    /// Advances the high-water mark, enforcing monotonicity (IDX-3).
    pub fn advance_last_indexed_claim_ts(&self, candidate: u64) -> Result<()> {
        let current = self.last_indexed_claim_ts()?;
        if candidate > current {
            self.set_state(StateKey::LastIndexedClaimTs, candidate as i64)?;
        }
        Ok(())
    }

    /// Applies the stylesheet to `doc`, then for every resulting
    /// operation atomically updates tuples keyed by (target, key)
    /// (spec.md §4.3). Either every operation in the claim-set commits
    /// or none does: on transformation failure the claim-set ref is
    /// recorded in the failed queue instead, in the same transaction.
    ///
    /// `last_modified` is the watch-delivered modification time, used
    /// both to advance the high-water mark and to dedup a claim-set
    /// already merged at that exact timestamp (spec.md §9's open
    /// question on overlap-window double merges: `+` is not idempotent,
    /// so a claim-set/timestamp pair already recorded as merged is
    /// skipped outright).
    pub fn merge_claim_set(
        &self,
        claim_set_ref: BlobRef,
        last_modified: u64,
        doc: &ClaimSetDoc,
        stylesheet: &Stylesheet,
        now: DateTime<Utc>,
        is_reindex: bool,
    ) -> Result<MergeOutcome> {
        let mut conn = self.conn.lock().unwrap();

        let already: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM merged_claim_sets WHERE claim_set_ref = ?1 AND last_modified = ?2",
                params![claim_set_ref.to_hex(), last_modified as i64],
                |row| row.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Ok(MergeOutcome::AlreadyApplied);
        }

        let ops = collect_ops(doc, claim_set_ref, stylesheet);

        let tx = conn.transaction().context("starting merge transaction")?;

        // Applying the operations runs inside its own savepoint, nested in
        // the outer transaction: a transform failure *or* a constraint
        // violation while applying tuples (spec.md §4.3) must leave no
        // partial attrs behind (IDX-4), so either path rolls the savepoint
        // back before the outer transaction commits only the failed-queue
        // bookkeeping.
        let apply_result: Result<()> = ops.and_then(|ops| {
            let sp = tx.savepoint().context("opening apply savepoint")?;
            for rec in &ops {
                apply_op(&sp, rec)?;
            }
            sp.commit().context("committing apply savepoint")?;
            Ok(())
        });

        match apply_result {
            Ok(()) => {
                tx.execute(
                    "DELETE FROM failed_claim_sets WHERE claim_set_ref = ?1",
                    params![claim_set_ref.to_hex()],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO merged_claim_sets (claim_set_ref, last_modified) VALUES (?1, ?2)",
                    params![claim_set_ref.to_hex(), last_modified as i64],
                )?;
                tx.commit().context("committing merge transaction")?;
                drop(conn);
                self.advance_last_indexed_claim_ts(last_modified)?;
                Ok(MergeOutcome::Merged)
            }
            Err(err) => {
                log::warn!(
                    "claim-set {} failed to merge (reindex={}): {:#}",
                    claim_set_ref,
                    is_reindex,
                    err
                );
                tx.execute(
                    "INSERT INTO failed_claim_sets (claim_set_ref, last_modified, first_seen, last_attempt)
                     VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(claim_set_ref) DO UPDATE SET last_attempt = excluded.last_attempt",
                    params![claim_set_ref.to_hex(), last_modified as i64, now.timestamp()],
                )?;
                tx.commit().context("committing failed-queue insertion")?;
                Ok(MergeOutcome::Failed)
            }
        }
    }

    /// Walks the failed queue in insertion order, re-fetching each
    /// claim-set via `fetch_doc` and retrying `merge_claim_set` with
    /// `is_reindex=true` (spec.md §4.3, §4.7).
    pub fn reindex_failed(
        &self,
        stylesheet: &Stylesheet,
        now: DateTime<Utc>,
        mut fetch_doc: impl FnMut(BlobRef) -> Result<ClaimSetDoc>,
    ) -> Result<usize> {
        let rows: Vec<(String, i64)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT claim_set_ref, last_modified FROM failed_claim_sets ORDER BY first_seen ASC",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut recovered = 0;
        for (ref_hex, last_modified) in rows {
            let claim_set_ref: BlobRef = match ref_hex.parse() {
                Ok(r) => r,
                Err(_) => continue,
            };
            let doc = match fetch_doc(claim_set_ref) {
                Ok(doc) => doc,
                Err(err) => {
                    log::warn!("reindex: could not re-fetch {}: {:#}", claim_set_ref, err);
                    continue;
                }
            };
            match self.merge_claim_set(
                claim_set_ref,
                last_modified as u64,
                &doc,
                stylesheet,
                now,
                true,
            )? {
                MergeOutcome::Merged => recovered += 1,
                MergeOutcome::Failed | MergeOutcome::AlreadyApplied => {}
            }
        }
        Ok(recovered)
    }

    /// Parses `query_text`, calls `status_cb` once, then emits every
    /// matching (claim ref, attribute tuples) pair via `result_cb`
    /// (spec.md §4.3, §4.8).
    pub fn query(
        &self,
        query_text: &str,
        mut status_cb: impl FnMut(Result<(), String>),
        mut result_cb: impl FnMut(ClaimRef, &[(String, String)]),
    ) -> Result<()> {
        let query = match query::parse(query_text) {
            Ok(q) => {
                status_cb(Ok(()));
                q
            }
            Err(err) => {
                status_cb(Err(err.to_string()));
                return Ok(());
            }
        };

        let conn = self.conn.lock().unwrap();
        for target in matching_targets(&conn, &query)? {
            let tuples = load_tuples(&conn, target)?;
            result_cb(target, &tuples);
        }
        Ok(())
    }

    /// Emits every claim reference whose target equals `seed_ref`
    /// (spec.md §4.3).
    pub fn visit_claims_for_seed(
        &self,
        seed_ref: ClaimRef,
        mut cb: impl FnMut(ClaimRef),
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT source_claim_set, source_claim_index FROM attrs
             WHERE target_claim_set = ?1 AND target_claim_index = ?2",
        )?;
        let rows = stmt.query_map(
            params![seed_ref.claim_set.to_hex(), seed_ref.claim_index as i64],
            |row| {
                let set: String = row.get(0)?;
                let idx: i64 = row.get(1)?;
                Ok((set, idx))
            },
        )?;
        for row in rows {
            let (set, idx) = row?;
            if let Ok(claim_set) = set.parse::<BlobRef>() {
                cb(ClaimRef::new(claim_set, idx as u16));
            }
        }
        Ok(())
    }
}

fn collect_ops(
    doc: &ClaimSetDoc,
    claim_set_ref: BlobRef,
    stylesheet: &Stylesheet,
) -> Result<Vec<AttrOpRecord>> {
    let mut ops = stylesheet.transform(&doc.xml, claim_set_ref)?;

    for (i, claim) in doc.claim_set.claims.iter().enumerate() {
        if let Claim::Attr(attr) = claim {
            ops.extend(attr_claim_ops(attr, claim_set_ref, i as u16));
        }
    }

    Ok(ops)
}

fn attr_claim_ops(attr: &AttrClaim, claim_set_ref: BlobRef, source_index: u16) -> Vec<AttrOpRecord> {
    let target = match attr.target {
        AttrTarget::Ref(r) => r,
        AttrTarget::SelfClaim { claim_index } => ClaimRef::new(claim_set_ref, claim_index),
    };
    let source = ClaimRef::new(claim_set_ref, source_index);
    attr.operations
        .iter()
        .map(|op| AttrOpRecord {
            target,
            source,
            operation: op.clone(),
        })
        .collect()
}

fn apply_op(tx: &Connection, rec: &AttrOpRecord) -> Result<()> {
    let target_set = rec.target.claim_set.to_hex();
    let target_idx = rec.target.claim_index as i64;
    let source_set = rec.source.claim_set.to_hex();
    let source_idx = rec.source.claim_index as i64;
    let key = &rec.operation.key;

    match rec.operation.op {
        AttrOp::Replace => {
            tx.execute(
                "DELETE FROM attrs WHERE target_claim_set = ?1 AND target_claim_index = ?2 AND key = ?3",
                params![target_set, target_idx, key],
            )?;
            if let Some(value) = &rec.operation.value {
                insert_attr(tx, &target_set, target_idx, key, value, &source_set, source_idx)?;
            }
        }
        AttrOp::Add => {
            if let Some(value) = &rec.operation.value {
                insert_attr(tx, &target_set, target_idx, key, value, &source_set, source_idx)?;
            }
        }
        AttrOp::Remove => match &rec.operation.value {
            Some(value) => {
                tx.execute(
                    "DELETE FROM attrs WHERE target_claim_set = ?1 AND target_claim_index = ?2 AND key = ?3 AND value = ?4",
                    params![target_set, target_idx, key, value],
                )?;
            }
            None => {
                tx.execute(
                    "DELETE FROM attrs WHERE target_claim_set = ?1 AND target_claim_index = ?2 AND key = ?3",
                    params![target_set, target_idx, key],
                )?;
            }
        },
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn insert_attr(
    tx: &Connection,
    target_set: &str,
    target_idx: i64,
    key: &str,
    value: &str,
    source_set: &str,
    source_idx: i64,
) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO attrs (target_claim_set, target_claim_index, key, value, source_claim_set, source_claim_index)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![target_set, target_idx, key, value, source_set, source_idx],
    )?;
    Ok(())
}

fn matching_targets(conn: &Connection, query: &Query) -> Result<Vec<ClaimRef>> {
    if query.terms.is_empty() {
        return Ok(Vec::new());
    }

    let mut candidate: Option<std::collections::HashSet<(String, i64)>> = None;
    for term in &query.terms {
        let mut stmt = if term.value.is_some() {
            conn.prepare(
                "SELECT DISTINCT target_claim_set, target_claim_index FROM attrs WHERE key = ?1 AND value = ?2",
            )?
        } else {
            conn.prepare("SELECT DISTINCT target_claim_set, target_claim_index FROM attrs WHERE key = ?1")?
        };
        let set: std::collections::HashSet<(String, i64)> = if let Some(value) = &term.value {
            stmt.query_map(params![term.key, value], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?
        } else {
            stmt.query_map(params![term.key], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?
        };

        candidate = Some(match candidate {
            None => set,
            Some(existing) => existing.intersection(&set).cloned().collect(),
        });
    }

    let mut refs = Vec::new();
    for (set, idx) in candidate.unwrap_or_default() {
        if let Ok(claim_set) = set.parse::<BlobRef>() {
            refs.push(ClaimRef::new(claim_set, idx as u16));
        }
    }
    refs.sort();
    Ok(refs)
}

fn load_tuples(conn: &Connection, target: ClaimRef) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT key, value FROM attrs WHERE target_claim_set = ?1 AND target_claim_index = ?2 ORDER BY key, value",
    )?;
    let rows = stmt
        .query_map(
            params![target.claim_set.to_hex(), target.claim_index as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// Re-exported so callers constructing indexes at startup don't need to
// reach into `schema` directly.
pub use schema::{STAGE_BUILT as STAGE_BUILT_VALUE, STAGE_INITIAL as STAGE_INITIAL_VALUE};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{AttrDef, AttrValueType, ClaimSet, Transformation};
    use crate::model::BLOB_REF_SIZE;
    use tempfile::tempdir;

    fn blob_ref(byte: u8) -> BlobRef {
        BlobRef::from_bytes([byte; BLOB_REF_SIZE])
    }

    fn empty_spec() -> AttrSpecClaim {
        AttrSpecClaim {
            attr_defs: vec![AttrDef {
                key: "color".into(),
                value_type: AttrValueType::Str,
            }],
            attr_factories: Vec::new(),
            transformation: Transformation {
                stylesheet_blob: blob_ref(0xff),
            },
        }
    }

    fn identity_stylesheet() -> Stylesheet {
        Stylesheet::compile(&blob_ref(0xff), b"").unwrap()
    }

    fn doc_with_attr_ops(ops: Vec<(&str, &str, Option<&str>)>) -> ClaimSetDoc {
        use crate::claims::{AttrClaim, AttrOp, AttrOperation, AttrTarget, Claim};
        let claim_set = ClaimSet {
            created: chrono::Utc::now(),
            claims: vec![Claim::Attr(AttrClaim {
                target: AttrTarget::SelfClaim { claim_index: 0 },
                operations: ops
                    .into_iter()
                    .map(|(op, key, value)| AttrOperation {
                        op: AttrOp::from_char(op.chars().next().unwrap()).unwrap(),
                        key: key.to_string(),
                        value: value.map(str::to_string),
                    })
                    .collect(),
            })],
        };
        ClaimSetDoc {
            claim_set,
            xml: "<claim-set></claim-set>".to_string(),
        }
    }

    fn open_fresh(dir: &std::path::Path, spec: &AttrSpecClaim) -> AttrIndexDb {
        let db = AttrIndexDb::open(dir, &blob_ref(1)).unwrap();
        db.setup(spec).unwrap();
        db.prepare().unwrap();
        db
    }

    fn query_values(db: &AttrIndexDb, query_text: &str) -> Vec<(ClaimRef, Vec<(String, String)>)> {
        let mut results = Vec::new();
        db.query(
            query_text,
            |status| assert!(status.is_ok(), "query should parse"),
            |claim_ref, tuples| results.push((claim_ref, tuples.to_vec())),
        )
        .unwrap();
        results
    }

    #[test]
    fn setup_initializes_stage_and_watermark() {
        let dir = tempdir().unwrap();
        let db = open_fresh(dir.path(), &empty_spec());
        assert_eq!(db.stage().unwrap(), Stage::Initial);
        assert_eq!(db.last_indexed_claim_ts().unwrap(), 0);
    }

    #[test]
    fn setup_is_idempotent_across_reopen() {
        let dir = tempdir().unwrap();
        let db = open_fresh(dir.path(), &empty_spec());
        db.mark_built().unwrap();
        db.advance_last_indexed_claim_ts(42).unwrap();
        db.setup(&empty_spec()).unwrap(); // re-run: must not reset state
        assert_eq!(db.stage().unwrap(), Stage::Built);
        assert_eq!(db.last_indexed_claim_ts().unwrap(), 42);
    }

    #[test]
    fn watermark_is_monotonic_non_decreasing() {
        // P2: last_indexed_claim_ts never regresses.
        let dir = tempdir().unwrap();
        let db = open_fresh(dir.path(), &empty_spec());
        db.advance_last_indexed_claim_ts(100).unwrap();
        db.advance_last_indexed_claim_ts(50).unwrap();
        assert_eq!(db.last_indexed_claim_ts().unwrap(), 100);
        db.advance_last_indexed_claim_ts(150).unwrap();
        assert_eq!(db.last_indexed_claim_ts().unwrap(), 150);
    }

    #[test]
    fn add_then_query_returns_tuple() {
        // spec.md §8 scenario 2.
        let dir = tempdir().unwrap();
        let db = open_fresh(dir.path(), &empty_spec());
        let doc = doc_with_attr_ops(vec![("+", "color", Some("red"))]);
        let outcome = db
            .merge_claim_set(blob_ref(2), 1, &doc, &identity_stylesheet(), Utc::now(), false)
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);

        let results = query_values(&db, "color=red");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, vec![("color".to_string(), "red".to_string())]);
    }

    #[test]
    fn replace_removes_prior_values_for_key() {
        // spec.md §8 scenario 3.
        let dir = tempdir().unwrap();
        let db = open_fresh(dir.path(), &empty_spec());
        let doc = doc_with_attr_ops(vec![("+", "color", Some("red")), ("=", "color", Some("blue"))]);
        db.merge_claim_set(blob_ref(2), 1, &doc, &identity_stylesheet(), Utc::now(), false)
            .unwrap();

        assert_eq!(query_values(&db, "color=blue").len(), 1);
        assert!(query_values(&db, "color=red").is_empty());
    }

    #[test]
    fn remove_without_value_deletes_all_values_for_key() {
        // spec.md §8 scenario 4.
        let dir = tempdir().unwrap();
        let db = open_fresh(dir.path(), &empty_spec());
        let doc = doc_with_attr_ops(vec![
            ("+", "color", Some("red")),
            ("+", "color", Some("green")),
            ("-", "color", None),
        ]);
        db.merge_claim_set(blob_ref(2), 1, &doc, &identity_stylesheet(), Utc::now(), false)
            .unwrap();

        assert!(query_values(&db, "color").is_empty());
    }

    #[test]
    fn remove_with_value_deletes_only_matching_value() {
        let dir = tempdir().unwrap();
        let db = open_fresh(dir.path(), &empty_spec());
        let doc = doc_with_attr_ops(vec![
            ("+", "color", Some("red")),
            ("+", "color", Some("green")),
            ("-", "color", Some("red")),
        ]);
        db.merge_claim_set(blob_ref(2), 1, &doc, &identity_stylesheet(), Utc::now(), false)
            .unwrap();

        assert!(query_values(&db, "color=red").is_empty());
        assert_eq!(query_values(&db, "color=green").len(), 1);
    }

    #[test]
    fn repeated_delivery_at_same_last_modified_is_not_reapplied() {
        // spec.md §9 open question: `+` is not idempotent, so a claim-set
        // already merged at a given last_modified must be skipped outright
        // rather than re-applied when redelivered inside the overlap window.
        let dir = tempdir().unwrap();
        let db = open_fresh(dir.path(), &empty_spec());
        let doc = doc_with_attr_ops(vec![("+", "color", Some("red"))]);
        let sheet = identity_stylesheet();

        db.merge_claim_set(blob_ref(2), 10, &doc, &sheet, Utc::now(), false)
            .unwrap();
        let second = db
            .merge_claim_set(blob_ref(2), 10, &doc, &sheet, Utc::now(), false)
            .unwrap();
        assert_eq!(second, MergeOutcome::AlreadyApplied);

        // Only one copy of the value should exist, not two.
        let results = query_values(&db, "color=red");
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn failed_transform_is_queued_and_later_reindexed() {
        // spec.md §8 scenario 6.
        use crate::storage::{AttrOpRecord, StylesheetEngine};
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        struct SwitchableEngine(Arc<AtomicBool>);
        impl StylesheetEngine for SwitchableEngine {
            fn transform(&self, _xml: &str, _r: BlobRef) -> Result<Vec<AttrOpRecord>> {
                if self.0.load(Ordering::SeqCst) {
                    Err(anyhow::anyhow!("stylesheet rejects this claim-set"))
                } else {
                    Ok(Vec::new())
                }
            }
        }

        let dir = tempdir().unwrap();
        let db = open_fresh(dir.path(), &empty_spec());
        let should_fail = Arc::new(AtomicBool::new(true));
        let sheet = Stylesheet::from_engine(blob_ref(0xff), Arc::new(SwitchableEngine(Arc::clone(&should_fail))));
        let doc = doc_with_attr_ops(vec![]);

        let outcome = db
            .merge_claim_set(blob_ref(2), 1, &doc, &sheet, Utc::now(), false)
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Failed);

        let failed_count: i64 = db
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT count(*) FROM failed_claim_sets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(failed_count, 1);

        should_fail.store(false, Ordering::SeqCst);
        let recovered = db
            .reindex_failed(&sheet, Utc::now(), |_r| Ok(doc_with_attr_ops(vec![])))
            .unwrap();
        assert_eq!(recovered, 1);

        let failed_count: i64 = db
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT count(*) FROM failed_claim_sets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(failed_count, 0);
    }

    #[test]
    fn visit_claims_for_seed_finds_referencing_claim() {
        let dir = tempdir().unwrap();
        let db = open_fresh(dir.path(), &empty_spec());
        let doc = doc_with_attr_ops(vec![("+", "color", Some("red"))]);
        db.merge_claim_set(blob_ref(2), 1, &doc, &identity_stylesheet(), Utc::now(), false)
            .unwrap();

        let seed = ClaimRef::new(blob_ref(2), 0);
        let mut sources = Vec::new();
        db.visit_claims_for_seed(seed, |r| sources.push(r)).unwrap();
        assert_eq!(sources, vec![ClaimRef::new(blob_ref(2), 0)]);
    }
}
