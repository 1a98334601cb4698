//! Schema DDL for the embedded attribute index (spec.md §3, §4.3).
//! Any embedded transactional engine would do; this crate uses
//! `rusqlite` (bundled SQLite), the same choice the corpus reaches for
//! when it needs a local, file-backed, multi-reader-safe store without
//! a server process (see `other_examples/manifests/mrkline-backpak`'s
//! `rusqlite = { features = ["bundled"] }`).

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS state (
    key   TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_attrs (
    key        TEXT PRIMARY KEY,
    value_type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attrs (
    target_claim_set   TEXT    NOT NULL,
    target_claim_index INTEGER NOT NULL,
    key                TEXT    NOT NULL,
    value              TEXT    NOT NULL,
    source_claim_set   TEXT    NOT NULL,
    source_claim_index INTEGER NOT NULL,
    PRIMARY KEY (target_claim_set, target_claim_index, key, value, source_claim_set, source_claim_index)
);

CREATE INDEX IF NOT EXISTS attrs_by_target ON attrs (target_claim_set, target_claim_index);
CREATE INDEX IF NOT EXISTS attrs_by_key_value ON attrs (key, value);

CREATE TABLE IF NOT EXISTS failed_claim_sets (
    claim_set_ref TEXT PRIMARY KEY,
    last_modified INTEGER NOT NULL,
    first_seen    INTEGER NOT NULL,
    last_attempt  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS merged_claim_sets (
    claim_set_ref TEXT    NOT NULL,
    last_modified INTEGER NOT NULL,
    PRIMARY KEY (claim_set_ref, last_modified)
);
"#;

pub const STATE_KEY_STAGE: &str = "stage";
pub const STATE_KEY_LAST_INDEXED_CLAIM_TS: &str = "last_indexed_claim_ts";

pub const STAGE_INITIAL: i64 = 0;
pub const STAGE_BUILT: i64 = 1;
