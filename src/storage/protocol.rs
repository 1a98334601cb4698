//! Wire encoding for the storage server's protocol (spec.md §6):
//! command byte, request-specific header, optional body; responses
//! begin with a status byte and a body-size field.

use std::io::{Read, Write};

use anyhow::{bail, Context, Result};

use crate::model::{BlobRef, BLOB_REF_SIZE};

pub const STATUS_OK: u8 = 0x20;

pub const CMD_GET_BLOB: u8 = 0x01;
pub const CMD_WATCH_BLOBS: u8 = 0x02;

/// Bit in `WatchRecord::flags` marking a record as carrying over from
/// the historical backlog vs. a live, just-written blob (spec.md §6).
pub const FLAG_EOB: u8 = 0x01;

/// Minimal bitflags-shaped newtype so we don't pull in the `bitflags`
/// crate for two constants; kept private to this module's concerns.
macro_rules! bitflags_like {
    ($(#[$meta:meta])* pub struct $name:ident: $ty:ty { $(const $flag:ident = $val:expr;)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub $ty);
        impl $name {
            $(pub const $flag: $name = $name($val);)*
            pub fn bits(self) -> $ty { self.0 }
            pub fn contains(self, other: $name) -> bool { self.0 & other.0 == other.0 }
        }
        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name { $name(self.0 | rhs.0) }
        }
    };
}

bitflags_like! {
    /// `flags_filter` bitmask accepted by `watch-blobs` (spec.md §4.1).
    pub struct WatchFlags: u64 {
        const CLAIM = 0x01;
        const INDEX_RULE = 0x02;
    }
}

/// Filter passed to `watch-blobs` (spec.md §4.1, §6).
#[derive(Debug, Clone, Copy)]
pub struct WatchFilter {
    pub flags_filter: WatchFlags,
    pub last_modified_after: u64,
}

/// One record from the `watch-blobs` stream (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct WatchRecord {
    pub blob_ref: BlobRef,
    pub flags: u8,
    pub last_modified: u64,
}

impl WatchRecord {
    pub fn end_of_backlog(&self) -> bool {
        self.flags & FLAG_EOB != 0
    }
}

/// Writes the `get-blob` request header: command byte + blob ref.
pub fn write_get_blob_request<W: Write>(w: &mut W, blob_ref: &BlobRef) -> Result<()> {
    w.write_all(&[CMD_GET_BLOB])?;
    w.write_all(blob_ref.as_bytes())?;
    Ok(())
}

/// Writes the `watch-blobs` request header: command byte + filter.
pub fn write_watch_blobs_request<W: Write>(w: &mut W, filter: &WatchFilter) -> Result<()> {
    w.write_all(&[CMD_WATCH_BLOBS])?;
    w.write_all(&filter.flags_filter.bits().to_be_bytes())?;
    w.write_all(&filter.last_modified_after.to_be_bytes())?;
    Ok(())
}

/// Reads a response status byte + body-size field, bailing if the
/// status isn't OK (spec.md §6).
pub fn read_status<R: Read>(r: &mut R, op: &'static str) -> Result<u64> {
    let mut status = [0u8; 1];
    r.read_exact(&mut status).context("reading status byte")?;
    if status[0] != STATUS_OK {
        bail!(crate::error::StorageError::BadStatus {
            op,
            status: status[0],
        });
    }
    let mut size_buf = [0u8; 8];
    r.read_exact(&mut size_buf).context("reading body size")?;
    Ok(u64::from_be_bytes(size_buf))
}

/// Reads a `get-blob` response body: one flag byte, then `body_size - 1`
/// bytes of blob content.
pub fn read_get_blob_body<R: Read>(r: &mut R, body_size: u64, max_size: u64) -> Result<(u8, Vec<u8>)> {
    if body_size > max_size {
        bail!(crate::error::StorageError::BlobTooLarge {
            size: body_size,
            max: max_size,
        });
    }
    let mut flag = [0u8; 1];
    r.read_exact(&mut flag).context("reading blob flag byte")?;
    let mut body = vec![0u8; (body_size - 1) as usize];
    r.read_exact(&mut body).context("reading blob body")?;
    Ok((flag[0], body))
}

/// Reads one `watch-blobs` record: blob ref, flags byte, last-modified.
pub fn read_watch_record<R: Read>(r: &mut R) -> Result<WatchRecord> {
    let mut blob_buf = [0u8; BLOB_REF_SIZE];
    r.read_exact(&mut blob_buf)
        .context("reading watch record blob ref")?;
    let mut flags = [0u8; 1];
    r.read_exact(&mut flags).context("reading watch record flags")?;
    let mut last_modified_buf = [0u8; 8];
    r.read_exact(&mut last_modified_buf)
        .context("reading watch record last_modified")?;
    Ok(WatchRecord {
        blob_ref: BlobRef::from_bytes(blob_buf),
        flags: flags[0],
        last_modified: u64::from_be_bytes(last_modified_buf),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_flags_combine() {
        let f = WatchFlags::CLAIM | WatchFlags::INDEX_RULE;
        assert!(f.contains(WatchFlags::CLAIM));
        assert!(f.contains(WatchFlags::INDEX_RULE));
        assert_eq!(f.bits(), 0x03);
    }

    #[test]
    fn watch_record_eob_flag() {
        let r = WatchRecord {
            blob_ref: BlobRef::from_bytes([0u8; BLOB_REF_SIZE]),
            flags: FLAG_EOB,
            last_modified: 0,
        };
        assert!(r.end_of_backlog());
    }

    #[test]
    fn get_blob_body_rejects_oversize() {
        let mut cursor = std::io::Cursor::new(vec![0u8; 10]);
        let err = read_get_blob_body(&mut cursor, 1000, 100).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
