//! Storage client (spec.md §4.1): speaks the blob-server wire protocol
//! over a TCP connection opened on demand. Connections are cheap to
//! recreate, matching the teacher's `LocalChunkReader`/`RemoteChunkReader`
//! split (`src/backup/read_chunk.rs`) of "here's a trait, here's the
//! network-backed impl" — this crate only needs the network-backed side.

use std::io::{BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::StorageError;
use crate::model::BlobRef;

use super::protocol::{
    read_get_blob_body, read_status, read_watch_record, write_get_blob_request,
    write_watch_blobs_request, WatchFilter, WatchRecord,
};

/// Default ceiling applied to a `get-blob` response if the server
/// doesn't separately declare a smaller one for this connection.
pub const DEFAULT_MAX_BLOB_SIZE: u64 = 128 * 1024 * 1024;

/// Connects to a storage server host/port on demand, one TCP socket per
/// operation (or, for `watch_blobs`, one socket dedicated for the
/// watch's lifetime). No connection is ever shared between threads.
#[derive(Debug, Clone)]
pub struct StorageClient {
    host: String,
    port: u16,
    max_blob_size: u64,
}

impl StorageClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        StorageClient {
            host: host.into(),
            port,
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        TcpStream::connect((self.host.as_str(), self.port)).map_err(|source| {
            StorageError::Connect {
                host: self.host.clone(),
                port: self.port,
                source,
            }
            .into()
        })
    }

    /// `get-blob(ref)` → (flag byte, body bytes) (spec.md §4.1, §6).
    pub fn get_blob(&self, blob_ref: &BlobRef) -> Result<(u8, Vec<u8>)> {
        let stream = self.connect()?;
        let mut writer = BufWriter::new(&stream);
        write_get_blob_request(&mut writer, blob_ref)?;
        writer.flush()?;

        let mut reader = BufReader::new(&stream);
        let body_size = read_status(&mut reader, "get-blob")?;
        read_get_blob_body(&mut reader, body_size, self.max_blob_size)
    }

    /// `watch-blobs(filter)` → a live iterator of records (spec.md
    /// §4.1). The connection is dedicated to this watch for its
    /// lifetime; dropping the returned `WatchStream` closes it.
    pub fn watch_blobs(&self, filter: WatchFilter) -> Result<WatchStream> {
        let stream = self.connect()?;
        stream
            .set_read_timeout(Some(Duration::from_secs(1)))
            .context("setting watch socket read timeout")?;

        let mut writer = BufWriter::new(&stream);
        write_watch_blobs_request(&mut writer, &filter)?;
        writer.flush()?;

        Ok(WatchStream {
            reader: BufReader::new(stream),
        })
    }

    /// `fetch-signed-xml(ref)` → get-blob, verify signature, parse
    /// inner XML into a claim-set (spec.md §4.1). Signature
    /// verification is an assumed library service (spec.md §1); this
    /// delegates to `crate::storage::signing::verify`.
    pub fn fetch_claim_set(&self, blob_ref: &BlobRef) -> Result<crate::claims::ClaimSetDoc> {
        let (_flags, body) = self.get_blob(blob_ref)?;
        let xml = super::signing::verify(&body)
            .with_context(|| format!("verifying signature envelope for blob {}", blob_ref))?;
        let claim_set = crate::claims::parse_claim_set(&xml)
            .with_context(|| format!("parsing claim-set {}", blob_ref))?;
        Ok(crate::claims::ClaimSetDoc { claim_set, xml })
    }

    /// `fetch-stylesheet(ref)` → compiled XSLT handle (spec.md §4.1).
    /// XSLT compilation is an assumed library service (spec.md §1).
    pub fn fetch_stylesheet(&self, blob_ref: &BlobRef) -> Result<super::stylesheet::Stylesheet> {
        let (_flags, body) = self.get_blob(blob_ref)?;
        super::stylesheet::Stylesheet::compile(blob_ref, &body)
    }
}

/// A dedicated, long-lived connection reading `watch-blobs` records.
pub struct WatchStream {
    reader: BufReader<TcpStream>,
}

impl WatchStream {
    /// Reads the next record, or `Ok(None)` on a read timeout (used by
    /// workers to re-check their shutdown flag every second per
    /// spec.md §4.5's `select` timeout requirement).
    pub fn next_record(&mut self) -> Result<Option<WatchRecord>> {
        match read_watch_record(&mut self.reader) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
                    if matches!(
                        io_err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) {
                        return Ok(None);
                    }
                }
                Err(err)
            }
        }
    }
}
