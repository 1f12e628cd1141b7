//! Durable copies of ranking tables.
//!
//! A snapshot holds only entries, never the index layout: loading decodes the
//! whole entry set first and then rebuilds a fresh table by replaying
//! upserts, so a failed load leaves nothing half-built.
//!
//! Stream layout:
//!
//! ```text
//! magic: [u8; 8] | count: u64 LE | count x (len: u32 LE | record: [u8; len])
//! ```
//!
//! Records use the escaped field encoding from `crate::encoding`.

use std::{
    error::Error,
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::Config,
    entry::{CategoryRecord, Entry},
    fs::write_atomic,
    registry::Registry,
    table::RankTable,
};

use self::frame::{FrameReader, Magic};

mod frame;

const TABLE_MAGIC: Magic = *b"RANKTBL\0";
const REGISTRY_MAGIC: Magic = *b"RANKREG\0";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed snapshot: {0}")]
    Decode(#[source] Box<dyn Error + Send + Sync>),
}

impl SnapshotError {
    pub(crate) fn malformed<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        SnapshotError::Decode(err.into())
    }

    fn opening(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SnapshotError::NotFound(path.to_owned()),
            _ => SnapshotError::Io(err),
        }
    }
}

pub fn write_table<W: Write>(table: &RankTable, w: W) -> Result<(), SnapshotError> {
    let entries = table.entries();
    frame::write_frames(w, &TABLE_MAGIC, &entries)?;
    Ok(())
}

pub fn read_table<R: Read>(r: R, config: &Config) -> Result<RankTable, SnapshotError> {
    let entries: Vec<Entry> = FrameReader::new(r, &TABLE_MAGIC)?.read_all()?;
    Ok(RankTable::from_entries(config, entries))
}

pub fn write_records<W: Write>(records: &[CategoryRecord], w: W) -> Result<(), SnapshotError> {
    frame::write_frames(w, &REGISTRY_MAGIC, records)?;
    Ok(())
}

pub fn read_records<R: Read>(r: R) -> Result<Vec<CategoryRecord>, SnapshotError> {
    FrameReader::new(r, &REGISTRY_MAGIC)?.read_all()
}

fn save(path: &Path, buf: Vec<u8>, count: usize) -> Result<(), SnapshotError> {
    write_atomic(path, &buf)?;
    debug!(path = %path.display(), count, bytes = buf.len(), "saved snapshot");
    Ok(())
}

fn load<T, F>(path: &Path, decode: F) -> Result<T, SnapshotError>
where
    F: FnOnce(&[u8]) -> Result<T, SnapshotError>,
{
    let buf = fs::read(path).map_err(|e| SnapshotError::opening(path, e))?;
    decode(&buf).map_err(|e| {
        warn!(path = %path.display(), error = %e, "rejected snapshot");
        e
    })
}

/// Writes `table` to `path`, replacing any previous snapshot there.
pub fn save_table<P: AsRef<Path>>(table: &RankTable, path: P) -> Result<(), SnapshotError> {
    let mut buf = Vec::new();
    write_table(table, &mut buf)?;
    save(path.as_ref(), buf, table.len())
}

pub fn load_table<P: AsRef<Path>>(path: P, config: &Config) -> Result<RankTable, SnapshotError> {
    let path = path.as_ref();
    let table = load(path, |buf| read_table(buf, config))?;
    debug!(path = %path.display(), count = table.len(), "loaded table snapshot");
    Ok(table)
}

/// Writes every table of `registry` to `path` as category records.
pub fn save_registry<P: AsRef<Path>>(registry: &Registry, path: P) -> Result<(), SnapshotError> {
    let records = registry.export();
    let mut buf = Vec::new();
    write_records(&records, &mut buf)?;
    save(path.as_ref(), buf, records.len())
}

/// Builds a fresh registry from the snapshot at `path`, creating its tables
/// with `config`.
pub fn load_registry<P: AsRef<Path>>(path: P, config: &Config) -> Result<Registry, SnapshotError> {
    let path = path.as_ref();
    let records = load(path, |buf| read_records(buf))?;
    debug!(path = %path.display(), count = records.len(), "loaded registry snapshot");
    Ok(Registry::from_records(config.clone(), records))
}
