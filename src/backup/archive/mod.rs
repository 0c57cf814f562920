pub mod walkdir_globset;
pub mod zip_archiver;

use crate::backup::result_error::result::{convert_error_vec, Result};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A single file to be written into a backup archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// File on disk.
    pub src: Arc<Path>,

    /// Path of the entry inside the archive, relative to the archive root.
    pub dst: Arc<Path>,
}

impl ArchiveEntry {
    pub fn new<A: Into<Arc<Path>>, B: Into<Arc<Path>>>(src: A, dst: B) -> ArchiveEntry {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }
}

/// Outcome of one archive pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveResult {
    pub archive_path: PathBuf,
    /// Files seen while scanning the source.
    pub files_total: usize,
    pub files_written: usize,
    /// Files that disappeared between the scan and the write.
    pub files_skipped: usize,
}

/// Source of archive entries.
pub trait ArchiveEntryIterable {
    /// Directory the entries are read from.
    fn src_dir(&self) -> &Path;

    /// Yields every entry to archive. Fails up front when the source itself
    /// is unusable; errors on single entries are yielded in place.
    fn archive_entry_iterator(
        &self,
    ) -> Result<Box<dyn Iterator<Item = Result<ArchiveEntry>> + Send>>;
}

/// Collects the entries of `source`, logging and dropping entries that could
/// not be read while scanning.
pub fn scan<S: ArchiveEntryIterable + ?Sized>(source: &S) -> Result<Vec<ArchiveEntry>> {
    let (entries, errors): (Vec<_>, Vec<_>) = source.archive_entry_iterator()?.partition_result();

    if let Err(e) = convert_error_vec(errors) {
        tracing::warn!("Ignoring entries that could not be scanned:\n{e}");
    }

    tracing::info!("Found {} file(s) to back up in {:?}", entries.len(), source.src_dir());
    Ok(entries)
}
