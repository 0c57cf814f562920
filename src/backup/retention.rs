use crate::backup::function_path;
use crate::backup::naming::{get_date_time_from_file_path, is_archive_file_name};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::CopyGetters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fs::read_dir;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use validator::Validate;

pub static DEFAULT_MAX_BACKUPS: i64 = 10;

fn default_max_backups() -> Option<i64> {
    Some(DEFAULT_MAX_BACKUPS)
}

/// How many archives to keep in the backup directory.
///
/// A missing key falls back to [`DEFAULT_MAX_BACKUPS`]. An explicit `null`,
/// zero or a negative number turns pruning off.
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, Validate, Builder, CopyGetters, PartialEq, Eq,
)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
#[getset(get_copy = "pub")]
pub struct RetentionConfig {
    #[serde(default = "default_max_backups")]
    max_backups: Option<i64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_backups: default_max_backups(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Archives removed by this pass, oldest first.
    pub deleted: Vec<PathBuf>,
    /// Archives picked for deletion that someone else already removed.
    pub already_gone: Vec<PathBuf>,
    /// Archives that could not be deleted.
    pub failed: Vec<PathBuf>,
}

impl RetentionConfig {
    pub fn disabled() -> Self {
        Self { max_backups: None }
    }

    fn limit(&self) -> Option<usize> {
        self.max_backups
            .filter(|max| *max > 0)
            .and_then(|max| usize::try_from(max).ok())
    }

    /// Archives in `dir` that exceed the limit, oldest first.
    #[named]
    pub fn get_delete<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let Some(limit) = self.limit() else {
            return Ok(vec![]);
        };

        let dir = dir.as_ref();
        let backups = read_dir(dir)
            .map_err(Error::from)
            .add_msg(format!("Listing backup directory {:?} failed", dir))
            .add_fn_name(function_path!())?
            .filter_map(|r| readable_entry(r, dir))
            .filter(|de| de.file_type().is_ok_and(|ft| ft.is_file()))
            .filter(|de| de.file_name().to_str().is_some_and(is_archive_file_name))
            .map(|de| de.path())
            .sorted_unstable_by(|a, b| a.file_name().cmp(&b.file_name()))
            .collect_vec();

        let excess = backups.len().saturating_sub(limit);
        Ok(backups.into_iter().take(excess).collect_vec())
    }

    /// Deletes the oldest archives in `dir` beyond the configured limit.
    ///
    /// Only listing the directory can fail; per-file delete errors are logged
    /// and recorded in the report.
    pub fn prune<P: AsRef<Path>>(&self, dir: P) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        let Some(limit) = self.limit() else {
            tracing::debug!("Backup pruning is disabled");
            return Ok(report);
        };

        tracing::info!("Checking for old backups to prune (limit: {limit})...");
        let to_delete = self.get_delete(dir)?;
        if to_delete.is_empty() {
            return Ok(report);
        }

        tracing::info!("Found {} old backup(s) to delete.", to_delete.len());
        for path in to_delete {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    match get_date_time_from_file_path(&path) {
                        Some(dt) => tracing::info!("Deleted old backup: {:?} (taken {dt})", path),
                        None => tracing::info!("Deleted old backup: {:?}", path),
                    }
                    report.deleted.push(path);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!("Tried to delete old backup but it was already gone: {:?}", path);
                    report.already_gone.push(path);
                }
                Err(e) => {
                    tracing::error!("Error deleting old backup {:?}: {e}", path);
                    report.failed.push(path);
                }
            }
        }

        Ok(report)
    }
}

/// Drops a directory entry that could not be read, logging why.
fn readable_entry<T>(entry: std::io::Result<T>, dir: &Path) -> Option<T> {
    entry
        .inspect_err(|e| tracing::warn!("Skipping unreadable entry in {:?}: {e}", dir))
        .ok()
}
