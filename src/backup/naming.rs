//! Archive file naming.
//!
//! Archives are named `world_backup_{YYYY-MM-DD_HH-MM-SS}.zip`. The timestamp
//! sorts lexicographically in the same order as chronologically, which is what
//! retention relies on.

use chrono::{DateTime, NaiveDateTime, TimeZone};
use std::fmt::Display;
use std::path::Path;

pub static ARCHIVE_PREFIX: &str = "world_backup_";
pub static ARCHIVE_EXT: &str = "zip";
pub static TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

pub fn archive_file_name<O: Display, T: TimeZone<Offset = O>>(dt: &DateTime<T>) -> String {
    format!("{}{}.{}", ARCHIVE_PREFIX, dt.format(TIME_FORMAT), ARCHIVE_EXT)
}

/// Returns the timestamp part of an archive file name, `None` when the name
/// does not follow the archive naming convention.
fn timestamp_part(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(ARCHIVE_PREFIX)?
        .strip_suffix(ARCHIVE_EXT)?
        .strip_suffix('.')
}

pub fn is_archive_file_name(file_name: &str) -> bool {
    timestamp_part(file_name).is_some()
}

pub fn get_date_time_from_file_path<P: AsRef<Path>>(file_path: P) -> Option<NaiveDateTime> {
    let file_name = file_path.as_ref().file_name()?.to_str()?;
    NaiveDateTime::parse_from_str(timestamp_part(file_name)?, TIME_FORMAT).ok()
}
