//! Writes archive entries into a deflate-compressed zip file.
//!
//! The zip is assembled in a temporary file next to the destination and only
//! renamed into place once it has been finished and synced, so a failed or
//! interrupted run never leaves a `world_backup_*.zip` behind.

use crate::backup::archive::{scan, ArchiveEntry, ArchiveEntryIterable, ArchiveResult};
use crate::backup::function_path;
use crate::backup::progress::{Progress, ProgressTracker};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use function_name::named;
use itertools::Itertools;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use std::fs::File;
use std::io::{BufWriter, ErrorKind, IntoInnerError};
use std::path::Path;

/// Entries at least this large need zip64 headers.
static LARGE_FILE_THRESHOLD: u64 = u32::MAX as u64;

/// Scans `source` and writes everything it yields into `destination`.
///
/// Fails with [`Error::NoFilesFound`] before creating anything when the scan
/// comes back empty.
pub fn archive<S, F>(source: &S, destination: &Path, on_progress: F) -> Result<ArchiveResult>
where
    S: ArchiveEntryIterable + ?Sized,
    F: FnMut(Progress),
{
    let entries = scan(source)?;
    if entries.is_empty() {
        return Err(Error::no_files_found(source.src_dir()));
    }

    write_archive(&entries, destination, on_progress)
}

/// Writes `entries` into a new zip at `destination`.
///
/// Entries whose file vanished since the scan are skipped and counted. Any
/// other failure aborts with [`Error::ArchiveWriteFailed`] and removes the
/// partial file.
#[named]
pub fn write_archive<F: FnMut(Progress)>(
    entries: &[ArchiveEntry],
    destination: &Path,
    mut on_progress: F,
) -> Result<ArchiveResult> {
    let files_total = entries.len();
    tracing::info!("Writing {files_total} file(s) to {:?}", destination);

    let files_skipped = create_temp_file(destination)
        .and_then(|tmp| write_entries(tmp, entries, &mut on_progress))
        .and_then(|(tmp, files_skipped)| {
            tmp.persist(destination)
                .map_err(|e| Error::from(e.error))
                .add_msg(format!("Moving finished archive to {:?} failed", destination))?;
            Ok(files_skipped)
        })
        .map_err(|e| Error::archive_write_failed(e, destination))
        .add_fn_name(function_path!())?;

    Ok(ArchiveResult {
        archive_path: destination.to_path_buf(),
        files_total,
        files_written: files_total - files_skipped,
        files_skipped,
    })
}

fn create_temp_file(destination: &Path) -> Result<NamedTempFile> {
    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(Error::from)
        .add_msg(format!("Creating temporary archive in {:?} failed", dir))
}

/// Returns the finished temp file and the number of skipped entries.
fn write_entries<F: FnMut(Progress)>(
    tmp: NamedTempFile,
    entries: &[ArchiveEntry],
    on_progress: &mut F,
) -> Result<(NamedTempFile, usize)> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(BufWriter::new(tmp));
    let mut tracker = ProgressTracker::new(entries.len());
    let mut files_skipped = 0;

    for entry in entries {
        let name = entry_name(&entry.dst);
        let progress = match File::open(&entry.src) {
            Ok(mut src) => {
                let large_file = src.metadata()?.len() >= LARGE_FILE_THRESHOLD;
                writer
                    .start_file(name.as_str(), options.large_file(large_file))
                    .map_err(Error::from)
                    .add_msg(format!("Starting archive entry {name:?} failed"))?;
                std::io::copy(&mut src, &mut writer)
                    .map_err(Error::from)
                    .add_msg(format!("Copying {:?} into the archive failed", entry.src))?;
                tracing::trace!("Archived {:?} as {name}", entry.src);
                tracker.file_written()
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                files_skipped += 1;
                tracing::warn!("Skipped a file that was deleted during backup: {name}");
                tracker.file_skipped()
            }
            Err(e) => {
                return Err(Error::from(e).add_msg(format!("Opening {:?} failed", entry.src)));
            }
        };

        if let Some(progress) = progress {
            tracing::debug!("Archive progress: {progress}");
            on_progress(progress);
        }
    }

    let tmp = writer
        .finish()?
        .into_inner()
        .map_err(IntoInnerError::into_error)?;
    tmp.as_file().sync_all()?;

    Ok((tmp, files_skipped))
}

/// Zip entry names always use `/`, whatever the platform separator is.
fn entry_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::walkdir_globset::WalkdirAndGlobsetSource;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn world_source(dir: &Path) -> WalkdirAndGlobsetSource {
        WalkdirAndGlobsetSource::builder().src_dir(dir).build()
    }

    fn read_archive(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut zip = ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..zip.len())
            .map(|i| {
                let mut file = zip.by_index(i).unwrap();
                assert_eq!(file.compression(), CompressionMethod::Deflated);
                let mut content = Vec::new();
                file.read_to_end(&mut content).unwrap();
                (file.name().to_owned(), content)
            })
            .collect()
    }

    fn leftover_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .sorted()
            .collect()
    }

    #[test]
    fn test_round_trip_preserves_paths_and_content() {
        let world = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::create_dir(world.path().join("sub")).unwrap();
        std::fs::write(world.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(world.path().join("sub/b.txt"), b"bravo\n".repeat(1000)).unwrap();
        let destination = out.path().join("world_backup_2024-01-01_00-00-00.zip");

        let result = archive(&world_source(world.path()), &destination, |_| {}).unwrap();

        assert_eq!(
            result,
            ArchiveResult {
                archive_path: destination.clone(),
                files_total: 2,
                files_written: 2,
                files_skipped: 0,
            }
        );
        assert_eq!(
            read_archive(&destination),
            vec![
                ("a.txt".to_owned(), b"alpha".to_vec()),
                ("sub/b.txt".to_owned(), b"bravo\n".repeat(1000)),
            ]
        );
        assert_eq!(
            leftover_files(out.path()),
            vec!["world_backup_2024-01-01_00-00-00.zip"]
        );
    }

    #[test]
    fn test_vanished_file_is_skipped() {
        let world = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        for name in ["1.dat", "2.dat", "3.dat"] {
            std::fs::write(world.path().join(name), name).unwrap();
        }
        let destination = out.path().join("world_backup_2024-01-01_00-00-00.zip");

        let entries = scan(&world_source(world.path())).unwrap();
        std::fs::remove_file(world.path().join("2.dat")).unwrap();
        let result = write_archive(&entries, &destination, |_| {}).unwrap();

        assert_eq!(result.files_total, 3);
        assert_eq!(result.files_skipped, 1);
        assert_eq!(result.files_written, 2);
        let names: Vec<_> = read_archive(&destination).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["1.dat", "3.dat"]);
    }

    #[test]
    fn test_file_deleted_mid_run_is_skipped() {
        let world = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        for i in 0..10 {
            std::fs::write(world.path().join(format!("{i}.dat")), "x").unwrap();
        }
        let destination = out.path().join("world_backup_2024-01-01_00-00-00.zip");
        let last = world.path().join("9.dat");

        let result = archive(&world_source(world.path()), &destination, |p| {
            if p.files_processed == 1 {
                std::fs::remove_file(&last).unwrap();
            }
        })
        .unwrap();

        assert_eq!(result.files_total, 10);
        assert_eq!(result.files_skipped, 1);
        assert_eq!(result.files_written, 9);
    }

    #[test]
    fn test_progress_reports_for_hundred_files() {
        let world = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        for i in 0..100 {
            std::fs::write(world.path().join(format!("{i:03}.dat")), "x").unwrap();
        }
        let destination = out.path().join("world_backup_2024-01-01_00-00-00.zip");

        let mut reports = Vec::new();
        archive(&world_source(world.path()), &destination, |p| reports.push(p)).unwrap();

        assert!(reports.len() <= 11);
        assert!(reports.windows(2).all(|w| w[0].percent <= w[1].percent));
        let percents: Vec<_> = reports.iter().map(|p| p.percent).collect();
        assert_eq!(percents, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert!(reports.iter().all(|p| p.files_total == 100));
    }

    #[test]
    fn test_empty_source_creates_nothing() {
        let world = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::create_dir(world.path().join("db")).unwrap();
        let destination = out.path().join("world_backup_2024-01-01_00-00-00.zip");

        let err = archive(&world_source(world.path()), &destination, |_| {}).unwrap_err();

        assert!(matches!(err.root(), Error::NoFilesFound { .. }));
        assert!(leftover_files(out.path()).is_empty());
    }

    #[test]
    fn test_missing_source_is_source_not_found() {
        let out = TempDir::new().unwrap();
        let destination = out.path().join("world_backup_2024-01-01_00-00-00.zip");

        let err = archive(
            &world_source(&out.path().join("missing")),
            &destination,
            |_| {},
        )
        .unwrap_err();

        assert!(matches!(err.root(), Error::SourceNotFound { .. }));
        assert!(!destination.exists());
    }

    #[test]
    fn test_unwritable_destination_is_archive_write_failed() {
        let world = TempDir::new().unwrap();
        std::fs::write(world.path().join("level.dat"), "level").unwrap();
        let destination = world
            .path()
            .join("no_such_dir")
            .join("world_backup_2024-01-01_00-00-00.zip");

        let err = archive(&world_source(world.path()), &destination, |_| {}).unwrap_err();

        assert!(matches!(err.root(), Error::ArchiveWriteFailed { .. }));
        assert!(!destination.exists());
    }

    #[test]
    fn test_entry_name_uses_forward_slashes() {
        let path: std::path::PathBuf = ["region", "sub", "file.dat"].iter().collect();
        assert_eq!(entry_name(&path), "region/sub/file.dat");
    }
}
