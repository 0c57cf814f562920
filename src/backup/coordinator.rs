//! Runs one world backup at a time and reports on it.
//!
//! A run goes: check the world directory, create the backup directory, write
//! the archive, prune old archives. The single-flight slot is taken before
//! the run starts and released when it ends, however it ends.

use crate::backup::archive::walkdir_globset::WalkdirAndGlobsetSource;
use crate::backup::archive::zip_archiver::archive;
use crate::backup::archive::ArchiveResult;
use crate::backup::backup_config::BackupConfig;
use crate::backup::function_path;
use crate::backup::layout::ServerLayout;
use crate::backup::naming::archive_file_name;
use crate::backup::notifications::{Audience, Notification};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::retention::PruneReport;
use crate::backup::single_flight::{SingleFlight, SingleFlightGuard};

use chrono::Local;
use derive_more::Display;
use function_name::named;
use getset::{CopyGetters, Getters};
use rayon::ThreadPool;
use validator::Validate;

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError};
use std::sync::{Arc, Once, PoisonError, RwLock};
use std::time::Duration;

static ALREADY_RUNNING_MSG: &str = "A backup is already in progress. Please wait for it to complete.";
static STARTING_MSG: &str = "Starting world backup in the background...";
static UNEXPECTED_MSG: &str =
    "An unhandled error occurred during backup. Check the server console for details.";

#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct BackupRequest {
    #[getset(get = "pub")]
    source_directory: PathBuf,
    #[getset(get_copy = "pub")]
    is_automatic: bool,
}

impl BackupRequest {
    pub fn new<P: Into<PathBuf>>(source_directory: P, is_automatic: bool) -> Self {
        Self {
            source_directory: source_directory.into(),
            is_automatic,
        }
    }

    /// Audience for problems that only matter to whoever asked for the run.
    fn requester_audience(&self) -> Audience {
        if self.is_automatic {
            Audience::LogOnly
        } else {
            Audience::Operators
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupSummary {
    pub archive: ArchiveResult,
    /// `None` when listing the backup directory for pruning failed.
    pub pruned: Option<PruneReport>,
}

#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum BackupFailure {
    #[display("world directory {_0:?} not found")]
    SourceNotFound(PathBuf),
    #[display("could not create backup directory {_0:?}")]
    BackupDirCreateFailed(PathBuf),
    #[display("could not write archive {_0:?}")]
    ArchiveWriteFailed(PathBuf),
    #[display("unexpected error")]
    Unexpected,
}

impl From<&Error> for BackupFailure {
    fn from(error: &Error) -> Self {
        match error.root() {
            Error::SourceNotFound { path } => BackupFailure::SourceNotFound(path.clone()),
            Error::BackupDirCreateFailed { path, .. } => {
                BackupFailure::BackupDirCreateFailed(path.clone())
            }
            Error::ArchiveWriteFailed { path, .. } => BackupFailure::ArchiveWriteFailed(path.clone()),
            _ => BackupFailure::Unexpected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackupOutcome {
    Completed(BackupSummary),
    /// The world directory exists but holds no files; nothing was written.
    NothingToBackUp,
    /// Another backup was running.
    Rejected,
    Failed(BackupFailure),
}

impl BackupOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            BackupOutcome::Completed(_) | BackupOutcome::NothingToBackUp
        )
    }
}

/// Result of handing a backup to the worker pool.
#[derive(Debug)]
pub enum Trigger {
    Started(BackupTicket),
    AlreadyInProgress,
}

impl Trigger {
    /// Blocks until the run finishes.
    pub fn wait(self) -> BackupOutcome {
        match self {
            Trigger::Started(ticket) => ticket.wait(),
            Trigger::AlreadyInProgress => BackupOutcome::Rejected,
        }
    }
}

/// Receives the outcome of a backup running in the background.
#[derive(Debug)]
pub struct BackupTicket {
    rx: Receiver<BackupOutcome>,
}

impl BackupTicket {
    pub fn wait(self) -> BackupOutcome {
        self.rx
            .recv()
            .unwrap_or(BackupOutcome::Failed(BackupFailure::Unexpected))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<BackupOutcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(BackupOutcome::Failed(BackupFailure::Unexpected))
            }
        }
    }
}

pub struct BackupCoordinator {
    layout: ServerLayout,
    config: RwLock<Arc<BackupConfig>>,
    notification: Arc<dyn Notification>,
    job_state: SingleFlight,
    pool: Arc<ThreadPool>,
}

impl BackupCoordinator {
    pub fn new(
        layout: ServerLayout,
        config: BackupConfig,
        notification: Arc<dyn Notification>,
        pool: Arc<ThreadPool>,
    ) -> Result<Self> {
        layout
            .validate()
            .map_err(Error::from)
            .add_msg(format!("Invalid server layout {:?}", layout))?;
        config
            .validate()
            .map_err(Error::from)
            .add_msg("Invalid backup config")?;

        install_panic_hook();
        Ok(Self {
            layout,
            config: RwLock::new(Arc::new(config)),
            notification,
            job_state: SingleFlight::new(),
            pool,
        })
    }

    pub fn layout(&self) -> &ServerLayout {
        &self.layout
    }

    pub fn config(&self) -> Arc<BackupConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the config used by runs started from now on.
    pub fn reload(&self, config: BackupConfig) -> Result<()> {
        config
            .validate()
            .map_err(Error::from)
            .add_msg("Invalid backup config")?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        tracing::info!("Backup config reloaded");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.job_state.is_in_progress()
    }

    pub fn request(&self, is_automatic: bool) -> BackupRequest {
        BackupRequest::new(self.layout.world_dir(), is_automatic)
    }

    /// Runs a backup on the calling thread.
    pub fn run_backup(&self, request: &BackupRequest) -> BackupOutcome {
        match self.job_state.try_acquire() {
            Some(guard) => self.run_guarded(guard, request),
            None => self.reject(request),
        }
    }

    /// Starts a backup on the worker pool and returns right away.
    ///
    /// The slot is taken on the calling thread, so a concurrent trigger is
    /// rejected immediately rather than after the pool picks the job up.
    pub fn trigger(self: &Arc<Self>, request: BackupRequest) -> Trigger {
        let Some(guard) = self.job_state.try_acquire() else {
            self.reject(&request);
            return Trigger::AlreadyInProgress;
        };

        self.notify(Audience::Operators, STARTING_MSG);
        let (tx, rx) = sync_channel(1);
        let coordinator = self.clone();
        self.pool.spawn(move || {
            let outcome = coordinator.run_guarded(guard, &request);
            if tx.send(outcome).is_err() {
                tracing::trace!("Nobody is waiting for the backup outcome");
            }
        });

        Trigger::Started(BackupTicket { rx })
    }

    pub fn trigger_now(self: &Arc<Self>) -> Trigger {
        self.trigger(self.request(false))
    }

    pub fn trigger_automatic(self: &Arc<Self>) -> Trigger {
        self.trigger(self.request(true))
    }

    fn reject(&self, request: &BackupRequest) -> BackupOutcome {
        tracing::warn!("{ALREADY_RUNNING_MSG}");
        self.notify(request.requester_audience(), ALREADY_RUNNING_MSG);
        BackupOutcome::Rejected
    }

    fn run_guarded(&self, guard: SingleFlightGuard, request: &BackupRequest) -> BackupOutcome {
        take_panic_report();
        let outcome = match catch_unwind(AssertUnwindSafe(|| self.execute(request))) {
            Ok(outcome) => outcome,
            Err(panic) => {
                let report = take_panic_report()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "(no panic location recorded)".to_owned());
                tracing::error!(
                    "An unhandled error occurred during backup of {:?}: {} {report}",
                    request.source_directory(),
                    panic_message(panic.as_ref())
                );
                self.notify(Audience::Operators, UNEXPECTED_MSG);
                BackupOutcome::Failed(BackupFailure::Unexpected)
            }
        };
        drop(guard);
        outcome
    }

    fn execute(&self, request: &BackupRequest) -> BackupOutcome {
        let config = self.config();
        match self.create_backup(request, &config) {
            Ok(archive) => {
                let mut msg = format!("World backup successful! Saved to {:?}", archive.archive_path);
                if archive.files_skipped > 0 {
                    msg.push_str(&format!(
                        " ({} files were skipped as they were modified during backup)",
                        archive.files_skipped
                    ));
                }
                self.notify(Audience::Operators, &msg);

                let pruned = archive
                    .archive_path
                    .parent()
                    .and_then(|dir| self.prune(dir, &config));
                BackupOutcome::Completed(BackupSummary { archive, pruned })
            }
            Err(e) => self.handle_failure(request, e),
        }
    }

    #[named]
    fn create_backup(&self, request: &BackupRequest, config: &BackupConfig) -> Result<ArchiveResult> {
        let source_dir = request.source_directory();
        if !source_dir.is_dir() {
            return Err(Error::source_not_found(source_dir.clone()));
        }

        let backup_dir = self.layout.backup_dir(config);
        std::fs::create_dir_all(&backup_dir)
            .map_err(|e| Error::backup_dir_create_failed(e, backup_dir.clone()))
            .add_fn_name(function_path!())?;

        let destination = backup_dir.join(archive_file_name(&Local::now()));
        let source = WalkdirAndGlobsetSource::builder()
            .src_dir(source_dir.clone())
            .build();

        archive(&source, &destination, |progress| {
            self.notify(
                Audience::Operators,
                &format!("Backup in progress: {progress}"),
            )
        })
        .add_fn_name(function_path!())
    }

    fn prune(&self, backup_dir: &Path, config: &BackupConfig) -> Option<PruneReport> {
        match config.backup_management().prune(backup_dir) {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!("An error occurred while managing old backups:\n{e}");
                None
            }
        }
    }

    fn handle_failure(&self, request: &BackupRequest, error: Error) -> BackupOutcome {
        let audience = request.requester_audience();
        let failure = match error.root() {
            Error::NoFilesFound { .. } => {
                tracing::warn!("{error}");
                self.notify(audience, "Warning: No files found to back up.");
                return BackupOutcome::NothingToBackUp;
            }
            Error::SourceNotFound { path } => {
                tracing::error!("{error}");
                self.notify(
                    audience,
                    &format!("Error: World directory not found at {:?}", path),
                );
                BackupFailure::from(&error)
            }
            Error::BackupDirCreateFailed { .. } => {
                tracing::error!("{error}");
                self.notify(
                    audience,
                    "Could not create the backup directory. Check the server console for details.",
                );
                BackupFailure::from(&error)
            }
            Error::ArchiveWriteFailed { .. } => {
                tracing::error!("Backup failed:\n{error}");
                if request.is_automatic() {
                    self.notify(Audience::Operators, UNEXPECTED_MSG);
                } else {
                    self.notify(
                        Audience::Operators,
                        "Writing the backup archive failed. Check the server console for details.",
                    );
                }
                BackupFailure::from(&error)
            }
            _ => {
                tracing::error!("An unhandled error occurred during backup:\n{error}");
                self.notify(Audience::Operators, UNEXPECTED_MSG);
                BackupFailure::Unexpected
            }
        };
        BackupOutcome::Failed(failure)
    }

    fn notify(&self, audience: Audience, msg: &str) {
        if let Err(e) = self.notification.send(audience, msg) {
            tracing::warn!("Sending {audience} notification {msg:?} failed:\n{e}");
        }
    }
}

/// Where the last panic on this thread happened, recorded by the hook from
/// [`install_panic_hook`].
struct PanicReport {
    location: String,
    backtrace: Backtrace,
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}", self.location)?;
        match self.backtrace.status() {
            BacktraceStatus::Captured => write!(f, "\nstack backtrace:\n{}", self.backtrace),
            _ => write!(f, " (run with RUST_BACKTRACE=1 for a backtrace)"),
        }
    }
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicReport>> = const { RefCell::new(None) };
}

/// Chains a panic hook that records location and backtrace for the
/// panicking thread. The previous hook still runs. Installed once per process.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let report = PanicReport {
                location: info
                    .location()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "unknown location".to_owned()),
                backtrace: Backtrace::capture(),
            };
            let _ = LAST_PANIC.try_with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(report);
                }
            });
            previous(info);
        }));
    });
}

fn take_panic_report() -> Option<PanicReport> {
    LAST_PANIC
        .try_with(|slot| slot.try_borrow_mut().ok().and_then(|mut s| s.take()))
        .ok()
        .flatten()
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
