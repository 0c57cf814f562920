//! Periodic backups.
//!
//! [`RepeatingTask`] is a named thread that runs a closure after an initial
//! delay and then once per period until cancelled. [`AutoBackup`] keeps at
//! most one such task alive for a coordinator and rebuilds it from the
//! current config.

use crate::backup::coordinator::{BackupCoordinator, Trigger};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Runs a task repeatedly on its own thread. Dropping it cancels the task
/// and waits for the thread to exit.
#[derive(Debug)]
pub struct RepeatingTask {
    name: String,
    cancel_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RepeatingTask {
    pub fn start<F>(name: impl Into<String>, delay: Duration, period: Duration, mut task: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (cancel_tx, cancel_rx) = channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                // `None` is a run too far out for `Instant` to represent: it never fires.
                let mut next_run = Instant::now().checked_add(delay);
                loop {
                    let cancelled = match next_run {
                        Some(at) => {
                            let wait = at.saturating_duration_since(Instant::now());
                            match cancel_rx.recv_timeout(wait) {
                                Err(RecvTimeoutError::Timeout) => false,
                                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                            }
                        }
                        None => {
                            let _ = cancel_rx.recv();
                            true
                        }
                    };
                    if cancelled {
                        break;
                    }

                    task();
                    let now = Instant::now();
                    // Skip missed runs instead of firing them back to back.
                    next_run = next_run
                        .and_then(|at| at.checked_add(period))
                        .filter(|at| *at >= now)
                        .or_else(|| now.checked_add(period));
                }
            })
            .map_err(Error::from)
            .add_msg(format!("Spawning thread {name:?} failed"))?;

        tracing::debug!("Started repeating task {name:?}");
        Ok(Self {
            name,
            cancel_tx: Some(cancel_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task thread is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops future runs. A run already in progress finishes first.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Repeating task {:?} panicked", self.name);
            } else {
                tracing::debug!("Stopped repeating task {:?}", self.name);
            }
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Triggers automatic backups at the interval configured in `auto-backup`.
pub struct AutoBackup {
    coordinator: Arc<BackupCoordinator>,
    task: Mutex<Option<RepeatingTask>>,
}

impl AutoBackup {
    pub fn new(coordinator: Arc<BackupCoordinator>) -> Self {
        Self {
            coordinator,
            task: Mutex::new(None),
        }
    }

    /// Cancels any existing schedule and starts a new one from the
    /// coordinator's current config.
    ///
    /// Returns whether automatic backups are now scheduled.
    pub fn reschedule(&self) -> Result<bool> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = task.take() {
            old.cancel();
        }

        let auto_backup = *self.coordinator.config().auto_backup();
        if !auto_backup.enabled() {
            tracing::info!("Automatic backups are disabled");
            return Ok(false);
        }
        let Some(interval) = auto_backup.interval() else {
            tracing::warn!(
                "Automatic backup interval must be positive, got {} hour(s); automatic backups are disabled",
                auto_backup.interval_hours()
            );
            return Ok(false);
        };

        let coordinator = self.coordinator.clone();
        *task = Some(RepeatingTask::start(
            "world-backup-auto",
            interval,
            interval,
            move || {
                if let Trigger::AlreadyInProgress = coordinator.trigger_automatic() {
                    tracing::debug!("Skipping automatic backup, one is already running");
                }
            },
        )?);

        tracing::info!(
            "Automatic backups scheduled every {} hour(s)",
            auto_backup.interval_hours()
        );
        Ok(true)
    }

    pub fn is_scheduled(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Whether a schedule exists and its thread is alive.
    pub fn is_task_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(RepeatingTask::is_running)
    }

    pub fn cancel(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.cancel();
            tracing::info!("Automatic backups cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_config::{AutoBackupConfig, BackupConfig};
    use crate::backup::layout::ServerLayout;
    use crate::backup::notifications::channel::ChannelNotification;
    use rayon::ThreadPoolBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn coordinator(root: &TempDir, config: BackupConfig) -> Arc<BackupCoordinator> {
        let layout = ServerLayout::builder()
            .working_root(root.path())
            .level_name("world")
            .data_folder(root.path().join("plugin"))
            .build();
        std::fs::create_dir_all(layout.world_dir()).unwrap();
        std::fs::write(layout.world_dir().join("level.dat"), "level").unwrap();
        let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        Arc::new(
            BackupCoordinator::new(
                layout,
                config,
                Arc::new(ChannelNotification::new().0),
                Arc::new(pool),
            )
            .unwrap(),
        )
    }

    fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn test_repeating_task_runs_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = RepeatingTask::start(
            "test-task",
            Duration::from_millis(5),
            Duration::from_millis(5),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        assert_eq!(task.name(), "test-task");

        assert!(wait_until(Duration::from_secs(5), || count.load(Ordering::SeqCst) >= 3));
        task.cancel();

        let after_cancel = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn test_repeating_task_waits_for_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = RepeatingTask::start(
            "delayed-task",
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        drop(task);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unrepresentable_delay_never_fires_and_still_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = RepeatingTask::start(
            "far-future-task",
            Duration::MAX,
            Duration::MAX,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert!(task.is_running());
        task.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_period_overflow_after_first_run_keeps_thread_alive() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = RepeatingTask::start(
            "overflowing-period",
            Duration::ZERO,
            Duration::MAX,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || count.load(Ordering::SeqCst) == 1));
        std::thread::sleep(Duration::from_millis(50));
        assert!(task.is_running());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        task.cancel();
    }

    #[test]
    fn test_huge_interval_is_scheduled_without_dying() {
        let root = TempDir::new().unwrap();
        let config = BackupConfig::builder()
            .auto_backup(
                AutoBackupConfig::builder()
                    .enabled(true)
                    .interval_hours(4e15)
                    .build(),
            )
            .build();
        let auto_backup = AutoBackup::new(coordinator(&root, config));

        assert!(auto_backup.reschedule().unwrap());
        std::thread::sleep(Duration::from_millis(50));
        assert!(auto_backup.is_task_running());
        auto_backup.cancel();
        assert!(!auto_backup.is_scheduled());
    }

    #[test]
    fn test_enabled_with_non_positive_interval_is_not_scheduled() {
        let root = TempDir::new().unwrap();
        for hours in [0.0, -1.0, f64::NAN] {
            let config = BackupConfig::builder()
                .auto_backup(
                    AutoBackupConfig::builder()
                        .enabled(true)
                        .interval_hours(hours)
                        .build(),
                )
                .build();
            let auto_backup = AutoBackup::new(coordinator(&root, config));

            assert!(!auto_backup.reschedule().unwrap(), "{hours}");
            assert!(!auto_backup.is_scheduled());
        }
    }

    #[test]
    fn test_disabled_auto_backup_is_not_scheduled() {
        let root = TempDir::new().unwrap();
        let auto_backup = AutoBackup::new(coordinator(&root, BackupConfig::default()));

        assert!(!auto_backup.reschedule().unwrap());
        assert!(!auto_backup.is_scheduled());
    }

    #[test]
    fn test_auto_backup_writes_archives() {
        let root = TempDir::new().unwrap();
        let config = BackupConfig::builder()
            .auto_backup(
                AutoBackupConfig::builder()
                    .enabled(true)
                    .interval_hours(0.05 / 3600.0)
                    .build(),
            )
            .build();
        let coordinator = coordinator(&root, config);
        let backup_dir = root.path().join("plugin").join("backups");
        let auto_backup = AutoBackup::new(coordinator.clone());

        assert!(auto_backup.reschedule().unwrap());
        assert!(auto_backup.is_scheduled());
        assert!(wait_until(Duration::from_secs(10), || {
            std::fs::read_dir(&backup_dir)
                .map(|d| d.filter_map(|e| e.ok()).any(|e| e.file_name().to_string_lossy().ends_with(".zip")))
                .unwrap_or(false)
        }));

        auto_backup.cancel();
        assert!(!auto_backup.is_scheduled());
        assert!(wait_until(Duration::from_secs(10), || !coordinator.is_running()));
    }

    #[test]
    fn test_reschedule_follows_reloaded_config() {
        let root = TempDir::new().unwrap();
        let enabled = BackupConfig::builder()
            .auto_backup(AutoBackupConfig::builder().enabled(true).build())
            .build();
        let coordinator = coordinator(&root, enabled);
        let auto_backup = AutoBackup::new(coordinator.clone());

        assert!(auto_backup.reschedule().unwrap());
        assert!(auto_backup.is_scheduled());

        coordinator.reload(BackupConfig::default()).unwrap();
        assert!(!auto_backup.reschedule().unwrap());
        assert!(!auto_backup.is_scheduled());
    }
}
