//! # world_backup
//!
//! Backs up a game server's world directory into timestamped zip archives.
//!
//! ## Features
//!
//! - **Single-flight backups**: at most one backup runs at a time, a second request is turned away
//! - **Zip archives**: deflate-compressed, written to a temporary file and renamed into place
//! - **Progress reporting**: every 10% of files processed
//! - **Retention management**: keeps the newest `max-backups` archives
//! - **Automatic backups**: on a fixed interval in hours
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use world_backup::backup::backup_config::BackupConfig;
//! use world_backup::backup::coordinator::BackupCoordinator;
//! use world_backup::backup::layout::ServerLayout;
//! use world_backup::backup::notifications::log::TracingNotification;
//!
//! let config = BackupConfig::load_or_create("plugins/world_backup/config.yml")?;
//! let layout = ServerLayout::builder()
//!     .working_root(".")
//!     .level_name("Bedrock level")
//!     .data_folder("plugins/world_backup")
//!     .build();
//! let thread_pool = rayon::ThreadPoolBuilder::new().build()?;
//!
//! let coordinator = Arc::new(BackupCoordinator::new(
//!     layout,
//!     config,
//!     Arc::new(TracingNotification),
//!     Arc::new(thread_pool),
//! )?);
//! let outcome = coordinator.trigger_now().wait();
//! assert!(outcome.is_success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
