use clap::Parser;
use rayon::ThreadPoolBuilder;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::exit;
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use tracing::{error, info, warn};
use world_backup::backup::backup_config::BackupConfig;
use world_backup::backup::coordinator::{BackupCoordinator, Trigger};
use world_backup::backup::layout::ServerLayout;
use world_backup::backup::notifications::log::TracingNotification;
use world_backup::backup::result_error::error::Error;
use world_backup::backup::result_error::result::Result;
use world_backup::backup::result_error::AddMsg;
use world_backup::backup::scheduler::AutoBackup;

/// Back up a server world into zip archives, on demand or on a schedule
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file, defaults to `<data folder>/config.yml`
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name of the world directory under `<working root>/worlds`
    #[arg(short, long)]
    level_name: String,

    /// Server working directory
    #[arg(short, long, default_value = ".")]
    working_root: PathBuf,

    /// Directory for the config file and the default backup directory
    #[arg(short, long, default_value = "world_backup")]
    data_folder: PathBuf,

    /// Run one backup and exit
    #[arg(long)]
    now: bool,
}

enum Event {
    Backup,
    Reload,
    Shutdown,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match run(args) {
        Ok(code) => exit(code),
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}

fn run(args: Args) -> Result<i32> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.data_folder.join("config.yml"));
    let config = BackupConfig::load_or_create(&config_path)?;

    let layout = ServerLayout::builder()
        .working_root(args.working_root)
        .level_name(args.level_name)
        .data_folder(args.data_folder)
        .build();
    let thread_pool = ThreadPoolBuilder::new()
        .thread_name(|i| format!("world-backup-{i}"))
        .build()?;
    let coordinator = Arc::new(BackupCoordinator::new(
        layout,
        config,
        Arc::new(TracingNotification),
        Arc::new(thread_pool),
    )?);

    if args.now {
        let outcome = coordinator.trigger_now().wait();
        info!("Backup finished: {outcome:?}");
        return Ok(if outcome.is_success() { 0 } else { 1 });
    }

    let auto_backup = AutoBackup::new(coordinator.clone());
    auto_backup.reschedule()?;

    let (tx, rx) = channel();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Event::Shutdown);
    })
    .map_err(|e| Error::from(std::io::Error::other(e)))
    .add_msg("Installing Ctrl-C handler failed")?;
    spawn_stdin_reader(tx)?;

    info!("Type `backup` (or `wb`) to back up now, `reload` to reload {config_path:?}");
    for event in rx {
        match event {
            Event::Backup => {
                if let Trigger::AlreadyInProgress = coordinator.trigger_now() {
                    warn!("Backup request ignored, one is already running");
                }
            }
            Event::Reload => {
                let reloaded = BackupConfig::load_or_create(&config_path)
                    .and_then(|config| coordinator.reload(config))
                    .and_then(|_| auto_backup.reschedule());
                if let Err(e) = reloaded {
                    error!("Reloading config failed, keeping the previous one:\n{e}");
                }
            }
            Event::Shutdown => break,
        }
    }

    info!("Shutting down");
    auto_backup.cancel();
    while coordinator.is_running() {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    Ok(0)
}

fn spawn_stdin_reader(tx: Sender<Event>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-commands".to_owned())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let event = match line.trim() {
                    "" => continue,
                    "backup" | "wb" => Event::Backup,
                    "reload" => Event::Reload,
                    "stop" | "exit" => Event::Shutdown,
                    other => {
                        warn!("Unknown command {other:?}");
                        continue;
                    }
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        })
        .map_err(Error::from)
        .add_msg("Spawning stdin reader failed")?;
    Ok(())
}
