use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::retention::RetentionConfig;
use bon::Builder;
use function_name::named;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

pub static CURRENT_CONFIG_VERSION: u32 = 1;
pub static DEFAULT_INTERVAL_HOURS: f64 = 1.0;
/// Host ticks per second, for hosts whose scheduler counts in ticks.
pub static TICKS_PER_SECOND: u64 = 20;

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_interval_hours() -> f64 {
    DEFAULT_INTERVAL_HOURS
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupConfig {
    #[serde(default = "default_config_version")]
    #[builder(default = CURRENT_CONFIG_VERSION)]
    config_version: u32,
    /// Where archives go. Relative paths are resolved against the server's
    /// working directory; unset means `<data folder>/backups`.
    #[builder(into)]
    backup_path: Option<PathBuf>,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    auto_backup: AutoBackupConfig,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    backup_management: RetentionConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Validate, Builder, CopyGetters, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
#[getset(get_copy = "pub")]
pub struct AutoBackupConfig {
    #[serde(default)]
    #[builder(default)]
    enabled: bool,
    /// Only checked when `enabled`; a non-positive value then means nothing
    /// gets scheduled, see [`AutoBackupConfig::interval`].
    #[serde(default = "default_interval_hours")]
    #[builder(default = DEFAULT_INTERVAL_HOURS)]
    interval_hours: f64,
}

impl Default for AutoBackupConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AutoBackupConfig {
    /// `None` unless the interval is a positive, finite number of hours.
    pub fn interval(&self) -> Option<Duration> {
        if !self.interval_hours.is_finite() || self.interval_hours <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(self.interval_hours * 3600.0)
            .ok()
            .filter(|d| !d.is_zero())
    }

    pub fn interval_ticks(&self) -> Option<u64> {
        self.interval()
            .map(|d| (d.as_secs_f64() * TICKS_PER_SECOND as f64) as u64)
    }
}

impl BackupConfig {
    /// Reads the YAML config at `path`, writing the defaults there first if
    /// the file does not exist yet.
    #[named]
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(
                "Configuration file not found. Creating a new one at: {:?}",
                path
            );
            let config = Self::default();
            config.save(path).add_fn_name(function_path!())?;
            return Ok(config);
        }

        let config = File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader::<_, BackupConfig>(f).map_err(Error::from))
            .add_msg(format!("Parse YAML config failed: {:?}", path))
            .add_fn_name(function_path!())?;

        if config.config_version != CURRENT_CONFIG_VERSION {
            tracing::warn!(
                "Configuration file version mismatch! Found version '{}', expected '{}'.",
                config.config_version,
                CURRENT_CONFIG_VERSION
            );
        }

        config
            .validate()
            .map_err(Error::from)
            .add_msg(format!("Config validation failed: {:?}", path))
            .add_fn_name(function_path!())?;

        Ok(config)
    }

    #[named]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        serde_yml::to_writer(&mut writer, self)
            .map_err(Error::from)
            .add_msg(format!("Writing config to {:?} failed", path))
            .add_fn_name(function_path!())?;
        writer.flush()?;
        Ok(())
    }
}
