use crate::backup::backup_config::BackupConfig;
use crate::backup::validate::validate_level_name;
use bon::Builder;
use getset::Getters;
use std::path::PathBuf;
use validator::Validate;

/// Where the host keeps its worlds and plugin data.
#[derive(Clone, Debug, Builder, Getters, Validate, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct ServerLayout {
    /// Server working directory; `worlds/` lives directly below it.
    #[builder(into)]
    working_root: PathBuf,
    #[builder(into)]
    #[validate(custom(function = validate_level_name))]
    level_name: String,
    /// Directory holding this plugin's config and default backup directory.
    #[builder(into)]
    data_folder: PathBuf,
}

impl ServerLayout {
    pub fn world_dir(&self) -> PathBuf {
        self.working_root.join("worlds").join(&self.level_name)
    }

    /// Resolves the configured `backup-path`: absolute paths are used as is,
    /// relative ones are joined to the working root, unset falls back to
    /// `<data folder>/backups`.
    pub fn backup_dir(&self, config: &BackupConfig) -> PathBuf {
        match config.backup_path() {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.working_root.join(p),
            None => self.data_folder.join("backups"),
        }
    }
}
