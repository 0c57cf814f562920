use crate::backup::archive::{ArchiveEntry, ArchiveEntryIterable};
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use bon::Builder;
use function_name::named;
use getset::Getters;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

use std::path::{Path, PathBuf};

/// Files under a world directory, selected by glob patterns.
///
/// Walks `src_dir` recursively in file name order and yields every regular
/// file whose path relative to `src_dir` matches one of `globs`. The relative
/// path becomes the entry name, so the archive mirrors the directory layout.
#[derive(Clone, Debug, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct WalkdirAndGlobsetSource {
    #[builder(into)]
    src_dir: PathBuf,
    #[builder(default = default_globs(), into)]
    globs: Vec<String>,
}

fn default_globs() -> Vec<String> {
    vec!["**/*".to_owned()]
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    if patterns.is_empty() {
        builder.add(GlobBuilder::new("**/*").literal_separator(true).build()?);
    }
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(Error::from)
            .add_msg(format!("Invalid glob pattern {pattern:?}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

impl ArchiveEntryIterable for WalkdirAndGlobsetSource {
    fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    #[named]
    fn archive_entry_iterator(
        &self,
    ) -> Result<Box<dyn Iterator<Item = Result<ArchiveEntry>> + Send>> {
        if !self.src_dir.is_dir() {
            tracing::error!(
                "Source directory does not exist or is not a directory: {:?}",
                self.src_dir
            );
            return Err(Error::source_not_found(self.src_dir.clone()));
        }

        tracing::debug!(
            "Scanning directory {:?} with glob patterns {:?}",
            self.src_dir,
            self.globs
        );

        let globset = build_globset(&self.globs).add_fn_name(function_path!())?;
        let src_dir = self.src_dir.clone();

        let entries = WalkDir::new(&self.src_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |res| match res {
                Ok(de) => process_dir_entry(de, &src_dir, &globset),
                Err(e) => Some(Err(e.into())),
            })
            .map(move |res| res.add_fn_name(function_path!()));

        Ok(Box::new(entries))
    }
}

fn process_dir_entry<P: AsRef<Path>>(
    de: DirEntry,
    base_src_dir: P,
    globset: &GlobSet,
) -> Option<Result<ArchiveEntry>> {
    if !de.file_type().is_file() {
        tracing::trace!("Skipping {:?} not a file", de.path());
        return None;
    }

    let p = de.into_path();
    let res = match p.strip_prefix(base_src_dir.as_ref()) {
        Ok(stripped_path) => {
            if globset.is_match(stripped_path) {
                Ok(stripped_path.to_path_buf())
            } else {
                tracing::trace!("Skipping {:?}, glob not match", p);
                return None;
            }
        }
        Err(e) => Err(Error::from(e).add_msg(format!(
            "Stripping {:?} from {:?} failed",
            base_src_dir.as_ref(),
            p
        ))),
    };

    Some(res.map(|dst| {
        let entry = ArchiveEntry::new(p, dst);
        tracing::trace!("Including file: {:?} -> {:?}", entry.src, entry.dst);
        entry
    }))
}
