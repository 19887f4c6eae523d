use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;

use crate::error::{Error, Result};

/// Source of playable items, consulted on every start.
pub trait AssetSource: Send + Sync {
    fn pick_one(&self) -> Result<PathBuf>;
}

/// Directory of audio files filtered by extension.
///
/// The directory is enumerated on every call, so files added or removed while
/// the daemon runs are picked up without a restart.
#[derive(Clone, Debug)]
pub struct AssetCatalog {
    dir: PathBuf,
    extension: String,
    case_sensitive: bool,
}

impl AssetCatalog {
    pub fn new(dir: impl Into<PathBuf>, extension: &str, case_sensitive: bool) -> Self {
        let extension = extension.trim_start_matches('.');
        let extension = if case_sensitive {
            extension.to_string()
        } else {
            extension.to_lowercase()
        };
        Self {
            dir: dir.into(),
            extension,
            case_sensitive,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_eligible(&self, file_name: &str) -> bool {
        let suffix = format!(".{}", self.extension);
        if self.case_sensitive {
            file_name.ends_with(&suffix)
        } else {
            file_name.to_lowercase().ends_with(&suffix)
        }
    }

    /// Eligible items currently in the directory, sorted by path.
    ///
    /// A missing or unreadable directory yields an empty list.
    pub fn eligible(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("audio catalog {} unreadable: {}", self.dir.display(), e);
                return Vec::new();
            }
        };
        let mut items: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| self.is_eligible(name))
            })
            .map(|entry| entry.path())
            .collect();
        items.sort();
        items
    }
}

impl AssetSource for AssetCatalog {
    fn pick_one(&self) -> Result<PathBuf> {
        let items = self.eligible();
        items
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| Error::NoAssetsAvailable {
                dir: self.dir.clone(),
            })
    }
}
