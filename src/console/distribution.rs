use std::path::{Component, Path};

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::communication::{FileContents, WireMessage};
use crate::error::ConsoleError;

use super::communication::ConsoleCommunication;

/// Reads every regular file below `directory`, in path order, with paths
/// relative to `directory` and `/` separated.
///
/// # Errors
///
/// Returns an error when the directory cannot be walked or a file cannot be
/// read.
pub fn collect_files(directory: &Path) -> Result<Vec<FileContents>, ConsoleError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(directory).sort_by_file_name() {
        let entry = entry.map_err(|err| ConsoleError::DistributionWalk {
            path: directory.display().to_string(),
            source: err,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(directory) else {
            continue;
        };
        let relative_path = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                Component::Prefix(_)
                | Component::RootDir
                | Component::CurDir
                | Component::ParentDir => None,
            })
            .collect::<Vec<_>>()
            .join("/");

        let contents =
            std::fs::read(entry.path()).map_err(|err| ConsoleError::DistributionRead {
                path: entry.path().display().to_string(),
                source: err,
            })?;
        debug!("Distributing {} ({} bytes)", relative_path, contents.len());
        files.push(FileContents {
            relative_path,
            contents_b64: B64.encode(contents),
        });
    }
    Ok(files)
}

impl ConsoleCommunication {
    /// Replaces every agent's file cache with the contents of `directory`.
    /// Returns the number of files sent.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::Closed`] after shutdown, or an error when
    /// `directory` cannot be read; nothing is sent in either case.
    pub fn distribute_files(&self, directory: &Path) -> Result<usize, ConsoleError> {
        if self.is_closed() {
            return Err(ConsoleError::Closed);
        }
        let files = collect_files(directory)?;
        let count = files.len();

        self.send(&WireMessage::ClearCache);
        for file in files {
            self.send(&WireMessage::DistributeFile(file));
        }
        info!("Distributed {} files from {}", count, directory.display());
        Ok(count)
    }
}
