//! Agent side cache of distributed files.
//!
//! Files arrive in `incoming/`. Worker processes only ever see `current/`,
//! which is brought up to date from `incoming/` when the directory is
//! requested: a full copy after every cache clear, incremental copies after
//! that.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::communication::{FileContents, MessageHandler, WireMessage};
use crate::error::{AppResult, FileStoreError};

pub const README_FILE: &str = "README.txt";
const INCOMING_DIRECTORY: &str = "incoming";
const CURRENT_DIRECTORY: &str = "current";

const README_TEXT: &str = "\
This directory is managed by the stampede agent.

incoming/  files distributed by the console, as they arrive
current/   the copy handed to worker processes

Anything placed here by hand may be deleted without warning.
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub mode: SyncMode,
    pub copied: usize,
    pub skipped: usize,
    pub removed: usize,
}

#[derive(Debug)]
struct StoreState {
    incremental: bool,
}

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    incoming: PathBuf,
    current: PathBuf,
    state: Mutex<StoreState>,
}

impl FileStore {
    /// Opens (without yet creating) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root`, or one of its cache directories, exists
    /// but is not a directory, or if `root` is not writable.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FileStoreError> {
        let root = std::path::absolute(root.as_ref()).map_err(|err| FileStoreError::Io {
            action: "resolve",
            path: root.as_ref().to_path_buf(),
            source: err,
        })?;

        if root.exists() {
            if !root.is_dir() {
                return Err(FileStoreError::NotADirectory { path: root });
            }
            if !accepts_new_files(&root) {
                return Err(FileStoreError::NotWritable { path: root });
            }
        }

        let incoming = root.join(INCOMING_DIRECTORY);
        let current = root.join(CURRENT_DIRECTORY);
        for directory in [&incoming, &current] {
            if directory.exists() && !directory.is_dir() {
                return Err(FileStoreError::NotADirectory {
                    path: directory.clone(),
                });
            }
        }

        Ok(Self {
            root,
            incoming,
            current,
            state: Mutex::new(StoreState { incremental: false }),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn incoming_directory(&self) -> &Path {
        &self.incoming
    }

    /// Deletes everything received so far. The next sync is a full copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the incoming directory cannot be emptied.
    pub fn clear_cache(&self) -> Result<(), FileStoreError> {
        let mut state = self.lock()?;
        delete_contents(&self.incoming)?;
        state.incremental = false;
        Ok(())
    }

    /// Writes one distributed file below `incoming/`.
    ///
    /// # Errors
    ///
    /// Returns an error for absolute or escaping paths, undecodable
    /// contents, or a failed write.
    pub fn store_file(&self, contents: &FileContents) -> Result<PathBuf, FileStoreError> {
        let relative = validate_relative_path(&contents.relative_path)?;
        let bytes = B64
            .decode(contents.contents_b64.as_bytes())
            .map_err(|err| FileStoreError::InvalidContents {
                path: contents.relative_path.clone(),
                source: err,
            })?;

        let _state = self.lock()?;
        create_directory(&self.incoming)?;
        self.create_readme()?;

        let target = self.incoming.join(relative);
        if let Some(parent) = target.parent() {
            create_directory(parent)?;
        }
        fs::write(&target, &bytes).map_err(|err| FileStoreError::Io {
            action: "write",
            path: target.clone(),
            source: err,
        })?;
        debug!("Stored {} ({} bytes)", target.display(), bytes.len());
        Ok(target)
    }

    /// Brings `current/` up to date with `incoming/`.
    ///
    /// # Errors
    ///
    /// Returns an error if either directory cannot be read or written.
    pub fn sync(&self) -> Result<SyncOutcome, FileStoreError> {
        let mut state = self.lock()?;
        let mode = if state.incremental {
            SyncMode::Incremental
        } else {
            SyncMode::Full
        };

        let outcome = if self.incoming.exists() {
            copy_directory(&self.incoming, &self.current, mode)?
        } else {
            SyncOutcome {
                mode,
                copied: 0,
                skipped: 0,
                removed: 0,
            }
        };
        state.incremental = true;

        debug!(
            "File store sync ({:?}): {} copied, {} unchanged, {} removed",
            outcome.mode, outcome.copied, outcome.skipped, outcome.removed
        );
        Ok(outcome)
    }

    /// Syncs and returns the directory workers should run from.
    ///
    /// # Errors
    ///
    /// Returns an error when the sync fails.
    pub fn directory(&self) -> Result<PathBuf, FileStoreError> {
        self.sync()?;
        Ok(self.current.clone())
    }

    /// Handler consuming `ClearCache` and `DistributeFile`.
    #[must_use]
    pub fn message_handler(self: &Arc<Self>) -> FileStoreMessageHandler {
        FileStoreMessageHandler {
            store: Arc::clone(self),
        }
    }

    fn create_readme(&self) -> Result<(), FileStoreError> {
        let readme = self.root.join(README_FILE);
        if readme.exists() {
            return Ok(());
        }
        fs::write(&readme, README_TEXT).map_err(|err| FileStoreError::Io {
            action: "write",
            path: readme,
            source: err,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, FileStoreError> {
        self.state.lock().map_err(|_err| FileStoreError::LockPoisoned)
    }
}

pub struct FileStoreMessageHandler {
    store: Arc<FileStore>,
}

impl MessageHandler for FileStoreMessageHandler {
    fn process(&self, message: &WireMessage) -> AppResult<bool> {
        match message {
            WireMessage::ClearCache => {
                info!("Clearing file store");
                self.store.clear_cache().map_err(|err| {
                    error!("{}", err);
                    err
                })?;
                Ok(true)
            }
            WireMessage::DistributeFile(contents) => {
                info!("Updating file store: {}", contents.relative_path);
                self.store.store_file(contents).map_err(|err| {
                    error!("{}", err);
                    err
                })?;
                Ok(true)
            }
            WireMessage::InitialiseWorker(_)
            | WireMessage::Reset
            | WireMessage::Start(_)
            | WireMessage::Stop
            | WireMessage::AgentStatusReport(_)
            | WireMessage::WorkerStatusReport(_) => Ok(false),
        }
    }
}

fn validate_relative_path(path: &str) -> Result<PathBuf, FileStoreError> {
    let mut clean = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FileStoreError::InvalidRelativePath {
                    path: path.to_owned(),
                });
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(FileStoreError::InvalidRelativePath {
            path: path.to_owned(),
        });
    }
    Ok(clean)
}

/// Creates and removes a scratch file; permission bits alone do not say
/// whether this process may write (ACLs, root, read-only mounts).
fn accepts_new_files(directory: &Path) -> bool {
    let scratch = directory.join(format!(".stampede-write-check-{}", std::process::id()));
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&scratch)
    {
        Ok(file) => {
            drop(file);
            if let Err(err) = fs::remove_file(&scratch) {
                debug!("Could not remove '{}': {}", scratch.display(), err);
            }
            true
        }
        Err(err) => {
            debug!("'{}' is not writable: {}", directory.display(), err);
            false
        }
    }
}

fn create_directory(path: &Path) -> Result<(), FileStoreError> {
    fs::create_dir_all(path).map_err(|err| FileStoreError::Io {
        action: "create directory",
        path: path.to_path_buf(),
        source: err,
    })
}

fn delete_contents(directory: &Path) -> Result<(), FileStoreError> {
    if !directory.exists() {
        return Ok(());
    }
    let entries = fs::read_dir(directory).map_err(|err| FileStoreError::Io {
        action: "list",
        path: directory.to_path_buf(),
        source: err,
    })?;
    for entry in entries {
        let path = entry
            .map_err(|err| FileStoreError::Io {
                action: "list",
                path: directory.to_path_buf(),
                source: err,
            })?
            .path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|err| FileStoreError::Io {
            action: "delete",
            path: path.clone(),
            source: err,
        })?;
    }
    Ok(())
}

fn copy_directory(
    source: &Path,
    target: &Path,
    mode: SyncMode,
) -> Result<SyncOutcome, FileStoreError> {
    if mode == SyncMode::Full {
        delete_contents(target)?;
    }
    create_directory(target)?;

    let mut outcome = SyncOutcome {
        mode,
        copied: 0,
        skipped: 0,
        removed: 0,
    };

    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|err| FileStoreError::Walk {
            path: source.to_path_buf(),
            source: err,
        })?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let destination = target.join(relative);

        if entry.file_type().is_dir() {
            create_directory(&destination)?;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        if mode == SyncMode::Incremental && unchanged(entry.path(), &destination)? {
            outcome.skipped = outcome.skipped.saturating_add(1);
            continue;
        }
        copy_file(entry.path(), &destination)?;
        outcome.copied = outcome.copied.saturating_add(1);
    }

    if mode == SyncMode::Incremental {
        outcome.removed = remove_stale(source, target)?;
    }
    Ok(outcome)
}

fn unchanged(source: &Path, destination: &Path) -> Result<bool, FileStoreError> {
    let Ok(existing) = fs::metadata(destination) else {
        return Ok(false);
    };
    let (length, modified) = file_stamp(source)?;
    Ok(existing.is_file() && existing.len() == length && existing.modified().ok() == Some(modified))
}

fn file_stamp(path: &Path) -> Result<(u64, SystemTime), FileStoreError> {
    let metadata = fs::metadata(path).map_err(|err| FileStoreError::Io {
        action: "inspect",
        path: path.to_path_buf(),
        source: err,
    })?;
    let modified = metadata.modified().map_err(|err| FileStoreError::Io {
        action: "inspect",
        path: path.to_path_buf(),
        source: err,
    })?;
    Ok((metadata.len(), modified))
}

fn copy_file(source: &Path, destination: &Path) -> Result<(), FileStoreError> {
    if let Some(parent) = destination.parent() {
        create_directory(parent)?;
    }
    fs::copy(source, destination).map_err(|err| FileStoreError::Io {
        action: "copy",
        path: source.to_path_buf(),
        source: err,
    })?;

    let (_, modified) = file_stamp(source)?;
    fs::File::options()
        .write(true)
        .open(destination)
        .and_then(|file| file.set_modified(modified))
        .map_err(|err| FileStoreError::Io {
            action: "stamp",
            path: destination.to_path_buf(),
            source: err,
        })
}

fn remove_stale(source: &Path, target: &Path) -> Result<usize, FileStoreError> {
    let mut removed = 0_usize;
    for entry in WalkDir::new(target).min_depth(1).contents_first(true) {
        let entry = entry.map_err(|err| FileStoreError::Walk {
            path: target.to_path_buf(),
            source: err,
        })?;
        let Ok(relative) = entry.path().strip_prefix(target) else {
            continue;
        };
        if source.join(relative).exists() {
            continue;
        }

        let result = if entry.file_type().is_dir() {
            fs::remove_dir_all(entry.path())
        } else {
            fs::remove_file(entry.path())
        };
        result.map_err(|err| FileStoreError::Io {
            action: "delete",
            path: entry.path().to_path_buf(),
            source: err,
        })?;
        if !entry.file_type().is_dir() {
            removed = removed.saturating_add(1);
        }
    }
    Ok(removed)
}
