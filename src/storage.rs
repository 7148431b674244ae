use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// Storage root that every client path is resolved against.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Joins `relative` onto the root. Empty input resolves to the root,
    /// leading separators and `.` segments are dropped, `..` is refused.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir | Component::RootDir => continue,
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }

        if normalized.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(normalized))
    }

    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }

    pub async fn stat(&self, path: &Path) -> Result<Metadata, StorageError> {
        Ok(fs::metadata(path).await?)
    }

    /// Immediate children of `path`, in the order the filesystem yields them.
    pub async fn list_dir(&self, path: &Path) -> Result<Vec<DirectoryEntry>, StorageError> {
        let mut dir = fs::read_dir(path).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: metadata.is_dir(),
                date: metadata.modified().map(format_timestamp).unwrap_or_default(),
            });
        }

        Ok(entries)
    }

    pub async fn remove_all(&self, path: &Path) -> Result<(), StorageError> {
        let metadata = fs::symlink_metadata(path).await?;
        if metadata.is_dir() {
            fs::remove_dir_all(path).await?;
        } else {
            fs::remove_file(path).await?;
        }
        Ok(())
    }
}

fn format_timestamp(timestamp: SystemTime) -> String {
    let datetime: DateTime<Local> = timestamp.into();
    datetime.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Io(err) if err.kind() == io::ErrorKind::NotFound)
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::InvalidPath => f.write_str("path escapes the storage root"),
            StorageError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Serialize, Debug)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
    pub date: String,
}
