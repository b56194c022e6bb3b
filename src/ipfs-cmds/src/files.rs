//! File arguments.
//!
//! Paths given for File arguments are flattened into an ordered queue of
//! entries before the command runs: depth-first, lexicographic at each
//! directory level.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::emitter::BoxReader;
use crate::error::{CmdResult, RequestError};

/// Kind of a file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// Where an entry's bytes come from.
pub enum FileSource {
    /// A path on the local filesystem.
    Path(PathBuf),
    /// A stream provided by the transport (request body, stdin).
    Reader(BoxReader),
    /// Directories have no content.
    None,
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
            Self::None => f.write_str("None"),
        }
    }
}

/// One file or directory of a File argument.
#[derive(Debug)]
pub struct FileEntry {
    /// Slash separated name relative to the argument it came from.
    pub name: String,
    pub kind: FileKind,
    pub source: FileSource,
}

impl FileEntry {
    /// An entry backed by a stream.
    pub fn from_reader(name: impl Into<String>, reader: BoxReader) -> Self {
        Self {
            name: name.into(),
            kind: FileKind::File,
            source: FileSource::Reader(reader),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Open the entry's content.
    pub async fn open(self) -> CmdResult<BoxReader> {
        match self.source {
            FileSource::Path(path) => {
                let file = tokio::fs::File::open(&path).await?;
                Ok(Box::pin(file))
            }
            FileSource::Reader(reader) => Ok(reader),
            FileSource::None => Ok(Box::pin(tokio::io::empty())),
        }
    }
}

/// Ordered queue of file entries.
#[derive(Debug, Default)]
pub struct Files {
    entries: VecDeque<FileEntry>,
}

impl Files {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten `paths` into entries.
    ///
    /// Directories require `recursive`. Hidden entries (dot files) below a
    /// given root are skipped unless `hidden` is set; a root is always kept.
    pub fn collect(paths: &[String], recursive: bool, hidden: bool) -> Result<Self, RequestError> {
        let mut files = Self::new();
        for raw in paths {
            files.collect_one(raw, recursive, hidden)?;
        }
        Ok(files)
    }

    fn collect_one(&mut self, raw: &str, recursive: bool, hidden: bool) -> Result<(), RequestError> {
        let root = Path::new(raw);
        let metadata = std::fs::metadata(root).map_err(|e| RequestError::BadPath {
            path: raw.to_string(),
            reason: e.to_string(),
        })?;

        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| raw.to_string());

        if !metadata.is_dir() {
            self.entries.push_back(FileEntry {
                name: root_name,
                kind: FileKind::File,
                source: FileSource::Path(root.to_path_buf()),
            });
            return Ok(());
        }

        if !recursive {
            return Err(RequestError::BadPath {
                path: raw.to_string(),
                reason: "is a directory, use the recursive option".to_string(),
            });
        }

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| hidden || e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = entry.map_err(|e| RequestError::BadPath {
                path: raw.to_string(),
                reason: e.to_string(),
            })?;
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let mut name = root_name.clone();
            for component in relative.components() {
                name.push('/');
                name.push_str(&component.as_os_str().to_string_lossy());
            }
            let (kind, source) = if entry.file_type().is_dir() {
                (FileKind::Directory, FileSource::None)
            } else {
                (FileKind::File, FileSource::Path(entry.path().to_path_buf()))
            };
            self.entries.push_back(FileEntry { name, kind, source });
        }
        Ok(())
    }

    pub fn push(&mut self, entry: FileEntry) {
        self.entries.push_back(entry);
    }

    /// Take the next entry in order.
    pub fn next_entry(&mut self) -> Option<FileEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
