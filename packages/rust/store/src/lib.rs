//! YAML document store rooted at an explicit base directory.
//!
//! The [`DocumentStore`] reads template and rule documents and writes the
//! generated bucket and config documents. All relative paths resolve against
//! the store root, never the process working directory.
//!
//! Writes go to a hidden temp file next to the target and are then renamed
//! into place, so a reader never observes a half-written document.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use clashbuilder_shared::{ClashBuilderError, Result, value_kind};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, instrument};

/// Why a document could not be loaded.
///
/// Callers translate this into the error kind matching the document's role
/// (template vs. user fragment).
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("file not found")]
    NotFound,

    #[error("read failed: {0}")]
    Read(std::io::Error),

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("expected a mapping at the top level, found {0}")]
    NotAMapping(&'static str),
}

/// Primary store handle.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The base directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` against the root. Absolute paths are returned as-is.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    /// Load a document and parse it as a YAML value.
    pub fn load_value(&self, path: impl AsRef<Path>) -> std::result::Result<Value, DocumentError> {
        let full = self.resolve(path);
        let content = std::fs::read_to_string(&full).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DocumentError::NotFound,
            _ => DocumentError::Read(e),
        })?;
        let value = serde_yaml::from_str(&content)?;
        debug!(path = %full.display(), "loaded document");
        Ok(value)
    }

    /// Load a document whose top level must be a mapping.
    pub fn load_mapping(
        &self,
        path: impl AsRef<Path>,
    ) -> std::result::Result<Mapping, DocumentError> {
        match self.load_value(path)? {
            Value::Mapping(mapping) => Ok(mapping),
            other => Err(DocumentError::NotAMapping(value_kind(&other))),
        }
    }

    /// List regular files below `dir`, as `/`-separated paths relative to
    /// `dir`, sorted lexicographically. A missing directory lists as empty.
    pub fn list_files(&self, dir: impl AsRef<Path>) -> Result<Vec<String>> {
        let base = self.resolve(dir);
        if !base.is_dir() {
            debug!(dir = %base.display(), "directory not found, nothing to list");
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        collect_files(&base, "", &mut files)?;
        files.sort();
        Ok(files)
    }

    /// Serialize `data` as YAML and write it to `path` (relative to the root).
    ///
    /// Parent directories are created as needed and an existing file is
    /// replaced. Returns the resolved path.
    pub fn write_document<T: Serialize>(&self, path: impl AsRef<Path>, data: &T) -> Result<PathBuf> {
        let yaml = serde_yaml::to_string(data).map_err(|e| {
            ClashBuilderError::persist(self.resolve(&path), format!("YAML serialization failed: {e}"))
        })?;
        self.write_text(path, &yaml)
    }

    /// Write already-rendered text to `path` (relative to the root).
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn write_text(&self, path: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
        let target = self.resolve(path);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ClashBuilderError::persist(parent, e))?;
        }

        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClashBuilderError::persist(&target, "path has no file name"))?;
        let temp = target.with_file_name(format!(".{file_name}.tmp"));

        // Write to temp file first
        std::fs::write(&temp, content.as_bytes()).map_err(|e| ClashBuilderError::persist(&temp, e))?;

        // Atomic rename
        if let Err(e) = std::fs::rename(&temp, &target) {
            let _ = std::fs::remove_file(&temp);
            return Err(ClashBuilderError::persist(&target, e));
        }

        debug!(path = %target.display(), bytes = content.len(), "wrote document");
        Ok(target)
    }
}

/// Recursively collect regular files under `dir`.
///
/// Symlinks to files are listed; symlinks to directories are not descended.
fn collect_files(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| ClashBuilderError::io(dir, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| ClashBuilderError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };

        // file_type() does not follow symlinks
        let file_type = entry.file_type().map_err(|e| ClashBuilderError::io(entry.path(), e))?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_files(&path, &relative, out)?;
        } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
            out.push(relative);
        } else if file_type.is_symlink() {
            debug!(path = %path.display(), "skipping symlinked directory");
        }
    }
    Ok(())
}
