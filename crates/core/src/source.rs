//! Source provider abstraction and the per-parse source table.
//!
//! The [`SourceProvider`] trait abstracts file I/O so the driver never touches
//! a filesystem directly. [`SourceSet`] owns every document text loaded during
//! one parse and hands out stable [`SourceId`] handles for [`DocRange`]s.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Trait that abstracts document lookup for the parse driver.
///
/// The default [`FileSystemProvider`] delegates to `std::fs`;
/// [`InMemoryProvider`] serves documents from a map for tests and embedding.
pub trait SourceProvider {
    /// Read the document text for a given path.
    fn read_source(&self, path: &Path) -> Result<String, std::io::Error>;

    /// Join a relative include path onto a base directory.
    fn resolve_import(&self, base: &Path, import: &str) -> Result<PathBuf, std::io::Error>;

    /// Canonicalize a path. Fails when the path does not name a document.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf, std::io::Error>;

    /// Directory used as the last entry of the include search order.
    fn working_dir(&self) -> PathBuf {
        PathBuf::new()
    }
}

/// Default filesystem-backed source provider.
pub struct FileSystemProvider;

impl SourceProvider for FileSystemProvider {
    fn read_source(&self, path: &Path) -> Result<String, std::io::Error> {
        std::fs::read_to_string(path)
    }

    fn resolve_import(&self, base: &Path, import: &str) -> Result<PathBuf, std::io::Error> {
        Ok(base.join(import))
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf, std::io::Error> {
        path.canonicalize()
    }

    fn working_dir(&self) -> PathBuf {
        std::env::current_dir().unwrap_or_default()
    }
}

/// In-memory source provider.
///
/// Maps paths to document text. Canonicalization normalizes the path without
/// requiring filesystem access.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProvider {
    files: HashMap<PathBuf, String>,
    cwd: PathBuf,
}

impl InMemoryProvider {
    pub fn new(files: HashMap<PathBuf, String>) -> Self {
        let files = files
            .into_iter()
            .map(|(path, text)| (Self::normalize_path(&path), text))
            .collect();
        Self {
            files,
            cwd: PathBuf::from("/"),
        }
    }

    /// Builder-style insertion, handy for tests.
    pub fn with_file(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.files
            .insert(Self::normalize_path(path.as_ref()), text.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Self::normalize_path(dir.as_ref());
        self
    }

    /// Normalize a path by resolving `.` and `..` components without
    /// touching the filesystem.
    fn normalize_path(path: &Path) -> PathBuf {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                std::path::Component::CurDir => {}
                std::path::Component::ParentDir => {
                    if !components.is_empty() {
                        components.pop();
                    }
                }
                other => components.push(other),
            }
        }
        components.iter().collect()
    }
}

impl SourceProvider for InMemoryProvider {
    fn read_source(&self, path: &Path) -> Result<String, std::io::Error> {
        let normalized = Self::normalize_path(path);
        self.files.get(&normalized).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found in memory: {}", normalized.display()),
            )
        })
    }

    fn resolve_import(&self, base: &Path, import: &str) -> Result<PathBuf, std::io::Error> {
        Ok(Self::normalize_path(&base.join(import)))
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf, std::io::Error> {
        let normalized = Self::normalize_path(path);
        if self.files.contains_key(&normalized) {
            Ok(normalized)
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "path not found in memory provider: {}",
                    normalized.display()
                ),
            ))
        }
    }

    fn working_dir(&self) -> PathBuf {
        self.cwd.clone()
    }
}

// ── Source table ─────────────────────────────────────────────────────

/// Stable handle of a document loaded during one parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceId(pub u32);

/// Byte range `[begin, end)` inside one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DocRange {
    pub source: SourceId,
    pub begin: usize,
    pub end: usize,
}

impl DocRange {
    pub fn new(source: SourceId, begin: usize, end: usize) -> Self {
        DocRange { source, begin, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    /// Smallest range covering both, when both lie in the same document.
    pub fn cover(&self, other: &DocRange) -> Option<DocRange> {
        if self.source != other.source {
            return None;
        }
        Some(DocRange::new(
            self.source,
            self.begin.min(other.begin),
            self.end.max(other.end),
        ))
    }
}

impl fmt::Display for DocRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}[{}..{})", self.source.0, self.begin, self.end)
    }
}

/// One loaded document.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: Arc<str>,
}

/// All documents loaded during one parse, addressed by [`SourceId`].
#[derive(Debug, Default, Clone)]
pub struct SourceSet {
    files: Vec<SourceFile>,
    by_path: HashMap<PathBuf, SourceId>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document. Re-adding a path returns the existing handle so
    /// repeated includes share one text buffer.
    pub fn add(&mut self, path: PathBuf, text: String) -> SourceId {
        if let Some(id) = self.by_path.get(&path) {
            return *id;
        }
        let id = SourceId(self.files.len() as u32);
        self.by_path.insert(path.clone(), id);
        self.files.push(SourceFile {
            path,
            text: Arc::from(text),
        });
        id
    }

    pub fn get(&self, id: SourceId) -> Option<&SourceFile> {
        self.files.get(id.0 as usize)
    }

    pub fn find(&self, path: &Path) -> Option<SourceId> {
        self.by_path.get(path).copied()
    }

    pub fn text(&self, id: SourceId) -> Arc<str> {
        self.get(id)
            .map(|f| f.text.clone())
            .unwrap_or_else(|| Arc::from(""))
    }

    /// The slice of text a range covers; empty when the range is stale.
    pub fn slice(&self, range: &DocRange) -> &str {
        self.get(range.source)
            .and_then(|f| f.text.get(range.begin..range.end))
            .unwrap_or("")
    }

    pub fn path(&self, id: SourceId) -> Option<&Path> {
        self.get(id).map(|f| f.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
