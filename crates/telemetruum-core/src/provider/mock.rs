//! In-memory filesystem for testing providers without a real host tree.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::fs::FileSystem;

/// In-memory filesystem for testing.
///
/// Files can be added and removed while a provider holds the filesystem, so
/// tests can simulate descriptors appearing or going away between ticks.
/// Parent directories exist implicitly.
#[derive(Debug, Default)]
pub struct MockFs {
    files: Mutex<HashMap<PathBuf, String>>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`MockFs::add_file`].
    pub fn with_file(self, path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        self.add_file(path, content);
        self
    }

    /// Adds or replaces a file with the given content.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.files().insert(path.as_ref().to_path_buf(), content.into());
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.files().remove(path.as_ref());
    }

    fn files(&self) -> MutexGuard<'_, HashMap<PathBuf, String>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files().get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No such file: {}", path.display()),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        let files = self.files();
        files.contains_key(path) || files.keys().any(|f| f.starts_with(path))
    }
}
