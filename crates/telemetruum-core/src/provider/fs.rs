//! Filesystem access for host identity and descriptor files.
//!
//! Providers read everything below the configured root through [`FileSystem`]
//! so tests can swap the host tree for an in-memory one
//! ([`MockFs`](super::mock::MockFs)).

use std::io;
use std::path::Path;

/// Read-only view of the host tree.
pub trait FileSystem: Send + Sync {
    /// Whole file as UTF-8 text.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn exists(&self, path: &Path) -> bool;
}

/// The host filesystem, through `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_fs_reads_machine_id() {
        let dir = tempfile::tempdir().unwrap();
        let etc = dir.path().join("etc");
        std::fs::create_dir_all(&etc).unwrap();
        std::fs::write(etc.join("machine-id"), "abc123\n").unwrap();

        let fs = RealFs::new();
        assert!(fs.exists(&etc.join("machine-id")));
        assert_eq!(
            fs.read_to_string(&etc.join("machine-id")).unwrap(),
            "abc123\n"
        );
    }

    #[test]
    fn test_real_fs_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("etc/machine-location");

        let fs = RealFs::new();
        assert!(!fs.exists(&missing));
        let err = fs.read_to_string(&missing).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
