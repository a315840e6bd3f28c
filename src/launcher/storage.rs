//! Durable per-worker profile directories.
//!
//! With `persist_storage` on, every worker id owns `<storage_dir>/<id>` as its
//! browser profile. A browser that died without a clean shutdown leaves its
//! singleton lock behind, and Chrome refuses to start on a locked profile,
//! so the artifacts are removed before each launch.

use std::io;
use std::path::{Path, PathBuf};

use crate::launcher::WorkerId;

/// Files Chrome leaves in a profile directory while it is running.
pub const LOCK_ARTIFACTS: [&str; 3] = ["SingletonLock", "SingletonSocket", "SingletonCookie"];

/// Profile directory for `id` under `root`.
pub fn profile_dir(root: &Path, id: &WorkerId) -> PathBuf {
    root.join(id.to_string())
}

/// Create the profile directory for `id` and clear stale lock artifacts.
///
/// Returns the directory path.
pub fn prepare_profile_dir(root: &Path, id: &WorkerId) -> io::Result<PathBuf> {
    let dir = profile_dir(root, id);
    std::fs::create_dir_all(&dir)?;

    for name in LOCK_ARTIFACTS {
        let artifact = dir.join(name);
        // SingletonLock is a symlink that usually dangles, so `exists()` is not enough.
        if artifact.symlink_metadata().is_err() {
            continue;
        }
        match std::fs::remove_file(&artifact) {
            Ok(()) => log::info!("🧹 Removed stale {} from {}", name, dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("⚠️ Could not remove {}: {}", artifact.display(), e);
                return Err(e);
            }
        }
    }

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("render-pool-storage-{}", uuid::Uuid::new_v4()))
    }

    /// Verifies that the directory is created under the root, named after the id.
    #[test]
    fn test_prepare_creates_dir() {
        let root = temp_root();
        let dir = prepare_profile_dir(&root, &WorkerId::new(4)).unwrap();

        assert_eq!(dir, root.join("worker-4"));
        assert!(dir.is_dir());

        std::fs::remove_dir_all(&root).unwrap();
    }

    /// Verifies that leftover lock files are removed and other files are kept.
    #[test]
    fn test_prepare_removes_lock_artifacts() {
        let root = temp_root();
        let dir = profile_dir(&root, &WorkerId::new(0));
        std::fs::create_dir_all(&dir).unwrap();
        for name in LOCK_ARTIFACTS {
            std::fs::write(dir.join(name), b"stale").unwrap();
        }
        std::fs::write(dir.join("Preferences"), b"{}").unwrap();

        prepare_profile_dir(&root, &WorkerId::new(0)).unwrap();

        for name in LOCK_ARTIFACTS {
            assert!(!dir.join(name).exists(), "{} should be gone", name);
        }
        assert!(dir.join("Preferences").exists());

        std::fs::remove_dir_all(&root).unwrap();
    }

    /// Verifies that a dangling symlink lock is removed.
    #[cfg(unix)]
    #[test]
    fn test_prepare_removes_dangling_symlink() {
        let root = temp_root();
        let dir = profile_dir(&root, &WorkerId::new(1));
        std::fs::create_dir_all(&dir).unwrap();
        std::os::unix::fs::symlink("host-12345", dir.join("SingletonLock")).unwrap();

        prepare_profile_dir(&root, &WorkerId::new(1)).unwrap();

        assert!(dir.join("SingletonLock").symlink_metadata().is_err());

        std::fs::remove_dir_all(&root).unwrap();
    }
}
