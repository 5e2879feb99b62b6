//! Shared asset path resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

/// Cache mapping style-relative asset paths to their resolved location.
///
/// Styles reference icons, shields and fill images relative to their
/// stylesheet directory and every `finish` pass has to check that the files
/// exist. The cache performs that filesystem stat at most once per path, no
/// matter how many concurrent render jobs share the stylesheet.
#[derive(Default, Debug)]
pub struct AssetCache {
    resolved: RwLock<HashMap<String, Option<PathBuf>>>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a relative asset path against a base directory.
    ///
    /// Returns `None` for files that do not exist. Results, positive or
    /// negative, are remembered for the lifetime of the cache.
    pub fn resolve(&self, base: &Path, relative: &str) -> Option<PathBuf> {
        if let Some(resolved) = self.resolved.read().get(relative) {
            return resolved.clone();
        }

        // Stat under the write lock, so each path is checked exactly once.
        let mut resolved = self.resolved.write();
        resolved
            .entry(relative.to_owned())
            .or_insert_with(|| {
                let path = base.join(relative);
                path.exists().then_some(path)
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn resolves_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("icon.png"), b"png").unwrap();

        let cache = AssetCache::new();
        assert_eq!(cache.resolve(dir.path(), "icon.png"), Some(dir.path().join("icon.png")));
        assert_eq!(cache.resolve(dir.path(), "missing.png"), None);
    }

    #[test]
    fn results_are_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icon.png");
        fs::write(&path, b"png").unwrap();

        let cache = AssetCache::new();
        assert_eq!(cache.resolve(dir.path(), "icon.png"), Some(path.clone()));

        // The cached result survives the file itself.
        fs::remove_file(&path).unwrap();
        assert_eq!(cache.resolve(dir.path(), "icon.png"), Some(path));
    }
}
