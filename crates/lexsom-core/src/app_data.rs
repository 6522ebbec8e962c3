//! Where lexsom keeps its own files (engine config, exported snapshots).
//!
//! Corpora stay wherever the caller keeps them; we only write app state here.

use std::path::PathBuf;

/// Returns the directory where lexsom stores config and snapshots.
/// On Linux: `~/.local/share/lexsom/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "lexsom", "lexsom")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Default location for exported snapshots, `<app data>/snapshots`.
pub fn snapshot_dir() -> Option<PathBuf> {
    let dir = app_data_dir()?.join("snapshots");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_dir_lives_under_app_data() {
        let (Some(root), Some(snapshots)) = (app_data_dir(), snapshot_dir()) else {
            // Sandboxed CI without a home directory.
            return;
        };
        assert!(snapshots.starts_with(&root));
        assert!(snapshots.is_dir());
    }
}
