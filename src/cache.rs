//! Working-directory reset.
//!
//! The root is renamed to a hidden sibling, an empty root is created in its
//! place, and only then is the renamed tree deleted. A failure before the
//! swap leaves the old tree where it was; a failure after it leaves an empty
//! root plus an orphaned sibling, never a half-deleted root.

use crate::error::{Result, RunError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheReset {
    /// The directory did not exist; nothing was touched.
    AlreadyEmpty,
    /// The directory now exists and is empty. `removed` counts top-level entries.
    Cleared { removed: usize },
}

fn tombstone_for(root: &Path) -> Result<PathBuf> {
    let name = root.file_name().ok_or_else(|| {
        RunError::Validation(format!("cannot reset {}: no directory name", root.display()))
    })?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let tombstone = format!(".{}.trash-{}-{}", name.to_string_lossy(), std::process::id(), stamp);
    Ok(root.with_file_name(tombstone))
}

/// Deletes everything under `root` and leaves an empty `root` behind.
///
/// Asking the user for confirmation is the caller's job.
pub async fn clear_working_dir(root: &Path) -> Result<CacheReset> {
    let metadata = match tokio::fs::metadata(root).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("Cache is already empty: {}", root.display());
            return Ok(CacheReset::AlreadyEmpty);
        }
        Err(e) => return Err(RunError::io(format!("inspecting {}", root.display()), e)),
    };
    if !metadata.is_dir() {
        return Err(RunError::Validation(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|e| RunError::io(format!("listing {}", root.display()), e))?;
    while entries
        .next_entry()
        .await
        .map_err(|e| RunError::io(format!("listing {}", root.display()), e))?
        .is_some()
    {
        removed += 1;
    }

    let tombstone = tombstone_for(root)?;
    tokio::fs::rename(root, &tombstone)
        .await
        .map_err(|e| RunError::io(format!("moving {} aside", root.display()), e))?;

    if let Err(e) = tokio::fs::create_dir_all(root).await {
        // Put the old tree back so the root is never missing.
        if let Err(restore) = tokio::fs::rename(&tombstone, root).await {
            warn!(
                "Could not restore {} from {}: {}",
                root.display(),
                tombstone.display(),
                restore
            );
        }
        return Err(RunError::io(format!("recreating {}", root.display()), e));
    }

    if let Err(e) = tokio::fs::remove_dir_all(&tombstone).await {
        warn!(
            "Cache cleared but old files remain at {}: {}",
            tombstone.display(),
            e
        );
    }

    info!("Cleared {} entries from {}", removed, root.display());
    Ok(CacheReset::Cleared { removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_dir_is_already_empty() {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().join("idea2video");

        let outcome = clear_working_dir(&root).await.unwrap();
        assert_eq!(outcome, CacheReset::AlreadyEmpty);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_clear_leaves_empty_root() {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().join("idea2video");
        std::fs::create_dir_all(root.join("scene_0")).unwrap();
        std::fs::write(root.join("x.txt"), b"x").unwrap();
        std::fs::write(root.join("y.json"), b"{}").unwrap();
        std::fs::write(root.join("scene_0").join("z.mp4"), b"z").unwrap();

        let outcome = clear_working_dir(&root).await.unwrap();
        assert_eq!(outcome, CacheReset::Cleared { removed: 3 });
        assert!(root.is_dir());
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);

        // No tombstone left next to the root.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_file_root_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().join("not_a_dir");
        std::fs::write(&root, b"data").unwrap();

        let err = clear_working_dir(&root).await.unwrap_err();
        assert!(matches!(err, RunError::Validation(_)));
        assert!(root.is_file());
    }
}
