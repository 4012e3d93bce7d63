//! Filesystem helpers shared by the cleaner and the chunk runner.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Whether `path` lies under `ancestor`. With `strict`, a path equal to the
/// ancestor does not count.
pub fn is_ancestor(ancestor: &Path, path: &Path, strict: bool) -> bool {
    if strict && ancestor == path {
        return false;
    }
    path.starts_with(ancestor)
}

/// Whether `path` lies under any of `roots`.
pub fn is_under_any<'a>(roots: impl IntoIterator<Item = &'a PathBuf>, path: &Path) -> bool {
    roots.into_iter().any(|root| is_ancestor(root, path, false))
}

/// All regular files under `root`, depth-first. A missing root yields an
/// empty list.
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// Delete `path` recursively, recording every removed file in `deleted` and
/// collecting parent directories into `dirs_to_prune` (when given) for later
/// empty-directory pruning.
///
/// Returns `true` if anything was physically removed. A missing path is not
/// an error.
pub fn delete_recursively(
    path: &Path,
    deleted: &mut Vec<PathBuf>,
    mut dirs_to_prune: Option<&mut HashSet<PathBuf>>,
) -> std::io::Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    if metadata.is_dir() {
        // record the files the removal will take with it
        for file in files_under(path) {
            deleted.push(file);
        }
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
        deleted.push(path.to_path_buf());
    }

    if let Some(dirs) = dirs_to_prune.as_deref_mut() {
        if let Some(parent) = path.parent() {
            let _ = dirs.insert(parent.to_path_buf());
        }
    }
    Ok(true)
}

/// Remove every collected directory that ended up empty, then walk upward
/// pruning parents that became empty in turn. Failures are ignored: pruning
/// is best-effort cosmetics.
pub fn prune_empty_dirs(dirs: HashSet<PathBuf>) {
    for dir in dirs {
        let mut current = Some(dir);
        while let Some(candidate) = current {
            let empty = fs::read_dir(&candidate)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !empty || fs::remove_dir(&candidate).is_err() {
                break;
            }
            debug!(dir = %candidate.display(), "pruned empty directory");
            current = candidate.parent().map(Path::to_path_buf);
        }
    }
}

/// Immediate children of a directory. A missing directory yields an empty
/// list; a plain file yields itself (mirrors the cleaner's treatment of
/// file-shaped output roots).
pub fn children_of(path: &Path) -> Vec<PathBuf> {
    match fs::read_dir(path) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect(),
        Err(_) => {
            if path.is_file() {
                vec![path.to_path_buf()]
            } else {
                Vec::new()
            }
        }
    }
}

/// Millisecond mtime stamp of a file, if it exists.
pub fn mtime_stamp(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let stamp = modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_millis();
    u64::try_from(stamp).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn delete_recursively_records_all_files() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("out/a/b");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("one.txt"), "1").unwrap();
        fs::write(dir.path().join("out/two.txt"), "2").unwrap();

        let mut deleted = Vec::new();
        let mut dirs = HashSet::new();
        let removed =
            delete_recursively(&dir.path().join("out"), &mut deleted, Some(&mut dirs)).unwrap();

        assert!(removed);
        assert_eq!(deleted.len(), 2);
        assert!(!dir.path().join("out").exists());
        assert!(dirs.contains(dir.path()));
    }

    #[test]
    fn deleting_missing_path_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mut deleted = Vec::new();
        let removed =
            delete_recursively(&dir.path().join("absent"), &mut deleted, None).unwrap();
        assert!(!removed);
        assert!(deleted.is_empty());
    }

    #[test]
    fn prune_climbs_empty_parents() {
        let dir = TempDir::new().unwrap();
        let deep = dir.path().join("a/b/c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(dir.path().join("keep.txt"), "x").unwrap();

        prune_empty_dirs(HashSet::from([deep]));
        assert!(!dir.path().join("a").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn ancestor_checks() {
        let root = Path::new("/p/out");
        assert!(is_ancestor(root, Path::new("/p/out/classes"), true));
        assert!(!is_ancestor(root, Path::new("/p/out"), true));
        assert!(is_ancestor(root, Path::new("/p/out"), false));
        assert!(!is_ancestor(root, Path::new("/p/output"), false));
    }
}
