//! Anchor/target selection: where an editor roots and what it acts on.
//!
//! Updating a file (or a directory that might change kind) requires
//! rooting the editor at the parent so the target can be replaced. A
//! working-copy root cannot be split that way: its parent is either not
//! versioned at all or belongs to a different repository location.

use std::path::{Path, PathBuf};

use super::entries;
use super::error::{WcError, WcResult};
use super::paths;

/// True iff `path` is a working-copy root: it has no versioned parent,
/// or its parent's URL plus its basename is not its own recorded URL.
pub fn is_wc_root(path: &Path) -> WcResult<bool> {
    let entry = entries::read_entry(path)?
        .ok_or_else(|| WcError::EntryNotFound(path.to_path_buf()))?;

    // With no parent to examine, this is a root by definition.
    if path.parent().map(|p| p.as_os_str().is_empty()).unwrap_or(true) {
        return Ok(true);
    }

    let (parent, name) = paths::split(path);
    let parent_entry = match entries::read_entry(&parent) {
        Ok(Some(parent_entry)) => parent_entry,
        Ok(None) | Err(WcError::NotDirectory(_)) => return Ok(true),
        Err(err) => return Err(err),
    };

    let Some(parent_url) = parent_entry.url else {
        return Err(WcError::EntryMissingUrl(parent));
    };

    if let Some(url) = &entry.url {
        if paths::url_join(&parent_url, &name) != *url {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Split `path` into the anchor an editor roots at and the target inside
/// it. A working-copy root is its own anchor with no target.
pub fn actual_target(path: &Path) -> WcResult<(PathBuf, Option<String>)> {
    if is_wc_root(path)? {
        return Ok((path.to_path_buf(), None));
    }
    let (anchor, name) = paths::split(path);
    Ok((anchor, Some(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use super::super::entries::{ensure_wc, Entries, Entry};
    use crate::fs::NodeKind;

    fn child_dir(parent: &Path, name: &str, url: &str) -> PathBuf {
        let path = parent.join(name);
        std::fs::create_dir_all(&path).unwrap();
        ensure_wc(&path, url, 1).unwrap();
        let mut entries = Entries::read(parent).unwrap();
        let mut entry = Entry::new(NodeKind::Dir);
        entry.url = Some(url.to_string());
        entries.insert(name, entry);
        entries.write(parent).unwrap();
        path
    }

    #[test]
    fn unversioned_parent_makes_a_root() {
        let temp = TempDir::new().unwrap();
        let wc = temp.path().join("wc");
        std::fs::create_dir_all(&wc).unwrap();
        ensure_wc(&wc, "http://host/repo", 1).unwrap();
        assert!(is_wc_root(&wc).unwrap());

        let (anchor, target) = actual_target(&wc).unwrap();
        assert_eq!(anchor, wc);
        assert!(target.is_none());
    }

    #[test]
    fn repository_child_is_not_a_root() {
        let temp = TempDir::new().unwrap();
        let wc = temp.path().join("wc");
        std::fs::create_dir_all(&wc).unwrap();
        ensure_wc(&wc, "http://host/repo", 1).unwrap();
        let sub = child_dir(&wc, "sub", "http://host/repo/sub");

        assert!(!is_wc_root(&sub).unwrap());
        let (anchor, target) = actual_target(&sub).unwrap();
        assert_eq!(anchor, wc);
        assert_eq!(target.as_deref(), Some("sub"));
    }

    #[test]
    fn disjoint_child_is_a_root() {
        let temp = TempDir::new().unwrap();
        let wc = temp.path().join("wc");
        std::fs::create_dir_all(&wc).unwrap();
        ensure_wc(&wc, "http://host/repo", 1).unwrap();
        // The child claims a URL that is not parent/sub.
        let sub = child_dir(&wc, "sub", "http://elsewhere/other");

        assert!(is_wc_root(&sub).unwrap());
    }

    #[test]
    fn unversioned_path_errors() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            is_wc_root(&temp.path().join("nothing")),
            Err(WcError::EntryNotFound(_))
        ));
    }

    #[test]
    fn file_targets_split_into_parent_and_basename() {
        let temp = TempDir::new().unwrap();
        let wc = temp.path().join("wc");
        std::fs::create_dir_all(&wc).unwrap();
        ensure_wc(&wc, "http://host/repo", 1).unwrap();
        let mut entries = Entries::read(&wc).unwrap();
        let mut entry = Entry::new(NodeKind::File);
        entry.url = Some("http://host/repo/f".into());
        entries.insert("f", entry);
        entries.write(&wc).unwrap();
        std::fs::write(wc.join("f"), "x").unwrap();

        let (anchor, target) = actual_target(&wc.join("f")).unwrap();
        assert_eq!(anchor, wc);
        assert_eq!(target.as_deref(), Some("f"));
    }
}
