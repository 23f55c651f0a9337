//! Status assembly: classifying an entry's text and property dimensions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::entries::{self, Entries, Entry, Schedule, THIS_DIR};
use super::error::{WcError, WcResult};
use super::paths;
use super::props;
use super::translate;
use crate::fs::NodeKind;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusKind {
    /// Not versioned, or the dimension does not apply.
    #[default]
    None,
    Normal,
    Modified,
    Added,
    Replaced,
    Deleted,
    Conflicted,
}

#[derive(Clone, Debug, Default)]
pub struct Status {
    pub text: StatusKind,
    pub props: StatusKind,
    pub entry: Option<Entry>,
}

/// Classify one entry. `entry` may be `None` for unversioned things.
fn assemble_status(path: &Path, entry: Option<Entry>) -> WcResult<Status> {
    let mut status = Status {
        text: StatusKind::None,
        props: StatusKind::None,
        entry: None,
    };
    let Some(entry) = entry else {
        return Ok(status);
    };

    // Does the entry have a property component at all?
    let (parent, name) = paths::split(path);
    let prop_path = if entry.kind == NodeKind::Dir && path.is_dir() {
        paths::dir_prop_path(path, false)
    } else {
        paths::prop_path(&parent, &name, false)
    };
    let prop_exists = prop_path.is_file();

    if entry.kind == NodeKind::File {
        status.text = StatusKind::Normal;
        if translate::text_modified(path)? {
            status.text = StatusKind::Modified;
        }
    } else {
        status.text = StatusKind::Normal;
    }
    if prop_exists {
        status.props = StatusKind::Normal;
        if props::props_modified(path)? {
            status.props = StatusKind::Modified;
        }
    }

    match entry.schedule {
        Schedule::Add => {
            status.text = StatusKind::Added;
            if prop_exists {
                status.props = StatusKind::Added;
            }
        }
        Schedule::Replace => {
            status.text = StatusKind::Replaced;
            if prop_exists {
                status.props = StatusKind::Replaced;
            }
        }
        Schedule::Delete => {
            status.text = StatusKind::Deleted;
            if prop_exists {
                status.props = StatusKind::Deleted;
            }
        }
        Schedule::Normal => {}
    }

    if entry.conflicted {
        // Conflicted only counts while the reject files are still there.
        let dir = if entry.kind == NodeKind::File {
            parent
        } else {
            path.to_path_buf()
        };
        if let Some(reject) = &entry.reject_file {
            if dir.join(reject).is_file() {
                status.text = StatusKind::Conflicted;
            }
        }
        if let Some(reject) = &entry.prop_reject_file {
            if dir.join(reject).is_file() {
                status.props = StatusKind::Conflicted;
            }
        }
    }

    status.entry = Some(entry);
    Ok(status)
}

/// The status of a single versioned path.
pub fn status(path: &Path) -> WcResult<Status> {
    assemble_status(path, entries::read_entry(path)?)
}

/// Fill `statuses` for `path` and, when it is a directory, its children,
/// descending further when `descend`.
pub fn statuses(
    statuses: &mut BTreeMap<PathBuf, Status>,
    path: &Path,
    descend: bool,
) -> WcResult<()> {
    if path.is_file() {
        let (parent, name) = paths::split(path);
        let entry = Entries::read(&parent)?
            .get(&name)
            .cloned()
            .ok_or_else(|| WcError::BadFilename(path.to_path_buf()))?;
        statuses.insert(path.to_path_buf(), assemble_status(path, Some(entry))?);
        return Ok(());
    }
    if !path.is_dir() {
        return Err(WcError::BadFilename(path.to_path_buf()));
    }

    let entries = Entries::read(path)?;
    for (name, entry) in entries.iter() {
        let full_path = if name == THIS_DIR {
            path.to_path_buf()
        } else {
            path.join(name)
        };

        if name == THIS_DIR {
            // Do not overwrite a this-dir record a parent recursion
            // already placed under this path.
            if !statuses.contains_key(&full_path) {
                let status = assemble_status(&full_path, Some(entry.clone()))?;
                statuses.insert(full_path, status);
            }
            continue;
        }

        match entry.kind {
            NodeKind::Dir if full_path.is_dir() => {
                // Directory entries are incomplete in the parent; their
                // own this-dir record is authoritative.
                let this_dir = entries::read_entry(&full_path)?;
                let status = assemble_status(&full_path, this_dir)?;
                statuses.insert(full_path.clone(), status);
                if descend {
                    self::statuses(statuses, &full_path, descend)?;
                }
            }
            _ => {
                let status = assemble_status(&full_path, Some(entry.clone()))?;
                statuses.insert(full_path, status);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    use super::super::entries::{ensure_wc, EntryFields};

    fn wc_with_file(schedule: Schedule) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        ensure_wc(temp.path(), "http://host/repo", 1).unwrap();
        let path = temp.path().join("f");
        fs::write(&path, "abc\n").unwrap();
        fs::write(paths::text_base_path(temp.path(), "f", false), "abc\n").unwrap();
        let mut entries = Entries::read(temp.path()).unwrap();
        let mut entry = Entry::new(NodeKind::File);
        entry.schedule = schedule;
        entry.revision = Some(1);
        entries.insert("f", entry);
        entries.write(temp.path()).unwrap();
        (temp, path)
    }

    #[test]
    fn clean_file_is_normal() {
        let (_temp, path) = wc_with_file(Schedule::Normal);
        let status = status(&path).unwrap();
        assert_eq!(status.text, StatusKind::Normal);
        assert_eq!(status.props, StatusKind::None);
    }

    #[test]
    fn edited_file_is_modified() {
        let (_temp, path) = wc_with_file(Schedule::Normal);
        fs::write(&path, "abc\nedited\n").unwrap();
        let status = status(&path).unwrap();
        assert_eq!(status.text, StatusKind::Modified);
    }

    #[test]
    fn schedule_overrides_both_dimensions() {
        let (temp, path) = wc_with_file(Schedule::Add);
        let status_without_props = status(&path).unwrap();
        assert_eq!(status_without_props.text, StatusKind::Added);
        // No property file: the prop dimension stays none.
        assert_eq!(status_without_props.props, StatusKind::None);

        let mut prop_map = props::PropMap::new();
        prop_map.insert("k".into(), "v".into());
        props::save_props(&paths::prop_path(temp.path(), "f", false), &prop_map).unwrap();
        let status_with_props = status(&path).unwrap();
        assert_eq!(status_with_props.props, StatusKind::Added);
    }

    #[test]
    fn conflict_requires_surviving_reject_file() {
        let (temp, path) = wc_with_file(Schedule::Normal);
        entries::modify_entry(
            temp.path(),
            "f",
            &EntryFields {
                conflicted: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        let mut entries_file = Entries::read(temp.path()).unwrap();
        let mut entry = entries_file.get("f").cloned().unwrap();
        entry.reject_file = Some("f.rej".into());
        entries_file.insert("f", entry);
        entries_file.write(temp.path()).unwrap();

        // Reject file gone: the conflict no longer shows.
        let cleared = status(&path).unwrap();
        assert_ne!(cleared.text, StatusKind::Conflicted);

        fs::write(temp.path().join("f.rej"), "@@ -1 +1 @@\n").unwrap();
        let conflicted = status(&path).unwrap();
        assert_eq!(conflicted.text, StatusKind::Conflicted);
    }

    #[test]
    fn recursion_does_not_duplicate_this_dir() {
        let temp = TempDir::new().unwrap();
        ensure_wc(temp.path(), "http://host/repo", 1).unwrap();
        let sub = temp.path().join("sub");
        fs::create_dir_all(&sub).unwrap();
        ensure_wc(&sub, "http://host/repo/sub", 1).unwrap();
        let mut entries_file = Entries::read(temp.path()).unwrap();
        entries_file.insert("sub", Entry::new(NodeKind::Dir));
        entries_file.write(temp.path()).unwrap();

        let mut map = BTreeMap::new();
        statuses(&mut map, temp.path(), true).unwrap();
        assert!(map.contains_key(temp.path()));
        assert!(map.contains_key(&sub));
        assert_eq!(map.len(), 2);
    }
}
