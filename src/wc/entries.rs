//! The entries file: per-name records of a directory's versioned children.
//!
//! Each versioned directory serializes its entry records to
//! `.strata/entries.json`, keyed by basename, with the directory's own
//! record under the distinguished empty-string key. Updates go through
//! [`EntryFields`], a merge-update where only the populated fields touch
//! the stored record.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::fs::NodeKind;

use super::error::{WcError, WcResult};
use super::paths;

/// Key of the directory's own entry.
pub const THIS_DIR: &str = "";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    #[default]
    Normal,
    Add,
    Delete,
    Replace,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: NodeKind,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_time: Option<u64>,
    #[serde(default)]
    pub conflicted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_reject_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_author: Option<String>,
}

impl Entry {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            schedule: Schedule::Normal,
            revision: None,
            url: None,
            text_time: None,
            prop_time: None,
            conflicted: false,
            reject_file: None,
            prop_reject_file: None,
            committed_rev: None,
            committed_date: None,
            last_author: None,
        }
    }
}

/// A merge-update: only populated fields are written to the entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_reject_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_author: Option<String>,
}

impl EntryFields {
    pub fn apply(&self, entry: &mut Entry) {
        if let Some(kind) = self.kind {
            entry.kind = kind;
        }
        if let Some(schedule) = self.schedule {
            entry.schedule = schedule;
        }
        if let Some(revision) = self.revision {
            entry.revision = Some(revision);
        }
        if let Some(url) = &self.url {
            entry.url = Some(url.clone());
        }
        if let Some(text_time) = self.text_time {
            entry.text_time = Some(text_time);
        }
        if let Some(prop_time) = self.prop_time {
            entry.prop_time = Some(prop_time);
        }
        if let Some(conflicted) = self.conflicted {
            entry.conflicted = conflicted;
        }
        if let Some(prop_reject_file) = &self.prop_reject_file {
            entry.prop_reject_file = Some(prop_reject_file.clone());
        }
        if let Some(committed_rev) = &self.committed_rev {
            entry.committed_rev = Some(committed_rev.clone());
        }
        if let Some(committed_date) = &self.committed_date {
            entry.committed_date = Some(committed_date.clone());
        }
        if let Some(last_author) = &self.last_author {
            entry.last_author = Some(last_author.clone());
        }
    }
}

/// In-memory image of one directory's entries file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entries {
    map: BTreeMap<String, Entry>,
}

impl Entries {
    pub fn read(dir: &Path) -> WcResult<Entries> {
        let path = paths::entries_path(dir);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(WcError::NotDirectory(dir.to_path_buf()));
            }
            Err(err) => return Err(WcError::Io(err)),
        };
        let map = serde_json::from_slice(&bytes).map_err(|source| WcError::CorruptMetadata {
            path,
            source,
        })?;
        Ok(Entries { map })
    }

    /// Serialize atomically: write to a staging file, then rename over the
    /// entries file.
    pub fn write(&self, dir: &Path) -> WcResult<()> {
        let tmp = paths::tmp_dir(dir).join(paths::ADM_ENTRIES);
        if let Some(parent) = tmp.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(&self.map).map_err(|source| {
            WcError::CorruptMetadata {
                path: paths::entries_path(dir),
                source,
            }
        })?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, paths::entries_path(dir))?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.map.get(name)
    }

    pub fn this_dir(&self) -> Option<&Entry> {
        self.map.get(THIS_DIR)
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: Entry) {
        self.map.insert(name.into(), entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<Entry> {
        self.map.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.map.iter()
    }
}

/// Merge `fields` into the entry `name` under `dir`, creating the record
/// when absent. New file records default to kind file; the this-dir record
/// defaults to kind dir.
pub fn modify_entry(dir: &Path, name: &str, fields: &EntryFields) -> WcResult<()> {
    let mut entries = Entries::read(dir)?;
    let default_kind = if name == THIS_DIR {
        NodeKind::Dir
    } else {
        NodeKind::File
    };
    let mut entry = entries
        .get(name)
        .cloned()
        .unwrap_or_else(|| Entry::new(fields.kind.unwrap_or(default_kind)));
    fields.apply(&mut entry);
    entries.insert(name, entry);
    entries.write(dir)
}

/// Look up the entry describing `path`: the this-dir record when `path`
/// is itself a versioned directory, otherwise the record under its
/// parent. `None` when nothing is versioned there.
pub fn read_entry(path: &Path) -> WcResult<Option<Entry>> {
    if path.is_dir() && paths::is_working_copy(path) {
        return Ok(Entries::read(path)?.this_dir().cloned());
    }
    let (parent, name) = paths::split(path);
    if name.is_empty() || !paths::is_working_copy(&parent) {
        return Ok(None);
    }
    Ok(Entries::read(&parent)?.get(&name).cloned())
}

/// Milliseconds-since-epoch mtime of `path`, `None` when it is absent.
pub(crate) fn mtime_ms(path: &Path) -> WcResult<Option<u64>> {
    match fs::metadata(path) {
        Ok(meta) => {
            let mtime = meta.modified()?;
            let ms = mtime
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            Ok(Some(ms))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(WcError::Io(err)),
    }
}

pub fn ensure_directory(path: &Path) -> WcResult<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Make sure `path` is a working copy for `url` at `revision`: create a
/// fresh admin area when there is none, or verify that the existing one
/// belongs to the same repository location.
pub fn ensure_wc(path: &Path, url: &str, revision: u64) -> WcResult<()> {
    if paths::is_working_copy(path) {
        let entries = Entries::read(path)?;
        let recorded = entries.this_dir().and_then(|entry| entry.url.clone());
        if recorded.as_deref() != Some(url) {
            return Err(WcError::ObstructedUpdate(path.to_path_buf()));
        }
        return Ok(());
    }

    let adm = paths::adm_dir(path);
    fs::create_dir_all(adm.join("text-base"))?;
    fs::create_dir_all(adm.join("tmp").join("text-base"))?;
    fs::create_dir_all(adm.join("prop-base"))?;
    fs::create_dir_all(adm.join("props"))?;
    fs::create_dir_all(adm.join("wcprops"))?;

    let mut this_dir = Entry::new(NodeKind::Dir);
    this_dir.url = Some(url.to_string());
    this_dir.revision = Some(revision);
    let mut entries = Entries::default();
    entries.insert(THIS_DIR, this_dir);
    entries.write(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ensure_wc_creates_admin_skeleton() {
        let temp = TempDir::new().unwrap();
        ensure_wc(temp.path(), "http://host/repo", 4).unwrap();
        assert!(paths::is_working_copy(temp.path()));

        let entries = Entries::read(temp.path()).unwrap();
        let this_dir = entries.this_dir().unwrap();
        assert_eq!(this_dir.kind, NodeKind::Dir);
        assert_eq!(this_dir.url.as_deref(), Some("http://host/repo"));
        assert_eq!(this_dir.revision, Some(4));
    }

    #[test]
    fn ensure_wc_rejects_foreign_working_copy() {
        let temp = TempDir::new().unwrap();
        ensure_wc(temp.path(), "http://host/repo", 4).unwrap();
        assert!(matches!(
            ensure_wc(temp.path(), "http://other/repo", 4),
            Err(WcError::ObstructedUpdate(_))
        ));
        // Same URL is idempotent.
        ensure_wc(temp.path(), "http://host/repo", 9).unwrap();
    }

    #[test]
    fn modify_entry_merges_only_populated_fields() {
        let temp = TempDir::new().unwrap();
        ensure_wc(temp.path(), "http://host/repo", 1).unwrap();

        let mut entry = Entry::new(NodeKind::File);
        entry.revision = Some(1);
        entry.url = Some("http://host/repo/x".into());
        let mut entries = Entries::read(temp.path()).unwrap();
        entries.insert("x", entry);
        entries.write(temp.path()).unwrap();

        modify_entry(
            temp.path(),
            "x",
            &EntryFields {
                revision: Some(7),
                ..Default::default()
            },
        )
        .unwrap();

        let entries = Entries::read(temp.path()).unwrap();
        let entry = entries.get("x").unwrap();
        assert_eq!(entry.revision, Some(7));
        assert_eq!(entry.url.as_deref(), Some("http://host/repo/x"));
    }

    #[test]
    fn read_entry_resolves_directories_to_this_dir() {
        let temp = TempDir::new().unwrap();
        ensure_wc(temp.path(), "http://host/repo", 1).unwrap();
        let entry = read_entry(temp.path()).unwrap().unwrap();
        assert_eq!(entry.kind, NodeKind::Dir);

        assert!(read_entry(&temp.path().join("missing")).unwrap().is_none());
    }
}
