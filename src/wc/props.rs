//! Property lists and the three-way property merge.
//!
//! Property names route by prefix: `entry:` props are entry attributes,
//! `wc:` props live in the wc-prop store, everything else is a regular
//! versioned property. The classifier here is the single source of truth
//! for that partition; the installer and the editor both use it.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{WcError, WcResult};
use super::log::{LogJournal, LogOp};
use super::paths;

pub const PROP_EOL_STYLE: &str = "eol-style";
pub const PROP_KEYWORDS: &str = "keywords";
pub const PROP_MIME_TYPE: &str = "mime-type";

pub const ENTRY_PROP_COMMITTED_REV: &str = "entry:committed-rev";
pub const ENTRY_PROP_COMMITTED_DATE: &str = "entry:committed-date";
pub const ENTRY_PROP_LAST_AUTHOR: &str = "entry:last-author";

const ENTRY_PREFIX: &str = "entry:";
const WC_PREFIX: &str = "wc:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropKind {
    Regular,
    Entry,
    Wc,
}

/// Classify a property name by its prefix.
pub fn prop_kind(name: &str) -> PropKind {
    if name.starts_with(ENTRY_PREFIX) {
        PropKind::Entry
    } else if name.starts_with(WC_PREFIX) {
        PropKind::Wc
    } else {
        PropKind::Regular
    }
}

/// Strip the routing prefix from an entry or wc property name.
pub fn strip_prop_prefix(name: &str) -> &str {
    name.strip_prefix(ENTRY_PREFIX)
        .or_else(|| name.strip_prefix(WC_PREFIX))
        .unwrap_or(name)
}

/// One property change; `None` value means deletion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropChange {
    pub name: String,
    pub value: Option<String>,
}

pub type PropMap = BTreeMap<String, String>;

/// Split a changelist into entry, wc and regular groups, preserving order.
pub fn partition_props(
    changes: &[PropChange],
) -> (Vec<PropChange>, Vec<PropChange>, Vec<PropChange>) {
    let mut entry_props = Vec::new();
    let mut wc_props = Vec::new();
    let mut regular_props = Vec::new();
    for change in changes {
        match prop_kind(&change.name) {
            PropKind::Entry => entry_props.push(change.clone()),
            PropKind::Wc => wc_props.push(change.clone()),
            PropKind::Regular => regular_props.push(change.clone()),
        }
    }
    (entry_props, wc_props, regular_props)
}

/// Load a property list; a missing file is an empty list.
pub fn load_props(path: &Path) -> WcResult<PropMap> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(PropMap::new()),
        Err(err) => return Err(WcError::Io(err)),
    };
    serde_json::from_slice(&bytes).map_err(|source| WcError::CorruptMetadata {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_props(path: &Path, props: &PropMap) -> WcResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(props).map_err(|source| WcError::CorruptMetadata {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json)?;
    Ok(())
}

fn prop_file_paths(dir: &Path, name: Option<&str>) -> (std::path::PathBuf, std::path::PathBuf) {
    match name {
        Some(name) => (
            paths::prop_path(dir, name, true),
            paths::prop_path(dir, name, false),
        ),
        None => (paths::dir_prop_path(dir, true), paths::dir_prop_path(dir, false)),
    }
}

/// Working property list of a versioned file or directory.
pub fn working_props(path: &Path) -> WcResult<PropMap> {
    if path.is_dir() && paths::is_working_copy(path) {
        load_props(&paths::dir_prop_path(path, false))
    } else {
        let (parent, name) = paths::split(path);
        load_props(&paths::prop_path(&parent, &name, false))
    }
}

/// The diff turning `old` into `new`.
pub fn prop_diffs(new: &PropMap, old: &PropMap) -> Vec<PropChange> {
    let mut changes = Vec::new();
    for (name, value) in new {
        if old.get(name) != Some(value) {
            changes.push(PropChange {
                name: name.clone(),
                value: Some(value.clone()),
            });
        }
    }
    for name in old.keys() {
        if !new.contains_key(name) {
            changes.push(PropChange {
                name: name.clone(),
                value: None,
            });
        }
    }
    changes
}

/// True iff the working property list differs from the pristine one.
pub fn props_modified(path: &Path) -> WcResult<bool> {
    let (base_path, work_path) = if path.is_dir() && paths::is_working_copy(path) {
        (
            paths::dir_prop_path(path, true),
            paths::dir_prop_path(path, false),
        )
    } else {
        let (parent, name) = paths::split(path);
        prop_file_paths(&parent, Some(name.as_str()))
    };
    Ok(load_props(&base_path)? != load_props(&work_path)?)
}

/// Set or delete one property in the wc-prop store.
pub fn wcprop_set(
    dir: &Path,
    name: Option<&str>,
    propname: &str,
    value: Option<&str>,
) -> WcResult<()> {
    let path = paths::wcprop_path(dir, name);
    let mut props = load_props(&path)?;
    match value {
        Some(value) => {
            props.insert(propname.to_string(), value.to_string());
        }
        None => {
            props.remove(propname);
        }
    }
    save_props(&path, &props)
}

pub fn wcprop_get(dir: &Path, name: Option<&str>, propname: &str) -> WcResult<Option<String>> {
    Ok(load_props(&paths::wcprop_path(dir, name))?
        .get(propname)
        .cloned())
}

fn apply_change(props: &mut PropMap, change: &PropChange) {
    match &change.value {
        Some(value) => {
            props.insert(change.name.clone(), value.clone());
        }
        None => {
            props.remove(&change.name);
        }
    }
}

fn describe(value: Option<&String>) -> String {
    match value {
        Some(value) => format!("`{value}`"),
        None => "<absent>".to_string(),
    }
}

/// Merge incoming property changes into the working and pristine lists of
/// `name` under `dir` (the directory itself when `name` is `None`).
///
/// A change applies cleanly when the working value still equals the base
/// value, or already equals the incoming one. Anything else is a conflict:
/// the working value is left alone, the pristine list still follows the
/// repository, and a description line goes to the property reject file.
/// The merged lists are staged in tmp and installed through `journal`.
/// Returns the conflicting changes keyed by property name.
pub fn merge_prop_diffs(
    dir: &Path,
    name: Option<&str>,
    changes: &[PropChange],
    journal: &mut LogJournal,
) -> WcResult<BTreeMap<String, PropChange>> {
    let (base_path, work_path) = prop_file_paths(dir, name);
    let mut base = load_props(&base_path)?;
    let mut working = load_props(&work_path)?;

    let mut conflicts = BTreeMap::new();
    let mut reject_lines = Vec::new();

    for change in changes {
        let base_value = base.get(&change.name).cloned();
        let working_value = working.get(&change.name).cloned();

        if working_value == base_value {
            apply_change(&mut working, change);
            apply_change(&mut base, change);
        } else if working_value == change.value {
            apply_change(&mut base, change);
        } else {
            reject_lines.push(format!(
                "property `{}`: local value {}, incoming value {}, base value {}\n",
                change.name,
                describe(working_value.as_ref()),
                describe(change.value.as_ref()),
                describe(base_value.as_ref()),
            ));
            apply_change(&mut base, change);
            conflicts.insert(change.name.clone(), change.clone());
        }
    }

    // Stage the merged lists in tmp; the journal installs them.
    let stem = name.unwrap_or("dir-props");
    let tmp = paths::tmp_dir(dir);
    fs::create_dir_all(&tmp)?;
    let tmp_base = tmp.join(format!("{stem}.prop-base.json"));
    let tmp_work = tmp.join(format!("{stem}.props.json"));
    save_props(&tmp_base, &base)?;
    save_props(&tmp_work, &working)?;

    journal.push(LogOp::Mv {
        name: paths::rel_to_dir(dir, &tmp_base),
        dest: paths::rel_to_dir(dir, &base_path),
    });
    journal.push(LogOp::Mv {
        name: paths::rel_to_dir(dir, &tmp_work),
        dest: paths::rel_to_dir(dir, &work_path),
    });

    if !reject_lines.is_empty() {
        let reject_name = format!("{stem}.prej");
        let tmp_reject = tmp.join(&reject_name);
        fs::write(&tmp_reject, reject_lines.concat())?;
        journal.push(LogOp::Mv {
            name: paths::rel_to_dir(dir, &tmp_reject),
            dest: reject_name.clone(),
        });
        journal.push(LogOp::ModifyEntry {
            name: name.unwrap_or(super::entries::THIS_DIR).to_string(),
            fields: Box::new(super::log::LogEntryFields {
                conflicted: Some(true),
                prop_reject_file: Some(reject_name),
                ..Default::default()
            }),
        });
    }

    Ok(conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use super::super::entries::{ensure_wc, Entries};

    #[test]
    fn prop_kind_routes_by_prefix() {
        assert_eq!(prop_kind("entry:committed-rev"), PropKind::Entry);
        assert_eq!(prop_kind("wc:ra-session"), PropKind::Wc);
        assert_eq!(prop_kind("eol-style"), PropKind::Regular);
        assert_eq!(strip_prop_prefix("entry:committed-rev"), "committed-rev");
        assert_eq!(strip_prop_prefix("wc:ra-session"), "ra-session");
    }

    #[test]
    fn prop_diffs_reports_additions_changes_and_deletions() {
        let mut old = PropMap::new();
        old.insert("keep".into(), "v".into());
        old.insert("drop".into(), "v".into());
        old.insert("change".into(), "a".into());
        let mut new = old.clone();
        new.remove("drop");
        new.insert("change".into(), "b".into());
        new.insert("add".into(), "v".into());

        let diffs = prop_diffs(&new, &old);
        assert_eq!(diffs.len(), 3);
        assert!(diffs.iter().any(|c| c.name == "drop" && c.value.is_none()));
        assert!(diffs
            .iter()
            .any(|c| c.name == "change" && c.value.as_deref() == Some("b")));
        assert!(diffs
            .iter()
            .any(|c| c.name == "add" && c.value.as_deref() == Some("v")));
    }

    #[test]
    fn clean_merge_updates_base_and_working() {
        let temp = TempDir::new().unwrap();
        ensure_wc(temp.path(), "http://host/repo", 1).unwrap();
        let mut entries = Entries::read(temp.path()).unwrap();
        entries.insert("f", super::super::entries::Entry::new(crate::fs::NodeKind::File));
        entries.write(temp.path()).unwrap();

        let changes = vec![PropChange {
            name: "color".into(),
            value: Some("blue".into()),
        }];
        let mut journal = LogJournal::new(temp.path());
        let conflicts =
            merge_prop_diffs(temp.path(), Some("f"), &changes, &mut journal).unwrap();
        assert!(conflicts.is_empty());
        journal.append_and_run().unwrap();

        let work = load_props(&paths::prop_path(temp.path(), "f", false)).unwrap();
        let base = load_props(&paths::prop_path(temp.path(), "f", true)).unwrap();
        assert_eq!(work.get("color").map(String::as_str), Some("blue"));
        assert_eq!(base, work);
    }

    #[test]
    fn locally_modified_value_conflicts_and_keeps_working() {
        let temp = TempDir::new().unwrap();
        ensure_wc(temp.path(), "http://host/repo", 1).unwrap();
        let mut entries = Entries::read(temp.path()).unwrap();
        entries.insert("f", super::super::entries::Entry::new(crate::fs::NodeKind::File));
        entries.write(temp.path()).unwrap();

        let mut base = PropMap::new();
        base.insert("color".into(), "red".into());
        save_props(&paths::prop_path(temp.path(), "f", true), &base).unwrap();
        let mut work = PropMap::new();
        work.insert("color".into(), "green".into());
        save_props(&paths::prop_path(temp.path(), "f", false), &work).unwrap();

        let changes = vec![PropChange {
            name: "color".into(),
            value: Some("blue".into()),
        }];
        let mut journal = LogJournal::new(temp.path());
        let conflicts =
            merge_prop_diffs(temp.path(), Some("f"), &changes, &mut journal).unwrap();
        assert!(conflicts.contains_key("color"));
        journal.append_and_run().unwrap();

        let work = load_props(&paths::prop_path(temp.path(), "f", false)).unwrap();
        let base = load_props(&paths::prop_path(temp.path(), "f", true)).unwrap();
        // Working keeps the local value; pristine follows the repository.
        assert_eq!(work.get("color").map(String::as_str), Some("green"));
        assert_eq!(base.get("color").map(String::as_str), Some("blue"));

        let entries = Entries::read(temp.path()).unwrap();
        let entry = entries.get("f").unwrap();
        assert!(entry.conflicted);
        let reject = temp.path().join(entry.prop_reject_file.as_deref().unwrap());
        assert!(fs::read_to_string(reject).unwrap().contains("color"));
    }
}
