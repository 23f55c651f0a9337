//! The per-directory journal of pending working-copy operations.
//!
//! Mutations to a directory's working copy are first written as a batch of
//! operations to `.strata/log`, fsynced, and then replayed. A crash
//! between the sync and the end of replay leaves the log on disk; the next
//! operation against the directory replays it to completion before doing
//! anything else. Every operation is idempotent, so a partially executed
//! log can be re-run from the top.
//!
//! One record per line, JSON, internally tagged by `op`. All paths in a
//! record are relative to the directory owning the log.

use std::fs;
use std::io::{self, BufRead, BufReader, Write as _};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::entries::{self, Entries, EntryFields, Schedule};
use super::error::{WcError, WcResult};
use super::paths;
use super::textdiff;
use super::translate::{self, Keywords};
use crate::fs::NodeKind;

/// A timestamp in a log record: either an absolute value or the
/// working-copy sentinel, resolved to the named file's mtime at replay
/// time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTime {
    Working,
    Ms(u64),
}

/// Entry fields as carried by a `modify-entry` record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntryFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_time: Option<LogTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_time: Option<LogTime>,
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

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum LogOp {
    /// Remove an entry record and the named thing on disk.
    DeleteEntry { name: String },
    /// Merge fields into an entry record.
    ModifyEntry {
        name: String,
        #[serde(flatten)]
        fields: Box<LogEntryFields>,
    },
    /// Rename within the directory.
    Mv { name: String, dest: String },
    /// Copy with optional eol translation and keyword substitution.
    Cp {
        name: String,
        dest: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eol: Option<String>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        repair: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        keywords: Option<Keywords>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        expand: bool,
    },
    /// Best-effort unlink.
    Rm { name: String },
    /// Strip write permission.
    Readonly { name: String },
    /// Apply the context patch at `patch_file` to `name`, appending
    /// unplaceable hunks to `reject_file`.
    Patch {
        name: String,
        patch_file: String,
        reject_file: String,
    },
    /// Non-empty reject file: mark the entry conflicted. Empty: remove the
    /// reject file and clear the flag.
    DetectConflict { name: String, reject_file: String },
}

/// Accumulates operations in memory for one directory, then writes them
/// in one synced batch and replays.
#[derive(Debug)]
pub struct LogJournal {
    dir: std::path::PathBuf,
    ops: Vec<LogOp>,
}

impl LogJournal {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            ops: Vec::new(),
        }
    }

    pub fn push(&mut self, op: LogOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Write the batch to the log file, sync, replay, and remove the log.
    /// The caller must hold the directory lock.
    pub fn append_and_run(self) -> WcResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let log_path = paths::log_path(&self.dir);
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)?;
        for op in &self.ops {
            let line = serde_json::to_string(op).map_err(|err| WcError::CorruptLog {
                dir: self.dir.clone(),
                reason: err.to_string(),
            })?;
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
        drop(file);

        // From here the log is the source of truth; a crash during replay
        // is recovered by re-running it.
        run_log(&self.dir)
    }
}

/// True iff `dir` has a log waiting for replay.
pub fn has_pending_log(dir: &Path) -> bool {
    paths::log_path(dir).is_file()
}

/// Replay a leftover log before any new work against `dir`. The caller
/// must hold the directory lock. Returns whether anything was replayed.
pub fn run_pending_log(dir: &Path) -> WcResult<bool> {
    if !has_pending_log(dir) {
        return Ok(false);
    }
    tracing::info!("replaying unfinished log in {}", dir.display());
    run_log(dir)?;
    Ok(true)
}

fn run_log(dir: &Path) -> WcResult<()> {
    let log_path = paths::log_path(dir);
    let file = fs::File::open(&log_path)?;
    let mut ops = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let op: LogOp = serde_json::from_str(&line).map_err(|err| WcError::CorruptLog {
            dir: dir.to_path_buf(),
            reason: format!("bad record `{line}`: {err}"),
        })?;
        ops.push(op);
    }
    for op in &ops {
        run_op(dir, op)?;
    }
    fs::remove_file(&log_path)?;
    Ok(())
}

fn resolve_time(dir: &Path, name: &str, time: LogTime) -> WcResult<Option<u64>> {
    match time {
        LogTime::Ms(ms) => Ok(Some(ms)),
        LogTime::Working => {
            let target = if name.is_empty() {
                dir.to_path_buf()
            } else {
                dir.join(name)
            };
            entries::mtime_ms(&target)
        }
    }
}

fn resolve_fields(dir: &Path, name: &str, fields: &LogEntryFields) -> WcResult<EntryFields> {
    let mut resolved = EntryFields {
        kind: fields.kind,
        schedule: fields.schedule,
        revision: fields.revision,
        url: fields.url.clone(),
        text_time: None,
        prop_time: None,
        conflicted: fields.conflicted,
        prop_reject_file: fields.prop_reject_file.clone(),
        committed_rev: fields.committed_rev.clone(),
        committed_date: fields.committed_date.clone(),
        last_author: fields.last_author.clone(),
    };
    if let Some(time) = fields.text_time {
        resolved.text_time = resolve_time(dir, name, time)?;
    }
    if let Some(time) = fields.prop_time {
        resolved.prop_time = resolve_time(dir, name, time)?;
    }
    Ok(resolved)
}

fn remove_best_effort(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(err) = result {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::warn!("cleanup of {} failed: {err}", path.display());
        }
    }
}

fn run_op(dir: &Path, op: &LogOp) -> WcResult<()> {
    match op {
        LogOp::DeleteEntry { name } => {
            let mut entries = Entries::read(dir)?;
            entries.remove(name);
            entries.write(dir)?;
            remove_best_effort(&dir.join(name));
            remove_best_effort(&paths::text_base_path(dir, name, false));
            remove_best_effort(&paths::prop_path(dir, name, false));
            remove_best_effort(&paths::prop_path(dir, name, true));
            Ok(())
        }
        LogOp::ModifyEntry { name, fields } => {
            let resolved = resolve_fields(dir, name, fields)?;
            entries::modify_entry(dir, name, &resolved)
        }
        LogOp::Mv { name, dest } => {
            let src = dir.join(name);
            let dst = dir.join(dest);
            if src.exists() {
                if let Some(parent) = dst.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&src, &dst)?;
                Ok(())
            } else if dst.exists() {
                // Already moved by a previous run of this log.
                Ok(())
            } else {
                Err(WcError::CorruptLog {
                    dir: dir.to_path_buf(),
                    reason: format!("mv: neither `{name}` nor `{dest}` exists"),
                })
            }
        }
        LogOp::Cp {
            name,
            dest,
            eol,
            repair,
            keywords,
            expand,
        } => {
            let eol = eol.as_deref().and_then(translate::eol_bytes_from_name);
            translate::copy_and_translate(
                &dir.join(name),
                &dir.join(dest),
                eol,
                *repair,
                keywords.as_ref(),
                *expand,
            )
        }
        LogOp::Rm { name } => {
            remove_best_effort(&dir.join(name));
            Ok(())
        }
        LogOp::Readonly { name } => {
            let path = dir.join(name);
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_readonly(true);
            fs::set_permissions(&path, perms)?;
            Ok(())
        }
        LogOp::Patch {
            name,
            patch_file,
            reject_file,
        } => {
            let patch_text = fs::read_to_string(dir.join(patch_file))?;
            let hunks = textdiff::parse_patch(&patch_text).map_err(|reason| {
                WcError::CorruptLog {
                    dir: dir.to_path_buf(),
                    reason,
                }
            })?;
            let target_path = dir.join(name);
            let target = String::from_utf8_lossy(&fs::read(&target_path)?).into_owned();
            let outcome = textdiff::apply_patch(&target, &hunks);
            fs::write(&target_path, outcome.text)?;
            if outcome.rejected > 0 {
                tracing::warn!(
                    "{} hunk(s) rejected patching {}",
                    outcome.rejected,
                    target_path.display()
                );
            }
            // Rewritten, not appended, so a replayed log reproduces the
            // same reject file.
            fs::write(dir.join(reject_file), outcome.rejects.as_bytes())?;
            Ok(())
        }
        LogOp::DetectConflict { name, reject_file } => {
            let reject_path = dir.join(reject_file);
            let non_empty = fs::metadata(&reject_path)
                .map(|meta| meta.len() > 0)
                .unwrap_or(false);
            let mut entries = Entries::read(dir)?;
            if let Some(entry) = entries.get(name).cloned() {
                let mut entry = entry;
                if non_empty {
                    entry.conflicted = true;
                    entry.reject_file = Some(reject_file.clone());
                } else {
                    remove_best_effort(&reject_path);
                    entry.conflicted = entry.prop_reject_file.is_some() && entry.conflicted;
                    entry.reject_file = None;
                }
                entries.insert(name.clone(), entry);
                entries.write(dir)?;
            } else if !non_empty {
                remove_best_effort(&reject_path);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use super::super::entries::{ensure_wc, Entry};

    fn wc() -> TempDir {
        let temp = TempDir::new().unwrap();
        ensure_wc(temp.path(), "http://host/repo", 1).unwrap();
        temp
    }

    #[test]
    fn delete_entry_removes_record_and_disk_state() {
        let temp = wc();
        let mut entries = Entries::read(temp.path()).unwrap();
        entries.insert("x", Entry::new(NodeKind::File));
        entries.write(temp.path()).unwrap();
        fs::write(temp.path().join("x"), "data").unwrap();
        fs::write(paths::text_base_path(temp.path(), "x", false), "data").unwrap();

        let mut journal = LogJournal::new(temp.path());
        journal.push(LogOp::DeleteEntry { name: "x".into() });
        journal.append_and_run().unwrap();

        assert!(Entries::read(temp.path()).unwrap().get("x").is_none());
        assert!(!temp.path().join("x").exists());
        assert!(!paths::text_base_path(temp.path(), "x", false).exists());
        assert!(!has_pending_log(temp.path()));
    }

    #[test]
    fn working_time_sentinel_resolves_to_file_mtime() {
        let temp = wc();
        fs::write(temp.path().join("x"), "data").unwrap();
        let mut entries = Entries::read(temp.path()).unwrap();
        entries.insert("x", Entry::new(NodeKind::File));
        entries.write(temp.path()).unwrap();

        let mut journal = LogJournal::new(temp.path());
        journal.push(LogOp::ModifyEntry {
            name: "x".into(),
            fields: Box::new(LogEntryFields {
                revision: Some(5),
                text_time: Some(LogTime::Working),
                ..Default::default()
            }),
        });
        journal.append_and_run().unwrap();

        let entry = Entries::read(temp.path()).unwrap().get("x").cloned().unwrap();
        assert_eq!(entry.revision, Some(5));
        assert_eq!(
            entry.text_time,
            entries::mtime_ms(&temp.path().join("x")).unwrap()
        );
    }

    #[test]
    fn replay_is_idempotent_after_partial_run() {
        let temp = wc();
        fs::write(
            paths::text_base_path(temp.path(), "x", true),
            "new base\n",
        )
        .unwrap();

        let txtb = paths::rel_to_dir(temp.path(), &paths::text_base_path(temp.path(), "x", false));
        let tmp_txtb =
            paths::rel_to_dir(temp.path(), &paths::text_base_path(temp.path(), "x", true));

        let mut entries = Entries::read(temp.path()).unwrap();
        entries.insert("x", Entry::new(NodeKind::File));
        entries.write(temp.path()).unwrap();

        let ops = vec![
            LogOp::Mv {
                name: tmp_txtb,
                dest: txtb.clone(),
            },
            LogOp::Cp {
                name: txtb,
                dest: "x".into(),
                eol: None,
                repair: false,
                keywords: None,
                expand: false,
            },
        ];

        // Write the log by hand, run it partially (just the mv), then
        // replay the whole log as crash recovery would.
        let log_path = paths::log_path(temp.path());
        let mut body = String::new();
        for op in &ops {
            body.push_str(&serde_json::to_string(op).unwrap());
            body.push('\n');
        }
        fs::write(&log_path, &body).unwrap();
        run_op(temp.path(), &ops[0]).unwrap();

        run_pending_log(temp.path()).unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join("x")).unwrap(),
            "new base\n"
        );
        assert!(!has_pending_log(temp.path()));

        // A second full replay of the same ops changes nothing.
        fs::write(&log_path, &body).unwrap();
        run_pending_log(temp.path()).unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join("x")).unwrap(),
            "new base\n"
        );
    }

    #[test]
    fn detect_conflict_flags_only_nonempty_rejects() {
        let temp = wc();
        let mut entries = Entries::read(temp.path()).unwrap();
        entries.insert("x", Entry::new(NodeKind::File));
        entries.write(temp.path()).unwrap();

        fs::write(temp.path().join("x.rej"), "").unwrap();
        let mut journal = LogJournal::new(temp.path());
        journal.push(LogOp::DetectConflict {
            name: "x".into(),
            reject_file: "x.rej".into(),
        });
        journal.append_and_run().unwrap();
        let entry = Entries::read(temp.path()).unwrap().get("x").cloned().unwrap();
        assert!(!entry.conflicted);
        assert!(!temp.path().join("x.rej").exists());

        fs::write(temp.path().join("x.rej"), "@@ rejected @@\n").unwrap();
        let mut journal = LogJournal::new(temp.path());
        journal.push(LogOp::DetectConflict {
            name: "x".into(),
            reject_file: "x.rej".into(),
        });
        journal.append_and_run().unwrap();
        let entry = Entries::read(temp.path()).unwrap().get("x").cloned().unwrap();
        assert!(entry.conflicted);
        assert_eq!(entry.reject_file.as_deref(), Some("x.rej"));
        assert!(temp.path().join("x.rej").exists());
    }

    #[test]
    fn cp_translates_on_the_way() {
        let temp = wc();
        fs::write(temp.path().join("src"), "a\nb\n").unwrap();
        let mut journal = LogJournal::new(temp.path());
        journal.push(LogOp::Cp {
            name: "src".into(),
            dest: "dst".into(),
            eol: Some("CRLF".into()),
            repair: true,
            keywords: None,
            expand: false,
        });
        journal.append_and_run().unwrap();
        assert_eq!(fs::read(temp.path().join("dst")).unwrap(), b"a\r\nb\r\n");
    }
}
