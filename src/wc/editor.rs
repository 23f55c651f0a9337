//! The update editor: integrates an incoming delta into the working copy.
//!
//! An external sender drives the callbacks in depth-first order:
//! `set_target_revision`, `open_root`, then per directory any mix of
//! `delete_entry`, `add_directory`/`open_directory`, prop changes and
//! file callbacks, each scope closed exactly once, and finally
//! `close_edit`. The first error aborts the edit; locks and temp files
//! are scoped to individual callbacks, so unwinding releases them.
//!
//! Directory and file scopes are indices into editor-owned arenas rather
//! than linked batons. A directory's slot stays alive while its
//! reference count is non-zero: one for the scope itself plus one per
//! open child. When the count drops to zero the directory is flushed to
//! the target revision and the slot freed.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::delta::WindowHandler;
use super::entries::{self, Entries, EntryFields, Schedule, THIS_DIR};
use super::error::{WcError, WcResult};
use super::install::{install_file, InstallOptions};
use super::lock::AdmLock;
use super::log::{LogJournal, LogOp};
use super::paths;
use super::props::{self, PropChange, PropKind};
use crate::fs::NodeKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditorMode {
    Update,
    Checkout { ancestor_url: String },
    Switch { switch_url: String },
}

/// Factory inputs for one edit.
#[derive(Clone, Debug)]
pub struct EditorSpec {
    /// The directory the edit is rooted at.
    pub anchor: PathBuf,
    /// The element inside the anchor being edited; `None` means the
    /// anchor itself.
    pub target: Option<String>,
    pub target_revision: u64,
    pub mode: EditorMode,
    pub recurse: bool,
}

/// Handle to an open directory scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirScope(usize);

/// Handle to an open file scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileScope(usize);

#[derive(Debug)]
struct DirState {
    path: PathBuf,
    name: Option<String>,
    url: String,
    /// The URL is not the parent's URL plus this name (or the parent is
    /// already disjoint). Detected but not yet acted upon.
    disjoint_url: bool,
    ref_count: usize,
    parent: Option<usize>,
    added: bool,
    prop_changes: Vec<PropChange>,
}

#[derive(Debug)]
struct FileState {
    parent: usize,
    name: String,
    path: PathBuf,
    #[allow(dead_code)]
    url: String,
    #[allow(dead_code)]
    disjoint_url: bool,
    text_changed: Rc<Cell<bool>>,
    prop_changes: Vec<PropChange>,
}

pub struct UpdateEditor {
    spec: EditorSpec,
    options: InstallOptions,
    root_opened: bool,
    dirs: Vec<Option<DirState>>,
    files: Vec<Option<FileState>>,
}

/// An update edit rooted at `anchor`, targeting `target` inside it.
pub fn update_editor(
    anchor: impl Into<PathBuf>,
    target: Option<String>,
    target_revision: u64,
    recurse: bool,
) -> UpdateEditor {
    UpdateEditor::new(EditorSpec {
        anchor: anchor.into(),
        target,
        target_revision,
        mode: EditorMode::Update,
        recurse,
    })
}

/// A checkout edit creating a working copy at `dest` from nothing.
pub fn checkout_editor(
    dest: impl Into<PathBuf>,
    ancestor_url: impl Into<String>,
    target_revision: u64,
    recurse: bool,
) -> UpdateEditor {
    UpdateEditor::new(EditorSpec {
        anchor: dest.into(),
        target: None,
        target_revision,
        mode: EditorMode::Checkout {
            ancestor_url: ancestor_url.into(),
        },
        recurse,
    })
}

/// A switch edit retargeting `anchor/target` to `switch_url`.
pub fn switch_editor(
    anchor: impl Into<PathBuf>,
    target: Option<String>,
    target_revision: u64,
    switch_url: impl Into<String>,
    recurse: bool,
) -> UpdateEditor {
    UpdateEditor::new(EditorSpec {
        anchor: anchor.into(),
        target,
        target_revision,
        mode: EditorMode::Switch {
            switch_url: switch_url.into(),
        },
        recurse,
    })
}

impl UpdateEditor {
    pub fn new(spec: EditorSpec) -> Self {
        Self::with_options(spec, InstallOptions::default())
    }

    pub fn with_options(spec: EditorSpec, options: InstallOptions) -> Self {
        Self {
            spec,
            options,
            root_opened: false,
            dirs: Vec::new(),
            files: Vec::new(),
        }
    }

    fn is_checkout(&self) -> bool {
        matches!(self.spec.mode, EditorMode::Checkout { .. })
    }

    fn dir(&self, scope: DirScope) -> WcResult<&DirState> {
        self.dirs
            .get(scope.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| WcError::UnsupportedFeature("directory scope already closed".into()))
    }

    fn dir_mut(&mut self, scope: DirScope) -> WcResult<&mut DirState> {
        self.dirs
            .get_mut(scope.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| WcError::UnsupportedFeature("directory scope already closed".into()))
    }

    fn file_mut(&mut self, scope: FileScope) -> WcResult<&mut FileState> {
        self.files
            .get_mut(scope.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| WcError::UnsupportedFeature("file scope already closed".into()))
    }

    /// Record the revision the edit is driving toward. Called at most
    /// once, before any scope is opened.
    pub fn set_target_revision(&mut self, revision: u64) -> WcResult<()> {
        if self.root_opened {
            return Err(WcError::UnsupportedFeature(
                "target revision set after open_root".into(),
            ));
        }
        self.spec.target_revision = revision;
        Ok(())
    }

    /// Path, URL and disjointness for a new directory scope.
    fn dir_identity(
        &self,
        name: Option<&str>,
        parent: Option<usize>,
        added: bool,
    ) -> WcResult<(PathBuf, String, bool)> {
        let parent_state = parent.map(|ix| self.dirs[ix].as_ref().expect("parent scope open"));
        let mut path = match parent_state {
            Some(parent_state) => parent_state.path.clone(),
            None => self.spec.anchor.clone(),
        };
        if let Some(name) = name {
            path.push(name);
        }

        if let EditorMode::Checkout { ancestor_url } = &self.spec.mode {
            // Checkouts telescope URLs; disjointness cannot arise.
            let url = match (parent_state, name) {
                (Some(parent_state), Some(name)) => paths::url_join(&parent_state.url, name),
                _ => ancestor_url.clone(),
            };
            return Ok((path, url, false));
        }

        // A freshly added directory has no recorded URL to compare yet:
        // it inherits the telescoped one and is not disjoint.
        if added {
            let url = match (parent_state, name) {
                (Some(parent_state), Some(name)) => paths::url_join(&parent_state.url, name),
                _ => String::new(),
            };
            return Ok((path, url, false));
        }

        let url = entries::read_entry(&path)?
            .and_then(|entry| entry.url)
            .unwrap_or_default();
        let disjoint = match (parent_state, name) {
            (Some(parent_state), Some(name)) => {
                parent_state.disjoint_url
                    || paths::url_join(&parent_state.url, name) != url
            }
            _ => false,
        };
        Ok((path, url, disjoint))
    }

    fn push_dir(
        &mut self,
        name: Option<&str>,
        parent: Option<usize>,
        added: bool,
    ) -> WcResult<DirScope> {
        let (path, url, disjoint_url) = self.dir_identity(name, parent, added)?;
        if disjoint_url {
            tracing::debug!("disjoint url detected at {}", path.display());
        }
        let state = DirState {
            path,
            name: name.map(str::to_string),
            url,
            disjoint_url,
            ref_count: 1,
            parent,
            added,
            prop_changes: Vec::new(),
        };
        if let Some(parent_ix) = parent {
            self.dirs[parent_ix]
                .as_mut()
                .expect("parent scope open")
                .ref_count += 1;
        }
        self.dirs.push(Some(state));
        Ok(DirScope(self.dirs.len() - 1))
    }

    /// Open the root directory scope. Called at most once.
    pub fn open_root(&mut self, _base_revision: Option<u64>) -> WcResult<DirScope> {
        if self.root_opened {
            return Err(WcError::UnsupportedFeature("open_root called twice".into()));
        }
        self.root_opened = true;
        let scope = self.push_dir(None, None, false)?;
        if let EditorMode::Checkout { ancestor_url } = self.spec.mode.clone() {
            let path = self.dir(scope)?.path.clone();
            entries::ensure_directory(&path)?;
            entries::ensure_wc(&path, &ancestor_url, self.spec.target_revision)?;
        }
        Ok(scope)
    }

    /// Journal a deletion under `parent` and run the log immediately.
    pub fn delete_entry(
        &mut self,
        name: &str,
        _revision: Option<u64>,
        parent: DirScope,
    ) -> WcResult<()> {
        let dir_path = self.dir(parent)?.path.clone();
        let lock = AdmLock::acquire(&dir_path)?;
        super::log::run_pending_log(&dir_path)?;
        let mut journal = LogJournal::new(&dir_path);
        journal.push(LogOp::DeleteEntry {
            name: name.to_string(),
        });
        journal.append_and_run()?;
        lock.release()?;
        Ok(())
    }

    /// Add a directory that must not yet exist on disk.
    pub fn add_directory(
        &mut self,
        name: &str,
        parent: DirScope,
        copyfrom: Option<(String, u64)>,
    ) -> WcResult<DirScope> {
        let parent_state = self.dir(parent)?;
        let parent_dir = parent_state.path.clone();
        let parent_scope_url = parent_state.url.clone();
        let path = parent_dir.join(name);

        if fs::symlink_metadata(&path).is_ok() {
            return Err(WcError::ObstructedUpdate(path));
        }
        if copyfrom.is_some() {
            // Surfaced before any on-disk change.
            return Err(WcError::UnsupportedFeature(format!(
                "copyfrom history on added directory `{name}`"
            )));
        }

        // Without copyfrom args the new directory inherits its URL from
        // the parent and lives at the edit's target revision.
        let parent_url = match &self.spec.mode {
            EditorMode::Checkout { .. } => parent_scope_url,
            _ => Entries::read(&parent_dir)?
                .this_dir()
                .and_then(|this_dir| this_dir.url.clone())
                .ok_or_else(|| WcError::EntryMissingUrl(parent_dir.clone()))?,
        };
        let url = paths::url_join(&parent_url, name);

        let scope = self.push_dir(Some(name), Some(parent.0), true)?;
        entries::ensure_directory(&path)?;
        entries::ensure_wc(&path, &url, self.spec.target_revision)?;
        Ok(scope)
    }

    /// Open an existing versioned directory.
    pub fn open_directory(
        &mut self,
        name: &str,
        parent: DirScope,
        _base_revision: Option<u64>,
    ) -> WcResult<DirScope> {
        let path = self.dir(parent)?.path.join(name);
        if entries::read_entry(&path)?.is_none() {
            return Err(WcError::EntryNotFound(path));
        }
        self.push_dir(Some(name), Some(parent.0), false)
    }

    /// Record a directory property change. `wc:` props land in the
    /// wc-prop store immediately, `entry:` props in the this-dir entry;
    /// regular props queue for the merge at close.
    pub fn change_dir_prop(
        &mut self,
        scope: DirScope,
        name: &str,
        value: Option<&str>,
    ) -> WcResult<()> {
        let dir_path = self.dir(scope)?.path.clone();
        match props::prop_kind(name) {
            PropKind::Wc => {
                props::wcprop_set(&dir_path, None, props::strip_prop_prefix(name), value)
            }
            PropKind::Entry => {
                let mut fields = EntryFields::default();
                let value = value.unwrap_or_default().to_string();
                match props::strip_prop_prefix(name) {
                    "committed-rev" => fields.committed_rev = Some(value),
                    "committed-date" => fields.committed_date = Some(value),
                    "last-author" => fields.last_author = Some(value),
                    other => {
                        tracing::debug!("ignoring unknown entry prop `{other}`");
                        return Ok(());
                    }
                }
                entries::modify_entry(&dir_path, THIS_DIR, &fields)
            }
            PropKind::Regular => {
                self.dir_mut(scope)?.prop_changes.push(PropChange {
                    name: name.to_string(),
                    value: value.map(str::to_string),
                });
                Ok(())
            }
        }
    }

    /// Flush accumulated property changes and release the scope.
    pub fn close_directory(&mut self, scope: DirScope) -> WcResult<()> {
        let prop_changes = std::mem::take(&mut self.dir_mut(scope)?.prop_changes);
        if !prop_changes.is_empty() {
            let dir_path = self.dir(scope)?.path.clone();
            let lock = AdmLock::acquire(&dir_path)?;
            super::log::run_pending_log(&dir_path)?;

            let mut journal = LogJournal::new(&dir_path);
            props::merge_prop_diffs(&dir_path, None, &prop_changes, &mut journal)?;
            journal.push(LogOp::ModifyEntry {
                name: THIS_DIR.to_string(),
                fields: Box::new(super::log::LogEntryFields {
                    revision: Some(self.spec.target_revision),
                    ..Default::default()
                }),
            });
            if !props::props_modified(&dir_path)? {
                journal.push(LogOp::ModifyEntry {
                    name: THIS_DIR.to_string(),
                    fields: Box::new(super::log::LogEntryFields {
                        prop_time: Some(super::log::LogTime::Working),
                        ..Default::default()
                    }),
                });
            }
            journal.append_and_run()?;
            lock.release()?;
        }
        self.decrement_ref_count(scope.0)
    }

    fn decrement_ref_count(&mut self, ix: usize) -> WcResult<()> {
        let state = self.dirs[ix].as_mut().expect("directory scope open");
        state.ref_count -= 1;
        if state.ref_count > 0 {
            return Ok(());
        }

        let state = self.dirs[ix].take().expect("directory scope open");

        // Bump this directory to the target revision when it sits beneath
        // the update target; checkouts bump unconditionally.
        if self.is_checkout() || state.parent.is_some() {
            entries::modify_entry(
                &state.path,
                THIS_DIR,
                &EntryFields {
                    kind: Some(NodeKind::Dir),
                    schedule: Some(Schedule::Normal),
                    revision: Some(self.spec.target_revision),
                    ..Default::default()
                },
            )?;
        }

        // A freshly added directory is complete now, so its record can
        // appear in the parent's entries.
        if state.added {
            if let (Some(parent_ix), Some(name)) = (state.parent, &state.name) {
                let parent_path = self.dirs[parent_ix]
                    .as_ref()
                    .expect("parent scope open")
                    .path
                    .clone();
                entries::modify_entry(
                    &parent_path,
                    name,
                    &EntryFields {
                        kind: Some(NodeKind::Dir),
                        schedule: Some(Schedule::Normal),
                        ..Default::default()
                    },
                )?;
            }
        }

        match state.parent {
            Some(parent_ix) => self.decrement_ref_count(parent_ix),
            None => Ok(()),
        }
    }

    fn add_or_open_file(
        &mut self,
        name: &str,
        parent: DirScope,
        adding: bool,
    ) -> WcResult<FileScope> {
        let parent_state = self.dir(parent)?;
        let parent_path = parent_state.path.clone();
        let parent_url = parent_state.url.clone();
        let parent_disjoint = parent_state.disjoint_url;
        let path = parent_path.join(name);

        if !paths::is_working_copy(&parent_path) {
            return Err(WcError::ObstructedUpdate(parent_path));
        }
        let on_disk = fs::symlink_metadata(&path).is_ok();
        let entry = Entries::read(&parent_path)?.get(name).cloned();

        // Adding a file where something already lives on disk is an
        // obstruction; a leftover entries record without a working file
        // is not (the user deleted the file and is updating it back).
        if adding && on_disk {
            return Err(WcError::ObstructedUpdate(path));
        }
        if !adding && entry.is_none() {
            return Err(WcError::EntryNotFound(path));
        }

        // Disjointness is only meaningful against an existing recorded
        // URL; checkouts and adds telescope and cannot be disjoint.
        let (url, disjoint_url) = match &self.spec.mode {
            EditorMode::Checkout { .. } => (paths::url_join(&parent_url, name), false),
            _ if adding => (paths::url_join(&parent_url, name), false),
            _ => {
                let url = entry.and_then(|e| e.url).unwrap_or_default();
                let disjoint =
                    parent_disjoint || paths::url_join(&parent_url, name) != url;
                (url, disjoint)
            }
        };

        self.dirs[parent.0]
            .as_mut()
            .expect("parent scope open")
            .ref_count += 1;
        self.files.push(Some(FileState {
            parent: parent.0,
            name: name.to_string(),
            path,
            url,
            disjoint_url,
            text_changed: Rc::new(Cell::new(false)),
            prop_changes: Vec::new(),
        }));
        Ok(FileScope(self.files.len() - 1))
    }

    /// Add a file that must not yet exist on disk.
    pub fn add_file(
        &mut self,
        name: &str,
        parent: DirScope,
        copyfrom: Option<(String, u64)>,
    ) -> WcResult<FileScope> {
        if copyfrom.is_some() {
            return Err(WcError::UnsupportedFeature(format!(
                "copyfrom history on added file `{name}`"
            )));
        }
        self.add_or_open_file(name, parent, true)
    }

    /// Open an existing versioned file.
    pub fn open_file(
        &mut self,
        name: &str,
        parent: DirScope,
        _base_revision: Option<u64>,
    ) -> WcResult<FileScope> {
        self.add_or_open_file(name, parent, false)
    }

    /// Prepare to receive the file's new text as delta windows.
    ///
    /// Opens the pristine base for reading (absent on checkouts and for
    /// files that have no base yet) and the staging base for writing.
    pub fn apply_textdelta(&mut self, scope: FileScope) -> WcResult<WindowHandler> {
        let is_checkout = self.is_checkout();
        let state = self.file_mut(scope)?;
        let (parent_dir, name) = paths::split(&state.path);

        let source = if is_checkout {
            None
        } else {
            match fs::read(paths::text_base_path(&parent_dir, &name, false)) {
                Ok(bytes) => Some(bytes),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
                Err(err) => return Err(WcError::Io(err)),
            }
        };

        let dest_path = paths::text_base_path(&parent_dir, &name, true);
        if let Some(dir) = dest_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let dest = fs::File::create(&dest_path)?;

        Ok(WindowHandler::new(
            source,
            dest,
            dest_path,
            state.text_changed.clone(),
        ))
    }

    /// Queue a file property change for the install at close.
    pub fn change_file_prop(
        &mut self,
        scope: FileScope,
        name: &str,
        value: Option<&str>,
    ) -> WcResult<()> {
        self.file_mut(scope)?.prop_changes.push(PropChange {
            name: name.to_string(),
            value: value.map(str::to_string),
        });
        Ok(())
    }

    /// Hand the file to the installer and release the scope.
    pub fn close_file(&mut self, scope: FileScope) -> WcResult<()> {
        let state = self
            .files
            .get_mut(scope.0)
            .and_then(Option::take)
            .ok_or_else(|| WcError::UnsupportedFeature("file scope already closed".into()))?;

        let (parent_dir, name) = paths::split(&state.path);
        let new_text_base = if state.text_changed.get() {
            Some(paths::text_base_path(&parent_dir, &name, true))
        } else {
            None
        };
        let prop_changes = if state.prop_changes.is_empty() {
            None
        } else {
            Some(state.prop_changes.as_slice())
        };

        install_file(
            &state.path,
            self.spec.target_revision,
            new_text_base.as_deref(),
            prop_changes,
            false,
            None,
            &self.options,
        )?;

        self.decrement_ref_count(state.parent)
    }

    /// Finish the edit: bump everything under the anchor/target to the
    /// target revision, rewriting URLs when switching.
    pub fn close_edit(self) -> WcResult<()> {
        debug_assert!(
            self.dirs.iter().all(Option::is_none) && self.files.iter().all(Option::is_none),
            "close_edit with open scopes"
        );

        if self.is_checkout() {
            // A checkout wrote every URL and revision as it went.
            return Ok(());
        }

        let mut full_path = self.spec.anchor.clone();
        if let Some(target) = &self.spec.target {
            full_path.push(target);
        }
        let url = match &self.spec.mode {
            EditorMode::Switch { switch_url } => Some(switch_url.as_str()),
            _ => None,
        };
        update_cleanup(&full_path, self.spec.recurse, url, self.spec.target_revision)
    }
}

/// Recursively bump working revisions (and, when switching, URLs) after a
/// successful edit.
fn update_cleanup(path: &Path, recurse: bool, url: Option<&str>, revision: u64) -> WcResult<()> {
    if path.is_dir() && paths::is_working_copy(path) {
        return cleanup_dir(path, recurse, url, revision);
    }

    // A file target: fix up its record in the parent. An entry the edit
    // itself deleted stays gone.
    let (parent, name) = paths::split(path);
    if !paths::is_working_copy(&parent) {
        return Err(WcError::NotDirectory(parent));
    }
    if Entries::read(&parent)?.get(&name).is_none() {
        return Ok(());
    }
    entries::modify_entry(
        &parent,
        &name,
        &EntryFields {
            revision: Some(revision),
            url: url.map(str::to_string),
            ..Default::default()
        },
    )
}

fn cleanup_dir(dir: &Path, recurse: bool, url: Option<&str>, revision: u64) -> WcResult<()> {
    entries::modify_entry(
        dir,
        THIS_DIR,
        &EntryFields {
            revision: Some(revision),
            url: url.map(str::to_string),
            ..Default::default()
        },
    )?;

    let entries = Entries::read(dir)?;
    for (name, entry) in entries.iter() {
        if name == THIS_DIR {
            continue;
        }
        let child_url = url.map(|url| paths::url_join(url, name));
        match entry.kind {
            NodeKind::File => {
                entries::modify_entry(
                    dir,
                    name,
                    &EntryFields {
                        revision: Some(revision),
                        url: child_url,
                        ..Default::default()
                    },
                )?;
            }
            NodeKind::Dir => {
                let child = dir.join(name);
                if recurse && child.is_dir() && paths::is_working_copy(&child) {
                    cleanup_dir(&child, recurse, child_url.as_deref(), revision)?;
                }
            }
        }
    }
    Ok(())
}

/// Drive `handler` with a single full-text window and close the stream.
/// Convenience for senders that do not window their deltas.
pub fn send_full_text(handler: &mut WindowHandler, bytes: &[u8]) -> WcResult<()> {
    let window = super::delta::DeltaWindow::full_text(bytes);
    handler.apply(Some(&window))?;
    handler.apply(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_root_twice_is_a_protocol_error() {
        let temp = TempDir::new().unwrap();
        entries::ensure_wc(temp.path(), "http://host/repo", 1).unwrap();
        let mut editor = update_editor(temp.path(), None, 2, true);
        let root = editor.open_root(Some(1)).unwrap();
        assert!(editor.open_root(Some(1)).is_err());
        editor.close_directory(root).unwrap();
    }

    #[test]
    fn target_revision_is_fixed_once_the_root_opens() {
        let temp = TempDir::new().unwrap();
        entries::ensure_wc(temp.path(), "http://host/repo", 1).unwrap();
        let mut editor = update_editor(temp.path(), None, 1, true);
        editor.set_target_revision(2).unwrap();
        let root = editor.open_root(Some(1)).unwrap();
        assert!(editor.set_target_revision(3).is_err());
        editor.close_directory(root).unwrap();
    }

    #[test]
    fn add_directory_rejects_copyfrom_before_touching_disk() {
        let temp = TempDir::new().unwrap();
        entries::ensure_wc(temp.path(), "http://host/repo", 1).unwrap();
        let mut editor = update_editor(temp.path(), None, 2, true);
        let root = editor.open_root(Some(1)).unwrap();
        let err = editor
            .add_directory("d", root, Some(("http://host/repo/src".into(), 1)))
            .unwrap_err();
        assert!(matches!(err, WcError::UnsupportedFeature(_)));
        assert!(!temp.path().join("d").exists());
        editor.close_directory(root).unwrap();
    }

    #[test]
    fn open_directory_requires_a_versioned_child() {
        let temp = TempDir::new().unwrap();
        entries::ensure_wc(temp.path(), "http://host/repo", 1).unwrap();
        let mut editor = update_editor(temp.path(), None, 2, true);
        let root = editor.open_root(Some(1)).unwrap();
        assert!(matches!(
            editor.open_directory("ghost", root, None),
            Err(WcError::EntryNotFound(_))
        ));
        editor.close_directory(root).unwrap();
    }
}
