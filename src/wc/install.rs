//! Integrating a new revision of a file into the working copy.
//!
//! Called for each file close (and directly when switching a single
//! file). Everything after the lock is expressed as journal operations so
//! that a crash at any point is recovered by replaying the log.
//!
//! The textual part implements the merge matrix:
//!
//! ```text
//!               text file            binary file
//!   local mods  diff/patch merge     back up working file,
//!                                    copy new base out
//!   no mods     overwrite the working file from the new base
//! ```

use std::fs;
use std::io;
use std::path::Path;

use super::entries;
use super::error::{WcError, WcResult};
use super::lock::AdmLock;
use super::log::{LogEntryFields, LogJournal, LogOp, LogTime};
use super::paths;
use super::props::{self, PropChange};
use super::textdiff;
use super::translate::{self, EolStyle, Keywords};
use crate::fs::NodeKind;

#[derive(Clone, Debug)]
pub struct InstallOptions {
    /// Context lines around each hunk of the merge patch.
    pub diff_context: usize,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self { diff_context: 3 }
    }
}

/// Reserve a fresh file named `base` (or `base.N`) inside `dir`,
/// creating it empty.
fn reserve_unique(dir: &Path, base: &str) -> WcResult<String> {
    for counter in 0u32.. {
        let candidate = if counter == 0 {
            base.to_string()
        } else {
            format!("{base}.{counter}")
        };
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&candidate))
        {
            Ok(_) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(WcError::Io(err)),
        }
    }
    unreachable!("u32 counter space exhausted");
}

/// The freshest incoming value of a regular property, if any change names
/// it. Changes apply in arrival order, so the last one wins.
fn fresh_value<'a>(changes: &'a [PropChange], name: &str) -> Option<&'a PropChange> {
    changes.iter().rev().find(|change| change.name == name)
}

/// Integrate a new revision of `file_path` into the working copy.
///
/// `new_text_base` is the staged new pristine text (`None` means the text
/// did not change). `props` is either a full property list or a diff,
/// per `is_full_proplist`. `new_url` overrides the entry URL (a switch);
/// otherwise the URL stays derived from the parent.
pub fn install_file(
    file_path: &Path,
    new_revision: u64,
    new_text_base: Option<&Path>,
    props: Option<&[PropChange]>,
    is_full_proplist: bool,
    new_url: Option<&str>,
    options: &InstallOptions,
) -> WcResult<()> {
    let (parent, name) = paths::split(file_path);

    let lock = AdmLock::acquire(&parent)?;
    super::log::run_pending_log(&parent)?;

    let mut journal = LogJournal::new(&parent);

    // Partition the incoming property list by kind.
    let (entry_props, wc_props, regular_props) = match props {
        Some(props) => props::partition_props(props),
        None => Default::default(),
    };

    // Merge regular props, turning a definitive list into a diff first.
    let mut prop_conflicts = Default::default();
    let mut regular_changes = regular_props.clone();
    if props.is_some() {
        if is_full_proplist {
            let old_pristine =
                props::load_props(&paths::prop_path(&parent, &name, true))?;
            let mut new_pristine = props::PropMap::new();
            for change in &regular_props {
                if let Some(value) = &change.value {
                    new_pristine.insert(change.name.clone(), value.clone());
                }
            }
            regular_changes = props::prop_diffs(&new_pristine, &old_pristine);
        }
        prop_conflicts =
            props::merge_prop_diffs(&parent, Some(name.as_str()), &regular_changes, &mut journal)?;
    }

    // Entry props become entry attributes. A missing value means the
    // information was unavailable; the field is kept, just empty.
    let mut entry_fields = LogEntryFields::default();
    for prop in &entry_props {
        let value = prop.value.clone().unwrap_or_default();
        match props::strip_prop_prefix(&prop.name) {
            "committed-rev" => entry_fields.committed_rev = Some(value),
            "committed-date" => entry_fields.committed_date = Some(value),
            "last-author" => entry_fields.last_author = Some(value),
            other => tracing::debug!("ignoring unknown entry prop `{other}`"),
        }
    }
    let have_entry_props = entry_fields != LogEntryFields::default();
    if have_entry_props {
        journal.push(LogOp::ModifyEntry {
            name: name.clone(),
            fields: Box::new(entry_fields.clone()),
        });
    }

    let mut is_locally_modified = false;
    if let Some(new_text_path) = new_text_base {
        // Text or binary? Prefer the freshly arrived mime-type.
        let mime = match fresh_value(&regular_changes, props::PROP_MIME_TYPE) {
            Some(change) => change.value.clone(),
            None => props::working_props(file_path)?
                .get(props::PROP_MIME_TYPE)
                .cloned(),
        };
        let has_binary_prop = mime
            .as_deref()
            .map(|value| !value.starts_with("text/"))
            .unwrap_or(false);

        // Local mods are judged against the *old* props; the merged ones
        // are not installed until the log runs.
        is_locally_modified = translate::text_modified(file_path)?;

        // Effective eol-style: the fresh value unless it conflicted, in
        // which case the locally modified value stays in charge.
        let eol_value = match fresh_value(&regular_changes, props::PROP_EOL_STYLE) {
            Some(change) if !prop_conflicts.contains_key(props::PROP_EOL_STYLE) => {
                change.value.clone()
            }
            _ => props::working_props(file_path)?
                .get(props::PROP_EOL_STYLE)
                .cloned(),
        };
        let (eol_style, _) = translate::eol_style_from_value(eol_value.as_deref());

        // Same rule for the keyword set.
        let keyword_value = match fresh_value(&regular_changes, props::PROP_KEYWORDS) {
            Some(change) if !prop_conflicts.contains_key(props::PROP_KEYWORDS) => {
                change.value.clone()
            }
            _ => props::working_props(file_path)?
                .get(props::PROP_KEYWORDS)
                .cloned(),
        };

        // The URL a keyword expands to: the switch override, or derived
        // from the parent since the entry may not exist on disk yet.
        let derived_url = match new_url {
            Some(url) => Some(url.to_string()),
            None => entries::Entries::read(&parent)?
                .this_dir()
                .and_then(|this_dir| this_dir.url.as_deref().map(|u| paths::url_join(u, &name))),
        };

        let entry = entries::read_entry(file_path)?;
        let mut keywords = keyword_value
            .and_then(|value| translate::build_keywords(&value, entry.as_ref(), derived_url.as_deref()));

        // Values may be stale: the freshest committed-rev/date/author just
        // arrived in the entry props.
        if let Some(kw) = keywords.as_mut() {
            if kw.revision.is_some() && entry_fields.committed_rev.is_some() {
                kw.revision = entry_fields.committed_rev.clone();
            }
            if kw.date.is_some() && entry_fields.committed_date.is_some() {
                kw.date = entry_fields.committed_date.clone();
            }
            if kw.author.is_some() && entry_fields.last_author.is_some() {
                kw.author = entry_fields.last_author.clone();
            }
            if kw.url.is_some() {
                kw.url = Some(derived_url.clone().unwrap_or_default());
            }
        }

        // The log can only reference paths under the parent, so the new
        // text base moves into the staging area first.
        let tmp_txtb_full = paths::text_base_path(&parent, &name, true);
        if new_text_path != tmp_txtb_full {
            if let Some(dir) = tmp_txtb_full.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::rename(new_text_path, &tmp_txtb_full)?;
        }

        let txtb = paths::rel_to_dir(&parent, &paths::text_base_path(&parent, &name, false));
        let tmp_txtb = paths::rel_to_dir(&parent, &tmp_txtb_full);

        journal.push(LogOp::Mv {
            name: tmp_txtb,
            dest: txtb.clone(),
        });

        let overwrite_working = LogOp::Cp {
            name: txtb.clone(),
            dest: name.clone(),
            eol: eol_value.clone(),
            repair: false,
            keywords: keywords.clone(),
            expand: true,
        };

        if !is_locally_modified {
            journal.push(overwrite_working);
        } else if has_binary_prop {
            // Binary with local mods: move the local version aside, then
            // take the new base.
            let backup = reserve_unique(&parent, &format!("{name}.orig"))?;
            journal.push(LogOp::Cp {
                name: name.clone(),
                dest: backup,
                eol: None,
                repair: false,
                keywords: None,
                expand: false,
            });
            journal.push(LogOp::Cp {
                name: txtb.clone(),
                dest: name.clone(),
                eol: None,
                repair: false,
                keywords: None,
                expand: false,
            });
        } else if !file_path.exists() {
            // Locally "modified" only because the working file is gone:
            // restore it from the new base.
            journal.push(overwrite_working);
        } else {
            // The hard case: contextually merge the incoming change into
            // the locally modified text.
            merge_locally_modified_text(
                &parent,
                &name,
                eol_style,
                eol_value.as_deref(),
                keywords.as_ref(),
                options,
                &mut journal,
            )?;
        }

        journal.push(LogOp::Readonly { name: txtb });
    }

    // Bump the entry to the new revision.
    journal.push(LogOp::ModifyEntry {
        name: name.clone(),
        fields: Box::new(LogEntryFields {
            kind: Some(NodeKind::File),
            revision: Some(new_revision),
            ..Default::default()
        }),
    });

    if new_text_base.is_some() && !is_locally_modified {
        journal.push(LogOp::ModifyEntry {
            name: name.clone(),
            fields: Box::new(LogEntryFields {
                text_time: Some(LogTime::Working),
                ..Default::default()
            }),
        });
    }

    if props.is_some() && !props::props_modified(file_path)? {
        journal.push(LogOp::ModifyEntry {
            name: name.clone(),
            fields: Box::new(LogEntryFields {
                prop_time: Some(LogTime::Working),
                ..Default::default()
            }),
        });
    }

    if let Some(url) = new_url {
        journal.push(LogOp::ModifyEntry {
            name: name.clone(),
            fields: Box::new(LogEntryFields {
                url: Some(url.to_string()),
                ..Default::default()
            }),
        });
    }

    journal.append_and_run()?;

    // The wc props are not part of the journaled state; they land once
    // the text, props and entry are fully installed.
    for prop in &wc_props {
        props::wcprop_set(
            &parent,
            Some(name.as_str()),
            props::strip_prop_prefix(&prop.name),
            prop.value.as_deref(),
        )?;
    }

    lock.release()?;
    Ok(())
}

/// Produce the journal commands merging the incoming text change into a
/// locally modified text file.
///
/// The patch is always generated between LF-normalized, keyword-contracted
/// copies of the old and new bases, so it applies cleanly to a working
/// file brought into the same form.
fn merge_locally_modified_text(
    parent: &Path,
    name: &str,
    eol_style: EolStyle,
    eol_value: Option<&str>,
    keywords: Option<&Keywords>,
    options: &InstallOptions,
    journal: &mut LogJournal,
) -> WcResult<()> {
    let txtb_full = paths::text_base_path(parent, name, false);
    let tmp_txtb_full = paths::text_base_path(parent, name, true);
    let tmp = paths::tmp_dir(parent);
    fs::create_dir_all(&tmp)?;

    // Translated copies of both bases, diffed immediately; the log only
    // cleans them up.
    let tr_txtb = tmp.join(format!("{name}.old.base"));
    let tr_tmp_txtb = tmp.join(format!("{name}.new.base"));
    translate::copy_and_translate(&txtb_full, &tr_txtb, Some("\n"), true, keywords, false)?;
    translate::copy_and_translate(&tmp_txtb_full, &tr_tmp_txtb, Some("\n"), true, keywords, false)?;

    let old_text = String::from_utf8_lossy(&fs::read(&tr_txtb)?).into_owned();
    let new_text = String::from_utf8_lossy(&fs::read(&tr_tmp_txtb)?).into_owned();
    let hunks = textdiff::diff_lines(&old_text, &new_text, options.diff_context);

    let patch_file_full = tmp.join(format!("{name}.diff"));
    fs::write(&patch_file_full, textdiff::format_patch(&hunks))?;

    journal.push(LogOp::Rm {
        name: paths::rel_to_dir(parent, &tr_txtb),
    });
    journal.push(LogOp::Rm {
        name: paths::rel_to_dir(parent, &tr_tmp_txtb),
    });

    let reject_file = reserve_unique(parent, &format!("{name}.rej"))?;
    let patch_file = paths::rel_to_dir(parent, &patch_file_full);

    if eol_style == EolStyle::None && keywords.is_none() {
        // The working file already is in LF form; patch it directly.
        journal.push(LogOp::Patch {
            name: name.to_string(),
            patch_file: patch_file.clone(),
            reject_file: reject_file.clone(),
        });
    } else {
        // Bring a copy of the working file into patchable form, patch it,
        // and translate it back. The working file has the eol prop set,
        // so normalizing mixed endings here is a deliberate one-way
        // repair.
        let tmp_working = paths::rel_to_dir(parent, &tmp.join(format!("{name}.tmp-working")));
        journal.push(LogOp::Cp {
            name: name.to_string(),
            dest: tmp_working.clone(),
            eol: Some("LF".to_string()),
            repair: true,
            keywords: keywords.cloned(),
            expand: false,
        });
        journal.push(LogOp::Patch {
            name: tmp_working.clone(),
            patch_file: patch_file.clone(),
            reject_file: reject_file.clone(),
        });
        journal.push(LogOp::Cp {
            name: tmp_working.clone(),
            dest: name.to_string(),
            eol: eol_value.map(str::to_string),
            repair: false,
            keywords: keywords.cloned(),
            expand: true,
        });
        journal.push(LogOp::Rm { name: tmp_working });
    }

    journal.push(LogOp::Rm { name: patch_file });
    journal.push(LogOp::DetectConflict {
        name: name.to_string(),
        reject_file,
    });
    Ok(())
}
