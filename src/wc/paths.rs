//! Admin-area layout under each versioned directory.
//!
//! Every versioned directory carries a `.strata/` subdirectory holding the
//! entries file, pristine text and property bases, staging space, the
//! pending-operation log and the lock sentinel. All admin path
//! construction goes through these helpers.

use std::path::{Path, PathBuf};

pub const ADM_DIR: &str = ".strata";
pub const ADM_ENTRIES: &str = "entries.json";
pub const ADM_LOG: &str = "log";
pub const ADM_LOCK: &str = "lock";

/// The admin directory of a versioned directory.
pub fn adm_dir(dir: &Path) -> PathBuf {
    dir.join(ADM_DIR)
}

pub fn entries_path(dir: &Path) -> PathBuf {
    adm_dir(dir).join(ADM_ENTRIES)
}

pub fn log_path(dir: &Path) -> PathBuf {
    adm_dir(dir).join(ADM_LOG)
}

pub fn lock_path(dir: &Path) -> PathBuf {
    adm_dir(dir).join(ADM_LOCK)
}

/// Scratch space for patch intermediates.
pub fn tmp_dir(dir: &Path) -> PathBuf {
    adm_dir(dir).join("tmp")
}

/// Pristine bytes of the file `name`, or its staging slot when `tmp`.
pub fn text_base_path(dir: &Path, name: &str, tmp: bool) -> PathBuf {
    let base = format!("{name}.base");
    if tmp {
        tmp_dir(dir).join("text-base").join(base)
    } else {
        adm_dir(dir).join("text-base").join(base)
    }
}

/// Working or pristine property list of the file `name`.
pub fn prop_path(dir: &Path, name: &str, base: bool) -> PathBuf {
    let file = format!("{name}.json");
    if base {
        adm_dir(dir).join("prop-base").join(file)
    } else {
        adm_dir(dir).join("props").join(file)
    }
}

/// Working or pristine property list of the directory itself.
pub fn dir_prop_path(dir: &Path, base: bool) -> PathBuf {
    if base {
        adm_dir(dir).join("dir-prop-base.json")
    } else {
        adm_dir(dir).join("dir-props.json")
    }
}

/// The wc-prop store for the file `name`, or for the directory itself.
pub fn wcprop_path(dir: &Path, name: Option<&str>) -> PathBuf {
    match name {
        Some(name) => adm_dir(dir).join("wcprops").join(format!("{name}.json")),
        None => adm_dir(dir).join("dir-wcprops.json"),
    }
}

/// True iff `dir` carries an admin area.
pub fn is_working_copy(dir: &Path) -> bool {
    entries_path(dir).is_file()
}

/// Express `path` relative to `dir` for use inside that directory's log.
pub fn rel_to_dir(dir: &Path, path: &Path) -> String {
    match path.strip_prefix(dir) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// Split a path into its parent directory and basename.
pub fn split(path: &Path) -> (PathBuf, String) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (parent, name)
}

/// Join a URL and a path component.
pub fn url_join(url: &str, name: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    format!("{trimmed}/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_defaults_parent_to_dot() {
        let (parent, name) = split(Path::new("x"));
        assert_eq!(parent, PathBuf::from("."));
        assert_eq!(name, "x");

        let (parent, name) = split(Path::new("a/b/c"));
        assert_eq!(parent, PathBuf::from("a/b"));
        assert_eq!(name, "c");
    }

    #[test]
    fn url_join_normalizes_trailing_slash() {
        assert_eq!(url_join("http://host/repo/", "x"), "http://host/repo/x");
        assert_eq!(url_join("http://host/repo", "x"), "http://host/repo/x");
    }
}
