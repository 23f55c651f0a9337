//! Line-ending and keyword translation between repository-normal form
//! and working form.
//!
//! Repository-normal form is LF line endings with keywords contracted
//! (`$Revision$`). Translating toward the working copy expands keywords
//! and applies the target line-ending style; detranslating reverses both,
//! which is also how local text modifications are detected.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::entries::{self, Entry};
use super::error::{WcError, WcResult};
use super::paths;
use super::props;

#[cfg(windows)]
pub const NATIVE_EOL: &str = "\r\n";
#[cfg(not(windows))]
pub const NATIVE_EOL: &str = "\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EolStyle {
    /// No line-ending handling at all.
    None,
    /// The platform's native marker.
    Native,
    /// One fixed marker, whatever the platform.
    Fixed,
}

/// Interpret an `eol-style` property value. Unknown values disable
/// translation.
pub fn eol_style_from_value(value: Option<&str>) -> (EolStyle, Option<&'static str>) {
    match value {
        Some("native") => (EolStyle::Native, Some(NATIVE_EOL)),
        Some("LF") => (EolStyle::Fixed, Some("\n")),
        Some("CR") => (EolStyle::Fixed, Some("\r")),
        Some("CRLF") => (EolStyle::Fixed, Some("\r\n")),
        _ => (EolStyle::None, None),
    }
}

/// Decode the encoded eol name a log command carries.
pub fn eol_bytes_from_name(name: &str) -> Option<&'static str> {
    match name {
        "native" => Some(NATIVE_EOL),
        "LF" => Some("\n"),
        "CR" => Some("\r"),
        "CRLF" => Some("\r\n"),
        _ => None,
    }
}

/// Keyword expansion values. A field being `Some` means the keyword is
/// active; the string is what it expands to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keywords {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Keywords {
    pub fn is_empty(&self) -> bool {
        self.revision.is_none()
            && self.date.is_none()
            && self.author.is_none()
            && self.url.is_none()
    }

    fn value_for(&self, keyword: &str) -> Option<&str> {
        match keyword {
            "Revision" | "Rev" | "LastChangedRevision" => self.revision.as_deref(),
            "Date" | "LastChangedDate" => self.date.as_deref(),
            "Author" | "LastChangedBy" => self.author.as_deref(),
            "URL" | "HeadURL" => self.url.as_deref(),
            _ => None,
        }
    }
}

/// Build the active keyword set from a `keywords` property value,
/// populating expansion values from the entry and the entry URL.
pub fn build_keywords(value: &str, entry: Option<&Entry>, url: Option<&str>) -> Option<Keywords> {
    let mut keywords = Keywords::default();
    for word in value.split_whitespace() {
        match word {
            "Revision" | "Rev" | "LastChangedRevision" => {
                keywords.revision = Some(
                    entry
                        .and_then(|e| e.committed_rev.clone())
                        .unwrap_or_default(),
                );
            }
            "Date" | "LastChangedDate" => {
                keywords.date = Some(
                    entry
                        .and_then(|e| e.committed_date.clone())
                        .unwrap_or_default(),
                );
            }
            "Author" | "LastChangedBy" => {
                keywords.author = Some(
                    entry
                        .and_then(|e| e.last_author.clone())
                        .unwrap_or_default(),
                );
            }
            "URL" | "HeadURL" => {
                keywords.url = Some(url.map(str::to_string).unwrap_or_default());
            }
            other => {
                tracing::debug!("ignoring unknown keyword `{other}`");
            }
        }
    }
    if keywords.is_empty() {
        None
    } else {
        Some(keywords)
    }
}

/// The effective eol style of a versioned file, from its working props.
pub fn get_eol_style(path: &Path) -> WcResult<(EolStyle, Option<&'static str>)> {
    let props = props::working_props(path)?;
    Ok(eol_style_from_value(
        props.get(props::PROP_EOL_STYLE).map(String::as_str),
    ))
}

/// The effective keyword set of a versioned file. `explicit` overrides the
/// working `keywords` property (used when a fresh value has arrived but is
/// not installed yet).
pub fn get_keywords(path: &Path, explicit: Option<&str>) -> WcResult<Option<Keywords>> {
    let value = match explicit {
        Some(value) => Some(value.to_string()),
        None => props::working_props(path)?
            .get(props::PROP_KEYWORDS)
            .cloned(),
    };
    let Some(value) = value else {
        return Ok(None);
    };
    let entry = entries::read_entry(path)?;
    let url = entry.as_ref().and_then(|e| e.url.clone());
    Ok(build_keywords(&value, entry.as_ref(), url.as_deref()))
}

const MAX_KEYWORD_LEN: usize = 255;

fn translate_eol(src: &[u8], eol: &str, repair: bool, path: &Path) -> WcResult<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len());
    let mut seen: Option<&'static str> = None;
    let mut i = 0;
    while i < src.len() {
        let marker = match src[i] {
            b'\r' if src.get(i + 1) == Some(&b'\n') => Some(("\r\n", 2)),
            b'\r' => Some(("\r", 1)),
            b'\n' => Some(("\n", 1)),
            _ => None,
        };
        match marker {
            Some((found, len)) => {
                match seen {
                    None => seen = Some(found),
                    Some(first) if first != found && !repair => {
                        return Err(WcError::InconsistentEol(path.to_path_buf()));
                    }
                    _ => {}
                }
                out.extend_from_slice(eol.as_bytes());
                i += len;
            }
            None => {
                out.push(src[i]);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn substitute_keywords(src: &[u8], keywords: &Keywords, expand: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        if src[i] != b'$' {
            out.push(src[i]);
            i += 1;
            continue;
        }
        // A candidate keyword: `$Name$` or `$Name: value $`.
        let rest = &src[i + 1..];
        let name_end = rest
            .iter()
            .take(MAX_KEYWORD_LEN)
            .position(|&b| b == b'$' || b == b':');
        let Some(name_end) = name_end else {
            out.push(src[i]);
            i += 1;
            continue;
        };
        let name = match std::str::from_utf8(&rest[..name_end]) {
            Ok(name) => name,
            Err(_) => {
                out.push(src[i]);
                i += 1;
                continue;
            }
        };
        let Some(value) = keywords.value_for(name) else {
            out.push(src[i]);
            i += 1;
            continue;
        };

        let close = if rest[name_end] == b'$' {
            Some(name_end)
        } else {
            // `$Name: ...$` — find the closing dollar.
            rest[name_end..]
                .iter()
                .take(MAX_KEYWORD_LEN)
                .position(|&b| b == b'$')
                .map(|offset| name_end + offset)
        };
        let Some(close) = close else {
            out.push(src[i]);
            i += 1;
            continue;
        };

        if expand {
            out.extend_from_slice(format!("${name}: {value} $").as_bytes());
        } else {
            out.extend_from_slice(format!("${name}$").as_bytes());
        }
        i += 1 + close + 1;
    }
    out
}

/// Translate `src`: normalize line endings to `eol` (when given) and
/// expand or contract the active keywords.
pub fn translate_bytes(
    src: &[u8],
    eol: Option<&str>,
    repair: bool,
    keywords: Option<&Keywords>,
    expand: bool,
    path: &Path,
) -> WcResult<Vec<u8>> {
    let mut bytes = match eol {
        Some(eol) => translate_eol(src, eol, repair, path)?,
        None => src.to_vec(),
    };
    if let Some(keywords) = keywords {
        if !keywords.is_empty() {
            bytes = substitute_keywords(&bytes, keywords, expand);
        }
    }
    Ok(bytes)
}

/// Copy `src` to `dst`, translating on the way.
pub fn copy_and_translate(
    src: &Path,
    dst: &Path,
    eol: Option<&str>,
    repair: bool,
    keywords: Option<&Keywords>,
    expand: bool,
) -> WcResult<()> {
    let bytes = fs::read(src)?;
    let translated = translate_bytes(&bytes, eol, repair, keywords, expand, src)?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dst, translated)?;
    Ok(())
}

/// A file's working bytes in repository-normal form: LF line endings,
/// keywords contracted.
pub fn detranslated_working(path: &Path) -> WcResult<Vec<u8>> {
    let bytes = fs::read(path)?;
    let keywords = get_keywords(path, None)?;
    translate_bytes(&bytes, Some("\n"), true, keywords.as_ref(), false, path)
}

/// True iff the working file's text differs from its pristine base.
///
/// The recorded text timestamp short-circuits the comparison; otherwise
/// the working bytes are detranslated and compared with the base.
pub fn text_modified(path: &Path) -> WcResult<bool> {
    let (parent, name) = paths::split(path);
    let base = paths::text_base_path(&parent, &name, false);
    if !base.is_file() {
        return Ok(path.exists());
    }
    if !path.is_file() {
        return Ok(true);
    }

    if let Some(entry) = entries::read_entry(path)? {
        if entry.text_time.is_some() && entry.text_time == entries::mtime_ms(path)? {
            return Ok(false);
        }
    }

    let working = detranslated_working(path)?;
    let pristine = fs::read(&base)?;
    Ok(working != pristine)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw() -> Keywords {
        Keywords {
            revision: Some("42".into()),
            date: None,
            author: Some("alice".into()),
            url: None,
        }
    }

    #[test]
    fn eol_translation_normalizes_markers() {
        let out = translate_eol(b"a\r\nb\rc\n", "\n", true, Path::new("t")).unwrap();
        assert_eq!(out, b"a\nb\nc\n");
        let out = translate_eol(b"a\nb\n", "\r\n", false, Path::new("t")).unwrap();
        assert_eq!(out, b"a\r\nb\r\n");
    }

    #[test]
    fn mixed_eols_error_without_repair() {
        let err = translate_eol(b"a\r\nb\n", "\n", false, Path::new("t")).unwrap_err();
        assert!(matches!(err, WcError::InconsistentEol(_)));
    }

    #[test]
    fn keywords_expand_and_contract() {
        let kw = kw();
        let expanded = substitute_keywords(b"rev $Revision$ by $Author$\n", &kw, true);
        assert_eq!(expanded, b"rev $Revision: 42 $ by $Author: alice $\n");

        let contracted = substitute_keywords(&expanded, &kw, false);
        assert_eq!(contracted, b"rev $Revision$ by $Author$\n");
    }

    #[test]
    fn stale_expansion_is_refreshed() {
        let kw = kw();
        let out = substitute_keywords(b"$Revision: 7 $\n", &kw, true);
        assert_eq!(out, b"$Revision: 42 $\n");
    }

    #[test]
    fn inactive_keywords_pass_through() {
        let kw = kw();
        let text = b"$Date$ and $Nonsense$ and $$\n".to_vec();
        let out = substitute_keywords(&text, &kw, true);
        assert_eq!(out, text);
    }

    #[test]
    fn keyword_set_parses_aliases() {
        let kw = build_keywords("Rev HeadURL", None, Some("http://host/f")).unwrap();
        assert_eq!(kw.revision.as_deref(), Some(""));
        assert_eq!(kw.url.as_deref(), Some("http://host/f"));
        assert!(kw.date.is_none());
        assert!(build_keywords("Bogus", None, None).is_none());
    }
}
