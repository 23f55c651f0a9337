//! In-process line diff and patch.
//!
//! The installer merges incoming text changes into locally modified files
//! by diffing the old and new pristine bases and applying the resulting
//! hunks to the working file. Both sides of that exchange live here: a
//! line-based LCS diff producing context hunks in unified form, and an
//! applier with offset search whose failed hunks go to a reject buffer.
//! Re-applying a hunk whose result is already in place is a no-op, which
//! is what makes log replay idempotent across a crash mid-patch.

use std::fmt::Write as _;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based first line of the hunk in the old text.
    pub old_start: usize,
    /// 1-based first line of the hunk in the new text.
    pub new_start: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(text) | HunkLine::Remove(text) => Some(text.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(text) | HunkLine::Add(text) => Some(text.as_str()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.strip_suffix('\n').unwrap_or(text).split('\n').collect()
}

fn join_lines(lines: &[String], trailing_newline: bool) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EditOp {
    Keep,
    Remove,
    Add,
}

/// Edit script from `old` to `new`, via the classic LCS table with
/// common prefix/suffix trimming.
fn edit_script(old: &[&str], new: &[&str]) -> Vec<EditOp> {
    let mut prefix = 0;
    while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old.len() - prefix
        && suffix < new.len() - prefix
        && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let a = &old[prefix..old.len() - suffix];
    let b = &new[prefix..new.len() - suffix];

    let mut table = vec![vec![0u32; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut ops = vec![EditOp::Keep; prefix];
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            ops.push(EditOp::Keep);
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push(EditOp::Remove);
            i += 1;
        } else {
            ops.push(EditOp::Add);
            j += 1;
        }
    }
    ops.extend(std::iter::repeat(EditOp::Remove).take(a.len() - i));
    ops.extend(std::iter::repeat(EditOp::Add).take(b.len() - j));
    ops.extend(std::iter::repeat(EditOp::Keep).take(suffix));
    ops
}

/// Diff two texts into context hunks.
pub fn diff_lines(old: &str, new: &str, context: usize) -> Vec<Hunk> {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let ops = edit_script(&old_lines, &new_lines);

    // Mark which op indices are "interesting": changes plus surrounding
    // context, then group runs into hunks.
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;
    let mut pending_context: Vec<(usize, usize)> = Vec::new();
    let (mut oi, mut ni) = (0usize, 0usize);
    let mut quiet = 0usize;

    for op in ops {
        match op {
            EditOp::Keep => {
                if let Some(hunk) = current.as_mut() {
                    quiet += 1;
                    if quiet <= context {
                        hunk.lines
                            .push(HunkLine::Context(old_lines[oi].to_string()));
                    } else if quiet == context + 1 {
                        // The hunk is done once we are past the trailing
                        // context window.
                        hunks.push(current.take().expect("current hunk"));
                        pending_context.clear();
                        pending_context.push((oi, ni));
                    }
                } else {
                    pending_context.push((oi, ni));
                    if pending_context.len() > context {
                        pending_context.remove(0);
                    }
                }
                oi += 1;
                ni += 1;
            }
            EditOp::Remove | EditOp::Add => {
                if current.is_none() {
                    let (start_old, start_new) = pending_context
                        .first()
                        .copied()
                        .unwrap_or((oi, ni));
                    let mut hunk = Hunk {
                        old_start: start_old + 1,
                        new_start: start_new + 1,
                        lines: Vec::new(),
                    };
                    for &(coi, _) in &pending_context {
                        hunk.lines
                            .push(HunkLine::Context(old_lines[coi].to_string()));
                    }
                    pending_context.clear();
                    current = Some(hunk);
                }
                quiet = 0;
                let hunk = current.as_mut().expect("current hunk");
                match op {
                    EditOp::Remove => {
                        hunk.lines.push(HunkLine::Remove(old_lines[oi].to_string()));
                        oi += 1;
                    }
                    EditOp::Add => {
                        hunk.lines.push(HunkLine::Add(new_lines[ni].to_string()));
                        ni += 1;
                    }
                    EditOp::Keep => unreachable!(),
                }
            }
        }
    }
    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }
    hunks
}

fn hunk_header(hunk: &Hunk) -> String {
    let old_count = hunk.old_lines().len();
    let new_count = hunk.new_lines().len();
    format!(
        "@@ -{},{} +{},{} @@",
        hunk.old_start, old_count, hunk.new_start, new_count
    )
}

/// Serialize hunks in unified form.
pub fn format_patch(hunks: &[Hunk]) -> String {
    let mut out = String::new();
    for hunk in hunks {
        let _ = writeln!(out, "{}", hunk_header(hunk));
        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) => {
                    let _ = writeln!(out, " {text}");
                }
                HunkLine::Remove(text) => {
                    let _ = writeln!(out, "-{text}");
                }
                HunkLine::Add(text) => {
                    let _ = writeln!(out, "+{text}");
                }
            }
        }
    }
    out
}

/// Parse a unified patch back into hunks.
pub fn parse_patch(text: &str) -> Result<Vec<Hunk>, String> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;
    for line in text.lines() {
        if let Some(header) = line.strip_prefix("@@ -") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            // "old_start,old_count +new_start,new_count @@"
            let body = header
                .strip_suffix(" @@")
                .ok_or_else(|| format!("malformed hunk header `{line}`"))?;
            let (old_part, new_part) = body
                .split_once(" +")
                .ok_or_else(|| format!("malformed hunk header `{line}`"))?;
            let old_start = old_part
                .split(',')
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| format!("malformed hunk header `{line}`"))?;
            let new_start = new_part
                .split(',')
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| format!("malformed hunk header `{line}`"))?;
            current = Some(Hunk {
                old_start,
                new_start,
                lines: Vec::new(),
            });
            continue;
        }
        let hunk = current
            .as_mut()
            .ok_or_else(|| format!("hunk line outside hunk: `{line}`"))?;
        if let Some(text) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(text.to_string()));
        } else if let Some(text) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Remove(text.to_string()));
        } else if let Some(text) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Add(text.to_string()));
        } else if line.is_empty() {
            hunk.lines.push(HunkLine::Context(String::new()));
        } else {
            return Err(format!("unrecognized patch line `{line}`"));
        }
    }
    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }
    Ok(hunks)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    pub text: String,
    pub rejects: String,
    pub applied: usize,
    pub already_applied: usize,
    pub rejected: usize,
}

fn matches_at(target: &[String], at: usize, expected: &[&str]) -> bool {
    if at + expected.len() > target.len() {
        return false;
    }
    expected
        .iter()
        .zip(&target[at..at + expected.len()])
        .all(|(want, have)| *want == have.as_str())
}

fn find_near(target: &[String], guess: usize, expected: &[&str]) -> Option<usize> {
    if expected.is_empty() {
        return Some(guess.min(target.len()));
    }
    let limit = target.len();
    for distance in 0..=limit {
        if guess >= distance && matches_at(target, guess - distance, expected) {
            return Some(guess - distance);
        }
        if distance > 0 && guess + distance <= limit && matches_at(target, guess + distance, expected) {
            return Some(guess + distance);
        }
    }
    None
}

/// How many context lines may be shaved off each end of a hunk before
/// giving up on placing it.
const MAX_FUZZ: usize = 2;

/// The hunk's old/new sides with `fuzz` context lines trimmed from each
/// end (only context, never a change). `None` when this fuzz level trims
/// nothing new.
fn fuzzed_sides(hunk: &Hunk, fuzz: usize) -> Option<(Vec<&str>, Vec<&str>, usize)> {
    let leading = hunk
        .lines
        .iter()
        .take_while(|line| matches!(line, HunkLine::Context(_)))
        .count();
    let trailing = hunk
        .lines
        .iter()
        .rev()
        .take_while(|line| matches!(line, HunkLine::Context(_)))
        .count()
        .min(hunk.lines.len() - leading);

    let lead = fuzz.min(leading);
    let trail = fuzz.min(trailing);
    if fuzz > 0 && lead < fuzz && trail < fuzz {
        return None;
    }

    let kept = &hunk.lines[lead..hunk.lines.len() - trail];
    let old = kept
        .iter()
        .filter_map(|line| match line {
            HunkLine::Context(text) | HunkLine::Remove(text) => Some(text.as_str()),
            HunkLine::Add(_) => None,
        })
        .collect();
    let new = kept
        .iter()
        .filter_map(|line| match line {
            HunkLine::Context(text) | HunkLine::Add(text) => Some(text.as_str()),
            HunkLine::Remove(_) => None,
        })
        .collect();
    Some((old, new, lead))
}

/// Apply hunks to `target`, collecting unplaceable hunks as rejects.
///
/// Placement tries the exact context first, then shaves context off the
/// hunk ends (up to [`MAX_FUZZ`]) the way a fuzz-tolerant patch tool
/// does, so an unrelated local edit inside the context window does not
/// reject the hunk.
pub fn apply_patch(target: &str, hunks: &[Hunk]) -> PatchOutcome {
    let trailing_newline = target.is_empty() || target.ends_with('\n');
    let mut lines: Vec<String> = split_lines(target)
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut outcome = PatchOutcome::default();
    let mut offset: isize = 0;

    'hunks: for hunk in hunks {
        let full_old = hunk.old_lines();
        let full_new = hunk.new_lines();
        let delta = full_new.len() as isize - full_old.len() as isize;

        for fuzz in 0..=MAX_FUZZ {
            let Some((old, new, lead)) = fuzzed_sides(hunk, fuzz) else {
                break;
            };
            let guess = (hunk.old_start as isize - 1 + offset + lead as isize).max(0) as usize;
            if let Some(at) = find_near(&lines, guess, &old) {
                lines.splice(at..at + old.len(), new.iter().map(|s| s.to_string()));
                offset += delta;
                outcome.applied += 1;
                continue 'hunks;
            }
            // The hunk's result already in place: a replayed log must not
            // damage the file.
            if find_near(&lines, guess, &new).is_some() {
                offset += delta;
                outcome.already_applied += 1;
                continue 'hunks;
            }
        }

        outcome.rejected += 1;
        outcome.rejects.push_str(&hunk_header(hunk));
        outcome.rejects.push('\n');
        outcome
            .rejects
            .push_str(&format_patch(std::slice::from_ref(hunk))[hunk_header(hunk).len() + 1..]);
    }

    outcome.text = join_lines(&lines, trailing_newline);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_and_apply_roundtrip() {
        let old = "a\nb\nc\nd\ne\n";
        let new = "a\nb\nx\nd\ne\nf\n";
        let hunks = diff_lines(old, new, 3);
        let outcome = apply_patch(old, &hunks);
        assert_eq!(outcome.text, new);
        assert!(outcome.rejects.is_empty());
    }

    #[test]
    fn patch_survives_nearby_local_edits() {
        // Base -> new changes line 3; the target has an unrelated local
        // edit on line 1.
        let old = "one\ntwo\nthree\nfour\nfive\nsix\nseven\n";
        let new = "one\ntwo\nTHREE\nfour\nfive\nsix\nseven\n";
        let target = "ONE!\ntwo\nthree\nfour\nfive\nsix\nseven\n";
        let hunks = diff_lines(old, new, 1);
        let outcome = apply_patch(target, &hunks);
        assert_eq!(outcome.text, "ONE!\ntwo\nTHREE\nfour\nfive\nsix\nseven\n");
        assert_eq!(outcome.rejected, 0);
    }

    #[test]
    fn conflicting_edit_is_rejected() {
        let old = "a\nb\nc\n";
        let new = "a\nY\nc\n";
        let target = "a\nZ\nc\n";
        let hunks = diff_lines(old, new, 1);
        let outcome = apply_patch(target, &hunks);
        assert_eq!(outcome.rejected, 1);
        assert!(!outcome.rejects.is_empty());
        // The target is left alone where the hunk could not be placed.
        assert_eq!(outcome.text, target);
    }

    #[test]
    fn reapplying_a_patch_is_a_no_op() {
        let old = "a\nb\nc\n";
        let new = "a\nB\nc\n";
        let hunks = diff_lines(old, new, 1);
        let once = apply_patch(old, &hunks);
        assert_eq!(once.text, new);
        let twice = apply_patch(&once.text, &hunks);
        assert_eq!(twice.text, new);
        assert_eq!(twice.already_applied, 1);
        assert_eq!(twice.rejected, 0);
    }

    #[test]
    fn patch_text_roundtrips_through_parser() {
        let old = "a\nb\nc\nd\ne\nf\ng\n";
        let new = "a\nB\nc\nd\ne\nF\ng\n";
        let hunks = diff_lines(old, new, 1);
        assert!(hunks.len() >= 2);
        let text = format_patch(&hunks);
        let parsed = parse_patch(&text).unwrap();
        assert_eq!(parsed, hunks);
    }

    #[test]
    fn fuzz_places_a_hunk_despite_an_edit_in_its_context() {
        // The local edit inserts a line inside the hunk's leading
        // context, so only a fuzzed match can place it.
        let old = "a\nb\nc\n";
        let new = "a\nb\nd\n";
        let target = "a\nX\nb\nc\n";
        let hunks = diff_lines(old, new, 3);
        let outcome = apply_patch(target, &hunks);
        assert_eq!(outcome.text, "a\nX\nb\nd\n");
        assert_eq!(outcome.rejected, 0);
    }

    #[test]
    fn diff_handles_empty_sides() {
        let hunks = diff_lines("", "a\nb\n", 3);
        let outcome = apply_patch("", &hunks);
        assert_eq!(outcome.text, "a\nb\n");

        let hunks = diff_lines("a\nb\n", "", 3);
        let outcome = apply_patch("a\nb\n", &hunks);
        assert_eq!(outcome.text, "");
    }
}
