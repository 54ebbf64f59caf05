//! Text patches: computation, serialization and application
//!
//! The history engine stores *reverse* patches: given the text after a write
//! and the text before it, a patch that turns the former back into the latter.
//! It relies only on the [`PatchCodec`] contract; [`TextCodec`] is the
//! implementation used by default.
//!
//! ## TextCodec
//!
//! - Character-level diff from the `similar` crate, followed by an efficiency
//!   cleanup that folds short equalities sandwiched between edits into the
//!   edits around them. Fewer, larger hunks apply more robustly.
//! - Hunks carry `margin` characters of context on each side. Application
//!   first tries the hunk's expected position and otherwise the closest exact
//!   occurrence of its context plus deleted text. Each hunk reports success
//!   separately.
//! - The text form is one header line per hunk followed by one line per edit,
//!   with edit text percent-encoded so it never contains a newline:
//!
//! ```text
//! @@ -1,10 +1,4 @@
//!  ello
//! -%20world
//! ```
//!
//! Positions and lengths count `char`s, not bytes.

use crate::error::{Result, VcfsError};
use similar::{ChangeTag, TextDiff};
use std::fmt;

/// Default number of context characters around each hunk
pub const DEFAULT_MARGIN: usize = 4;

/// Default cost of an edit operation, in characters, for cleanup
pub const DEFAULT_EDIT_COST: usize = 4;

/// Kind of one edit in an edit script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    /// Text present in both versions
    Equal,
    /// Text present only in the source
    Delete,
    /// Text present only in the target
    Insert,
}

impl EditOp {
    fn sign(self) -> char {
        match self {
            EditOp::Equal => ' ',
            EditOp::Delete => '-',
            EditOp::Insert => '+',
        }
    }

    fn from_sign(sign: char) -> Option<Self> {
        match sign {
            ' ' => Some(EditOp::Equal),
            '-' => Some(EditOp::Delete),
            '+' => Some(EditOp::Insert),
            _ => None,
        }
    }
}

/// One run of an edit script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    /// What happens to `text`
    pub op: EditOp,
    /// The affected text
    pub text: String,
}

impl Edit {
    /// Create an edit
    pub fn new(op: EditOp, text: impl Into<String>) -> Self {
        Self { op, text: text.into() }
    }

    fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A contiguous group of edits with surrounding context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hunk {
    /// Char offset of the hunk in the source text
    pub source_start: usize,
    /// Chars of source text covered
    pub source_len: usize,
    /// Char offset of the hunk in the target text
    pub target_start: usize,
    /// Chars of target text covered
    pub target_len: usize,
    /// Context and changes, in order
    pub edits: Vec<Edit>,
}

impl Hunk {
    fn starting_at(source_start: usize, target_start: usize) -> Self {
        Self {
            source_start,
            target_start,
            ..Default::default()
        }
    }

    fn push(&mut self, op: EditOp, text: &str) {
        if text.is_empty() {
            return;
        }
        let len = text.chars().count();
        match op {
            EditOp::Equal => {
                self.source_len += len;
                self.target_len += len;
            }
            EditOp::Delete => self.source_len += len,
            EditOp::Insert => self.target_len += len,
        }
        push_merged(&mut self.edits, op, text);
    }

    /// Text this hunk expects to find
    pub fn source_text(&self) -> String {
        self.edits
            .iter()
            .filter(|e| e.op != EditOp::Insert)
            .map(|e| e.text.as_str())
            .collect()
    }

    /// Text this hunk leaves behind
    pub fn target_text(&self) -> String {
        self.edits
            .iter()
            .filter(|e| e.op != EditOp::Delete)
            .map(|e| e.text.as_str())
            .collect()
    }
}

/// An ordered list of hunks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    /// Hunks, in source order
    pub hunks: Vec<Hunk>,
}

impl Patch {
    /// A patch with no hunks changes nothing
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Number of hunks
    pub fn len(&self) -> usize {
        self.hunks.len()
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hunk in &self.hunks {
            writeln!(
                f,
                "@@ -{},{} +{},{} @@",
                hunk.source_start, hunk.source_len, hunk.target_start, hunk.target_len
            )?;
            for edit in &hunk.edits {
                writeln!(f, "{}{}", edit.op.sign(), urlencoding::encode(&edit.text))?;
            }
        }
        Ok(())
    }
}

/// Computes, encodes and applies text patches
pub trait PatchCodec: Send + Sync {
    /// Edit script turning `a` into `b`, after efficiency cleanup
    fn diff_and_cleanup(&self, a: &str, b: &str) -> Vec<Edit>;

    /// Patch turning `from` into `to`
    fn make_patch(&self, from: &str, to: &str) -> Result<Patch>;

    /// Text form of a patch; empty for an empty patch
    fn serialize(&self, patch: &Patch) -> String;

    /// Parse the text form produced by [`PatchCodec::serialize`]
    fn deserialize(&self, text: &str) -> Result<Patch>;

    /// Apply `patch` to `text`, reporting success per hunk
    ///
    /// Hunks that fail are skipped; the returned text has every other hunk applied.
    fn apply(&self, patch: &Patch, text: &str) -> (String, Vec<bool>);

    /// Serialized patch that turns `newer` back into `older`
    fn reverse_patch_text(&self, newer: &str, older: &str) -> Result<String> {
        let patch = self.make_patch(newer, older)?;
        Ok(self.serialize(&patch))
    }
}

/// Character-level patch codec built on `similar`
#[derive(Debug, Clone, Copy)]
pub struct TextCodec {
    margin: usize,
    edit_cost: usize,
}

impl Default for TextCodec {
    fn default() -> Self {
        Self {
            margin: DEFAULT_MARGIN,
            edit_cost: DEFAULT_EDIT_COST,
        }
    }
}

impl TextCodec {
    /// Codec with default margin and edit cost
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of context characters around each hunk
    pub fn with_margin(mut self, margin: usize) -> Self {
        self.margin = margin;
        self
    }

    /// Set the edit cost used by the efficiency cleanup
    pub fn with_edit_cost(mut self, edit_cost: usize) -> Self {
        self.edit_cost = edit_cost;
        self
    }
}

impl PatchCodec for TextCodec {
    fn diff_and_cleanup(&self, a: &str, b: &str) -> Vec<Edit> {
        let diff = TextDiff::from_chars(a, b);

        let mut edits = Vec::new();
        for change in diff.iter_all_changes() {
            let op = match change.tag() {
                ChangeTag::Equal => EditOp::Equal,
                ChangeTag::Delete => EditOp::Delete,
                ChangeTag::Insert => EditOp::Insert,
            };
            push_merged(&mut edits, op, change.value());
        }

        let mut edits = merge_runs(edits);
        cleanup_efficiency(&mut edits, self.edit_cost);
        edits
    }

    fn make_patch(&self, from: &str, to: &str) -> Result<Patch> {
        let edits = self.diff_and_cleanup(from, to);
        if edits.iter().all(|e| e.op == EditOp::Equal) {
            return Ok(Patch::default());
        }

        let margin = self.margin;
        let last = edits.len() - 1;
        let mut hunks = Vec::new();
        let mut current: Option<Hunk> = None;
        let (mut pos1, mut pos2) = (0usize, 0usize);

        for (i, edit) in edits.iter().enumerate() {
            let len = edit.char_len();
            match edit.op {
                EditOp::Equal => {
                    if let Some(mut hunk) = current.take() {
                        if len <= 2 * margin && i != last {
                            hunk.push(EditOp::Equal, &edit.text);
                            current = Some(hunk);
                        } else {
                            hunk.push(EditOp::Equal, char_prefix(&edit.text, margin));
                            hunks.push(hunk);
                        }
                    }
                    pos1 += len;
                    pos2 += len;
                }
                op => {
                    let hunk = current.get_or_insert_with(|| {
                        let context = match i.checked_sub(1).map(|p| &edits[p]) {
                            Some(prev) if prev.op == EditOp::Equal => char_suffix(&prev.text, margin),
                            _ => "",
                        };
                        let context_len = context.chars().count();
                        let mut hunk = Hunk::starting_at(pos1 - context_len, pos2 - context_len);
                        hunk.push(EditOp::Equal, context);
                        hunk
                    });
                    hunk.push(op, &edit.text);
                    if op == EditOp::Delete {
                        pos1 += len;
                    } else {
                        pos2 += len;
                    }
                }
            }
        }

        if let Some(hunk) = current {
            hunks.push(hunk);
        }

        Ok(Patch { hunks })
    }

    fn serialize(&self, patch: &Patch) -> String {
        patch.to_string()
    }

    fn deserialize(&self, text: &str) -> Result<Patch> {
        let mut hunks: Vec<Hunk> = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }

            if line.starts_with("@@") {
                hunks.push(parse_header(line).ok_or_else(|| {
                    VcfsError::codec(format!("bad hunk header on line {}: {:?}", lineno + 1, line))
                })?);
                continue;
            }

            let mut chars = line.chars();
            let op = chars
                .next()
                .and_then(EditOp::from_sign)
                .ok_or_else(|| {
                    VcfsError::codec(format!("bad edit line {}: {:?}", lineno + 1, line))
                })?;
            let hunk = hunks.last_mut().ok_or_else(|| {
                VcfsError::codec(format!("edit before first hunk header on line {}", lineno + 1))
            })?;
            let decoded = urlencoding::decode(chars.as_str())
                .map_err(|e| VcfsError::codec(format!("line {}: {}", lineno + 1, e)))?;
            push_merged(&mut hunk.edits, op, &decoded);
        }

        for hunk in &hunks {
            let source_len = hunk.source_text().chars().count();
            let target_len = hunk.target_text().chars().count();
            if source_len != hunk.source_len || target_len != hunk.target_len {
                return Err(VcfsError::codec(format!(
                    "hunk at {} declares {}/{} chars but carries {}/{}",
                    hunk.source_start, hunk.source_len, hunk.target_len, source_len, target_len
                )));
            }
        }

        Ok(Patch { hunks })
    }

    fn apply(&self, patch: &Patch, text: &str) -> (String, Vec<bool>) {
        let mut chars: Vec<char> = text.chars().collect();
        let mut results = Vec::with_capacity(patch.hunks.len());
        let mut delta: isize = 0;

        for hunk in &patch.hunks {
            let source: Vec<char> = hunk.source_text().chars().collect();
            let target: Vec<char> = hunk.target_text().chars().collect();
            let expected = (hunk.source_start as isize + delta).max(0) as usize;

            match locate(&chars, &source, expected) {
                Some(loc) => {
                    let _ = chars.splice(loc..loc + source.len(), target.iter().copied());
                    delta = loc as isize - hunk.source_start as isize + target.len() as isize
                        - source.len() as isize;
                    results.push(true);
                }
                None => results.push(false),
            }
        }

        (chars.into_iter().collect(), results)
    }
}

/// Append to an edit list, merging with the last edit of the same kind
fn push_merged(edits: &mut Vec<Edit>, op: EditOp, text: &str) {
    if text.is_empty() {
        return;
    }
    match edits.last_mut() {
        Some(last) if last.op == op => last.text.push_str(text),
        _ => edits.push(Edit::new(op, text)),
    }
}

/// Normalize an edit script: between equalities, one delete then one insert
fn merge_runs(edits: Vec<Edit>) -> Vec<Edit> {
    let mut out = Vec::with_capacity(edits.len());
    let mut deleted = String::new();
    let mut inserted = String::new();

    for edit in edits {
        match edit.op {
            EditOp::Delete => deleted.push_str(&edit.text),
            EditOp::Insert => inserted.push_str(&edit.text),
            EditOp::Equal => {
                flush_run(&mut out, &mut deleted, &mut inserted);
                push_merged(&mut out, EditOp::Equal, &edit.text);
            }
        }
    }
    flush_run(&mut out, &mut deleted, &mut inserted);
    out
}

fn flush_run(out: &mut Vec<Edit>, deleted: &mut String, inserted: &mut String) {
    if !deleted.is_empty() {
        out.push(Edit::new(EditOp::Delete, std::mem::take(deleted)));
    }
    if !inserted.is_empty() {
        out.push(Edit::new(EditOp::Insert, std::mem::take(inserted)));
    }
}

/// Which kinds of change appear in the run of edits before the next equality
fn run_flags<'a>(run: impl Iterator<Item = &'a Edit>) -> (bool, bool) {
    let (mut inserts, mut deletes) = (false, false);
    for edit in run {
        match edit.op {
            EditOp::Equal => break,
            EditOp::Insert => inserts = true,
            EditOp::Delete => deletes = true,
        }
    }
    (inserts, deletes)
}

/// Fold equalities that are cheaper to rewrite than to keep into their neighbours
///
/// An interior equality shorter than `edit_cost` is converted when edits of
/// both kinds surround it on both sides, or when three of those four are
/// present and it is shorter than half of `edit_cost`.
fn cleanup_efficiency(edits: &mut Vec<Edit>, edit_cost: usize) {
    loop {
        let n = edits.len();
        let mut changed = false;
        let mut out = Vec::with_capacity(n + 2);

        for i in 0..n {
            let edit = &edits[i];
            if edit.op == EditOp::Equal && i > 0 && i + 1 < n {
                let len = edit.char_len();
                let (pre_ins, pre_del) = run_flags(edits[..i].iter().rev());
                let (post_ins, post_del) = run_flags(edits[i + 1..].iter());
                let flags = [pre_ins, pre_del, post_ins, post_del]
                    .iter()
                    .filter(|f| **f)
                    .count();

                if len < edit_cost && (flags == 4 || (flags == 3 && len * 2 < edit_cost)) {
                    out.push(Edit::new(EditOp::Delete, edit.text.clone()));
                    out.push(Edit::new(EditOp::Insert, edit.text.clone()));
                    changed = true;
                    continue;
                }
            }
            out.push(edit.clone());
        }

        if !changed {
            return;
        }
        *edits = merge_runs(out);
    }
}

fn char_prefix(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn char_suffix(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    match text.char_indices().nth(count - n) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

fn parse_header(line: &str) -> Option<Hunk> {
    let inner = line.strip_prefix("@@ -")?.strip_suffix(" @@")?;
    let (source, target) = inner.split_once(" +")?;
    let (source_start, source_len) = parse_range(source)?;
    let (target_start, target_len) = parse_range(target)?;
    Some(Hunk {
        source_start,
        source_len,
        target_start,
        target_len,
        edits: Vec::new(),
    })
}

fn parse_range(range: &str) -> Option<(usize, usize)> {
    let (start, len) = range.split_once(',')?;
    Some((start.parse().ok()?, len.parse().ok()?))
}

/// Find `needle` in `haystack`, preferring `expected`, else the nearest match
fn locate(haystack: &[char], needle: &[char], expected: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(expected.min(haystack.len()));
    }
    if needle.len() > haystack.len() {
        return None;
    }

    let max_start = haystack.len() - needle.len();
    if expected <= max_start && haystack[expected..expected + needle.len()] == *needle {
        return Some(expected);
    }

    (0..=max_start)
        .filter(|&i| haystack[i..i + needle.len()] == *needle)
        .min_by_key(|&i| i.abs_diff(expected))
}
