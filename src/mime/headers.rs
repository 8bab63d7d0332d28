//! Ordered header blocks and header folding (RFC 5322 §2.2.3).

use crate::encoding::{CRLF, MAX_LINE_LENGTH};

/// Preferred maximum header line length, excluding CRLF.
pub const FOLD_WIDTH: usize = 78;

/// An ordered list of header fields.
///
/// Order is preserved exactly as pushed; it is the order written on the wire
/// and the order in which DKIM selects signed headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    fields: Vec<(String, String)>,
}

impl HeaderBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field. The value may already contain folds (`CRLF` + WSP).
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Insert a field before all others (used for trace and signature headers).
    pub fn prepend(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(0, (name.into(), value.into()));
    }

    /// Remove every field named `name` (case-insensitive).
    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// First value of `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether a field named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render every field as folded `Name: value` lines, each ending in CRLF.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.fields {
            out.push_str(&fold_header(name, value));
            out.push_str(CRLF);
        }
        out
    }
}

/// Format `name: value` folded to [`FOLD_WIDTH`] columns.
///
/// Existing folds in `value` are kept. A line is broken at the last space or
/// tab before the width; when a run without whitespace is longer, it is broken
/// at the first whitespace after it, and hard-cut only past the 998-octet
/// ceiling. Continuation lines start with the whitespace they were broken at.
/// No line of the result ends with CRLF.
pub fn fold_header(name: &str, value: &str) -> String {
    let unfolded_line = format!("{name}: {value}");
    let mut out = String::with_capacity(unfolded_line.len() + 8);

    for (idx, segment) in unfolded_line.split(CRLF).enumerate() {
        if idx > 0 {
            out.push_str(CRLF);
        }
        fold_segment(segment, &mut out);
    }
    out
}

fn fold_segment(segment: &str, out: &mut String) {
    let mut rest = segment;
    // Never break inside the leading whitespace of a continuation line
    let mut first = true;

    while rest.len() > FOLD_WIDTH {
        let skip = if first {
            0
        } else {
            rest.len() - rest.trim_start_matches([' ', '\t']).len()
        };
        let search = &rest.as_bytes()[..FOLD_WIDTH + 1];
        let before = search
            .iter()
            .enumerate()
            .skip(skip + 1)
            .rev()
            .find(|(_, &b)| b == b' ' || b == b'\t')
            .map(|(i, _)| i);

        let cut = match before {
            Some(i) => i,
            None => {
                let limit = rest.len().min(MAX_LINE_LENGTH + 1);
                let after = rest.as_bytes()[..limit]
                    .iter()
                    .enumerate()
                    .skip(FOLD_WIDTH + 1)
                    .find(|(_, &b)| b == b' ' || b == b'\t')
                    .map(|(i, _)| i);
                match after {
                    Some(i) => i,
                    None if rest.len() > MAX_LINE_LENGTH - 1 => {
                        // Leave room for the space a hard-cut continuation gains
                        floor_char_boundary(rest, MAX_LINE_LENGTH - 1)
                    }
                    None => break,
                }
            }
        };

        let (line, tail) = rest.split_at(cut);
        out.push_str(line);
        out.push_str(CRLF);
        if !tail.starts_with([' ', '\t']) {
            // Hard cut: the continuation needs its own leading whitespace
            out.push(' ');
        }
        rest = tail;
        first = false;
    }
    out.push_str(rest);
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
