//! DATA framing: CRLF normalization, line length ceiling, dot-stuffing.

use crate::encoding::{normalize_breaks, MAX_LINE_LENGTH};

/// End-of-data marker sent after the framed payload.
pub const TERMINATOR: &[u8] = b".\r\n";

/// Frame a complete message (headers, blank line, body) for the DATA phase.
///
/// Every line ends in CRLF and is at most 998 octets after stuffing. Longer
/// lines are split at the last space before the limit, or hard-cut when there
/// is none; header continuations get a leading tab. Lines starting with `.`
/// get a second `.`. The terminating `.` line is not included.
pub fn frame(message: &[u8]) -> Vec<u8> {
    let normalized = normalize_breaks(message);
    let mut out = Vec::with_capacity(normalized.len() + normalized.len() / 50 + 2);

    let mut in_headers = true;
    let mut lines: Vec<&[u8]> = split_crlf(&normalized).collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    for line in lines {
        if in_headers && line.is_empty() {
            in_headers = false;
        }
        let mut rest = line;
        let mut continuation = false;
        loop {
            let mut prefix: &[u8] = b"";
            if continuation && in_headers {
                prefix = b"\t";
            }
            let stuffed = prefix.is_empty() && rest.first() == Some(&b'.');
            let limit = MAX_LINE_LENGTH - prefix.len() - usize::from(stuffed);
            if rest.len() <= limit {
                push_line(&mut out, prefix, stuffed, rest);
                break;
            }
            let (head, tail) = match rest[..limit].iter().rposition(|&b| b == b' ') {
                Some(pos) if pos > 0 => (&rest[..pos], &rest[pos + 1..]),
                _ => (&rest[..limit], &rest[limit..]),
            };
            push_line(&mut out, prefix, stuffed, head);
            rest = tail;
            continuation = true;
        }
    }
    out
}

fn push_line(out: &mut Vec<u8>, prefix: &[u8], stuffed: bool, line: &[u8]) {
    out.extend_from_slice(prefix);
    if stuffed {
        out.push(b'.');
    }
    out.extend_from_slice(line);
    out.extend_from_slice(b"\r\n");
}

fn split_crlf(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = Some(data);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.windows(2).position(|w| w == b"\r\n") {
            Some(pos) => {
                rest = Some(&current[pos + 2..]);
                Some(&current[..pos])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}
