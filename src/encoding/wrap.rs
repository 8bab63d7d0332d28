//! Word wrapping for bodies, including quoted-printable soft breaks.

use super::CRLF;

/// Shortest width accepted in quoted-printable mode: one 4-byte UTF-8
/// character written as four `=XX` triplets.
const MIN_QP_WIDTH: usize = 12;

/// Word-wrap `text` to `width` octets per line.
///
/// Lines are split on existing line breaks and then on spaces. In plain mode
/// a word longer than `width` is left intact and lines break with CRLF.
///
/// In quoted-printable mode `text` is expected to already be QP-encoded:
/// lines break with a soft break (` =` CRLF) that preserves the space, and
/// over-long words are cut with `=` CRLF at points chosen by
/// [`utf8_char_boundary`], so that no cut lands inside an `=XX` triplet or
/// between the encoded bytes of one UTF-8 character.
pub fn wrap_text(text: &str, width: usize, qp_mode: bool) -> String {
    let width = if qp_mode { width.max(MIN_QP_WIDTH) } else { width.max(1) };
    let soft_break = if qp_mode { " =\r\n" } else { CRLF };

    let normalized = String::from_utf8_lossy(&super::normalize_breaks(text.as_bytes())).into_owned();
    let trimmed = normalized.strip_suffix(CRLF).unwrap_or(&normalized);

    let mut out = String::with_capacity(trimmed.len() + trimmed.len() / width * 4);
    for line in trimmed.split(CRLF) {
        let mut buf = String::new();
        let mut first_word = true;

        for word in line.split(' ') {
            if qp_mode && word.len() > width {
                if !first_word {
                    out.push_str(&buf);
                    out.push_str(soft_break);
                    buf.clear();
                }
                let mut rest = word;
                while !rest.is_empty() {
                    let cut = utf8_char_boundary(rest, width);
                    let (part, tail) = rest.split_at(cut);
                    if tail.is_empty() {
                        buf = part.to_string();
                    } else {
                        out.push_str(part);
                        out.push('=');
                        out.push_str(CRLF);
                    }
                    rest = tail;
                }
            } else {
                let previous_len = buf.len();
                if !first_word {
                    buf.push(' ');
                }
                buf.push_str(word);
                if previous_len > 0 && buf.len() > width {
                    out.push_str(&buf[..previous_len]);
                    out.push_str(soft_break);
                    buf = word.to_string();
                }
            }
            first_word = false;
        }
        out.push_str(&buf);
        out.push_str(CRLF);
    }
    out
}

/// Find a safe cut point at or before `max_len` in quoted-printable text.
///
/// Looks back from `max_len` for an `=XX` escape. A cut is moved before an
/// escape that straddles `max_len`, and before the lead byte of a multi-byte
/// UTF-8 character whose continuation bytes would otherwise be separated
/// from it. The result is at least 1 for non-empty input.
pub fn utf8_char_boundary(encoded: &str, max_len: usize) -> usize {
    let bytes = encoded.as_bytes();
    if max_len >= bytes.len() {
        return bytes.len();
    }
    let max_len = max_len.max(1);
    let mut look_back = 3usize;

    let cut = loop {
        if look_back > max_len {
            break max_len;
        }
        let start = max_len - look_back;
        let Some(pos) = bytes[start..max_len].iter().position(|&b| b == b'=') else {
            break max_len;
        };
        let value = bytes
            .get(start + pos + 1..start + pos + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match value {
            // Single-byte character: cut before the escape only if it straddles
            Some(v) if v < 0x80 => break if pos > 0 { start + pos } else { max_len },
            // Lead byte: keep the character if all its escapes fit, else cut before it
            Some(v) if v >= 0xC0 => {
                let lead_at = start + pos;
                let width = 3 * utf8_sequence_len(v);
                break if lead_at + width <= max_len { max_len } else { lead_at };
            }
            // Continuation byte: keep looking for the lead byte
            Some(_) => look_back += 3,
            None => break start + pos,
        }
    };

    if cut > 0 {
        cut
    } else {
        first_unit_len(bytes).min(bytes.len())
    }
}

fn utf8_sequence_len(lead: u8) -> usize {
    match lead {
        0xF0..=0xFF => 4,
        0xE0..=0xEF => 3,
        _ => 2,
    }
}

/// Length of the first indivisible unit: one literal byte, or one `=XX`
/// escape followed by any escaped continuation bytes.
fn first_unit_len(bytes: &[u8]) -> usize {
    if bytes.first() != Some(&b'=') {
        return 1;
    }
    let mut len = 3;
    while bytes.get(len) == Some(&b'=') {
        let continuation = bytes
            .get(len + 1..len + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok())
            .is_some_and(|v| (0x80..0xC0).contains(&v));
        if !continuation {
            break;
        }
        len += 3;
    }
    len
}
