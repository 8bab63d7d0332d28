//! Quoted-printable body encoding (RFC 2045 §6.7).

use super::{CRLF, STD_LINE_LENGTH};

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Encode bytes as quoted-printable.
///
/// - CRLF, lone CR and lone LF in the input are hard line breaks and come out as CRLF.
/// - Every octet outside printable ASCII, and `=` itself, is written as `=XX`.
/// - Space and tab are literal except at the end of a line, where they are encoded.
/// - Lines are soft-broken (`=` CRLF) so that no output line exceeds 76 characters.
///   A soft break never falls inside an `=XX` triplet or inside a UTF-8 sequence.
pub fn encode_quoted_printable(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len() * 3 / 2);
    let normalized = super::normalize_breaks(input);
    let ends_with_break = normalized.ends_with(b"\r\n");
    let body = if ends_with_break {
        &normalized[..normalized.len() - 2]
    } else {
        &normalized[..]
    };

    let mut first = true;
    for line in split_crlf(body) {
        if !first {
            out.push_str(CRLF);
        }
        first = false;
        encode_line(line, &mut out);
    }
    if ends_with_break {
        out.push_str(CRLF);
    }
    out
}

/// Split on CRLF without allocating.
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

/// Encode one logical line, inserting soft breaks as needed.
fn encode_line(line: &[u8], out: &mut String) {
    // A soft break needs one column for the trailing '='
    let limit = STD_LINE_LENGTH - 1;
    let mut column = 0;
    let mut i = 0;

    while i < line.len() {
        let group = utf8_group_len(&line[i..]);
        let is_last = i + group == line.len();
        let mut token = String::with_capacity(group * 3);
        for &b in &line[i..i + group] {
            push_octet(b, is_last, &mut token);
        }

        if column + token.len() > limit && column > 0 {
            out.push('=');
            out.push_str(CRLF);
            column = 0;
        }
        column += token.len();
        out.push_str(&token);
        i += group;
    }
}

/// Length of the UTF-8 sequence starting at `bytes[0]`, or 1 if it is not a
/// well-formed multi-byte sequence.
fn utf8_group_len(bytes: &[u8]) -> usize {
    let want = match bytes[0] {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return 1,
    };
    if bytes.len() >= want && bytes[1..want].iter().all(|b| (0x80..=0xBF).contains(b)) {
        want
    } else {
        1
    }
}

fn push_octet(b: u8, at_line_end: bool, out: &mut String) {
    let literal = match b {
        b' ' | b'\t' => !at_line_end,
        b'=' => false,
        33..=126 => true,
        _ => false,
    };
    if literal {
        out.push(b as char);
    } else {
        out.push('=');
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0F) as usize] as char);
    }
}

/// Decode quoted-printable text, honoring soft line breaks.
///
/// Malformed escapes are copied through verbatim.
pub fn decode_quoted_printable(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'=' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        if bytes[i + 1..].starts_with(b"\r\n") {
            i += 3;
        } else if bytes[i + 1..].starts_with(b"\n") {
            i += 2;
        } else if let Some(value) = bytes
            .get(i + 1..i + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok())
        {
            out.push(value);
            i += 3;
        } else {
            out.push(b'=');
            i += 1;
        }
    }
    out
}
