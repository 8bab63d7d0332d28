//! RFC 2047 header words: Q/B encoding with character-safe splitting, and decoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::base64::decode_base64;
use super::charset;
use super::qp::decode_quoted_printable;
use crate::error::Result;

/// Where in a header the encoded text will appear (RFC 2047 §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPosition {
    /// Unstructured text such as `Subject`.
    Text,
    /// A phrase, such as the display name of an address.
    Phrase,
    /// Inside a `( ... )` comment.
    Comment,
}

/// Maximum length of one encoded word, delimiters included.
const MAX_WORD_LENGTH: usize = 75;

/// Separator between consecutive encoded words: a folded header line.
const WORD_SEPARATOR: &str = "\r\n ";

/// Encode a header value for the given position.
///
/// - Phrases made of printable ASCII are returned as a quoted string with `\`
///   and `"` escaped.
/// - Text and comments that need no escaping are returned unchanged.
/// - Anything else becomes one or more encoded words in `charset`, joined by
///   a folding whitespace (CRLF + space). Q encoding is used unless more than
///   a third of the octets need escaping, in which case B encoding is shorter.
///   Words are split only between characters, never inside a multi-byte
///   sequence or an `=XX` escape.
pub fn encode_header(text: &str, charset_name: &str, position: HeaderPosition) -> Result<String> {
    let bytes = charset::encode_text(text, charset_name)?;
    let has_high = bytes.iter().any(|&b| b >= 0x80);

    let escape_count = match position {
        HeaderPosition::Phrase => {
            if !has_high && !bytes.iter().any(|&b| is_control(b)) {
                return Ok(quote_phrase(text));
            }
            bytes
                .iter()
                .filter(|&&b| !(b == 0x20 || b == 0x21 || (0x23..=0x5B).contains(&b) || (0x5D..=0x7E).contains(&b)))
                .count()
        }
        HeaderPosition::Comment => {
            bytes.iter().filter(|&&b| matches!(b, b'(' | b')' | b'"')).count()
                + bytes.iter().filter(|&&b| is_control(b) || b >= 0x80).count()
        }
        HeaderPosition::Text => bytes.iter().filter(|&&b| is_control(b) || b >= 0x80).count(),
    };

    if escape_count == 0 {
        return Ok(text.to_string());
    }

    let max_encoded = MAX_WORD_LENGTH.saturating_sub(7 + charset_name.len()).max(8);
    let words = if escape_count > bytes.len() / 3 {
        encode_b_words(text, charset_name, max_encoded)?
    } else {
        encode_q_words(text, charset_name, position, max_encoded)?
    };
    Ok(words.join(WORD_SEPARATOR))
}

fn is_control(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F)
}

/// Wrap in double quotes, escaping `\` and `"`.
fn quote_phrase(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Split `text` into B-encoded words, one character group at a time.
fn encode_b_words(text: &str, charset_name: &str, max_encoded: usize) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut char_buf = [0u8; 4];

    for ch in text.chars() {
        let char_bytes = charset::encode_text(ch.encode_utf8(&mut char_buf), charset_name)?;
        let grown = pending.len() + char_bytes.len();
        if !pending.is_empty() && grown.div_ceil(3) * 4 > max_encoded {
            words.push(format!("=?{charset_name}?B?{}?=", STANDARD.encode(&pending)));
            pending.clear();
        }
        pending.extend_from_slice(&char_bytes);
    }
    if !pending.is_empty() {
        words.push(format!("=?{charset_name}?B?{}?=", STANDARD.encode(&pending)));
    }
    Ok(words)
}

/// Split `text` into Q-encoded words, one character group at a time.
fn encode_q_words(
    text: &str,
    charset_name: &str,
    position: HeaderPosition,
    max_encoded: usize,
) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut char_buf = [0u8; 4];

    for ch in text.chars() {
        let char_bytes = charset::encode_text(ch.encode_utf8(&mut char_buf), charset_name)?;
        let mut token = String::with_capacity(char_bytes.len() * 3);
        for &b in char_bytes.iter() {
            push_q_octet(b, position, &mut token);
        }
        if !current.is_empty() && current.len() + token.len() > max_encoded {
            words.push(format!("=?{charset_name}?Q?{current}?="));
            current.clear();
        }
        current.push_str(&token);
    }
    if !current.is_empty() {
        words.push(format!("=?{charset_name}?Q?{current}?="));
    }
    Ok(words)
}

fn push_q_octet(b: u8, position: HeaderPosition, out: &mut String) {
    let literal = match position {
        HeaderPosition::Phrase => b.is_ascii_alphanumeric() || matches!(b, b'!' | b'*' | b'+' | b'/' | b'-'),
        HeaderPosition::Text => (0x21..=0x7E).contains(&b) && !matches!(b, b'=' | b'?' | b'_'),
        HeaderPosition::Comment => {
            (0x21..=0x7E).contains(&b) && !matches!(b, b'=' | b'?' | b'_' | b'(' | b')' | b'"')
        }
    };
    if b == b' ' {
        out.push('_');
    } else if literal {
        out.push(b as char);
    } else {
        out.push_str(&format!("={b:02X}"));
    }
}

/// Decode the encoded words in a header value.
///
/// Folding is removed first. Whitespace between two adjacent encoded words is
/// dropped (RFC 2047 §6.2); malformed words are kept as they are.
pub fn decode_encoded_words(input: &str) -> String {
    let unfolded = input.replace("\r\n", "");
    let mut out = String::with_capacity(unfolded.len());
    let mut rest = unfolded.as_str();
    let mut after_word = false;
    while !rest.is_empty() {
        let token_start = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        let (space, tail) = rest.split_at(token_start);
        let token_end = tail.find([' ', '\t']).unwrap_or(tail.len());
        let (token, next) = tail.split_at(token_end);
        match decode_word(token) {
            Some(text) => {
                if !after_word {
                    out.push_str(space);
                }
                out.push_str(&text);
                after_word = true;
            }
            None => {
                out.push_str(space);
                out.push_str(token);
                after_word = false;
            }
        }
        rest = next;
    }
    out
}

/// `=?charset?B|Q?text?=` to text.
fn decode_word(token: &str) -> Option<String> {
    let inner = token.strip_prefix("=?")?.strip_suffix("?=")?;
    let mut fields = inner.splitn(3, '?');
    let charset_name = fields.next()?;
    let scheme = fields.next()?;
    let text = fields.next()?;
    let bytes = match scheme {
        "B" | "b" => decode_base64(text)?,
        "Q" | "q" => decode_quoted_printable(&text.replace('_', " ")),
        _ => return None,
    };
    // RFC 2231 language suffix: charset*lang
    let charset_name = charset_name.split('*').next().unwrap_or(charset_name);
    Some(charset::decode_bytes(&bytes, charset_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_adjacent_words_join() {
        let folded = "=?utf-8?Q?Gr=C3=BC=C3=9Fe?=\r\n =?utf-8?B?IGF1cyBLw7Zsbg==?=";
        assert_eq!(decode_encoded_words(folded), "Grüße aus Köln");
    }

    #[test]
    fn test_decode_keeps_plain_text_and_bad_words() {
        assert_eq!(
            decode_encoded_words("Re: =?iso-8859-1?q?caf=E9?= =?x?Z?abc?= ok"),
            "Re: café =?x?Z?abc?= ok"
        );
    }

    #[test]
    fn test_ascii_text_unchanged() {
        let out = encode_header("Hello", "utf-8", HeaderPosition::Text).unwrap();
        assert_eq!(out, "Hello");
    }

    #[test]
    fn test_ascii_phrase_is_quoted() {
        let out = encode_header("Doe, \"J\"", "utf-8", HeaderPosition::Phrase).unwrap();
        assert_eq!(out, "\"Doe, \\\"J\\\"\"");
    }

    #[test]
    fn test_mostly_ascii_uses_q() {
        let out = encode_header("Résumé du projet", "utf-8", HeaderPosition::Text).unwrap();
        assert!(out.starts_with("=?utf-8?Q?"), "{out}");
        assert_eq!(decode_encoded_words(&out), "Résumé du projet");
    }

    #[test]
    fn test_mostly_non_ascii_uses_b() {
        let out = encode_header("山田太郎", "utf-8", HeaderPosition::Phrase).unwrap();
        assert!(out.starts_with("=?utf-8?B?"), "{out}");
        assert_eq!(decode_encoded_words(&out), "山田太郎");
    }

    #[test]
    fn test_long_value_split_on_character_boundaries() {
        let subject = "Привет, это очень длинная тема письма с кириллицей и эмодзи 🎉🎉🎉";
        let out = encode_header(subject, "utf-8", HeaderPosition::Text).unwrap();
        let words: Vec<&str> = out.split("\r\n ").collect();
        assert!(words.len() > 1);
        for word in &words {
            assert!(word.len() <= 75, "word too long: {word}");
            // Each word must decode to valid UTF-8 by itself
            let decoded = decode_encoded_words(word);
            assert!(!decoded.contains('\u{FFFD}'), "split inside a character: {word}");
        }
        assert_eq!(decode_encoded_words(&out), subject);
    }

    #[test]
    fn test_latin1_charset_words() {
        let out = encode_header("Müller", "iso-8859-1", HeaderPosition::Phrase).unwrap();
        assert_eq!(out, "=?iso-8859-1?Q?M=FCller?=");
        assert_eq!(decode_encoded_words(&out), "Müller");
    }

    #[test]
    fn test_control_characters_force_encoding() {
        let out = encode_header("tab\there", "utf-8", HeaderPosition::Text).unwrap();
        assert_eq!(out, "=?utf-8?Q?tab=09here?=");
    }
}
