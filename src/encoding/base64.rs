//! Base64 body encoding (RFC 2045 §6.8), wrapped at 76 columns.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::{CRLF, STD_LINE_LENGTH};

/// Encode bytes as base64, one CRLF-terminated line per 76 characters.
///
/// Empty input yields an empty string.
pub fn encode_base64(bytes: &[u8]) -> String {
    let flat = STANDARD.encode(bytes);
    let mut out = String::with_capacity(flat.len() + flat.len() / STD_LINE_LENGTH * 2 + 2);
    // base64 output is ASCII, so byte chunks are valid str slices
    for chunk in flat.as_bytes().chunks(STD_LINE_LENGTH) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str(CRLF);
    }
    out
}

/// Decode base64 text, ignoring whitespace and line breaks.
pub fn decode_base64(text: &str) -> Option<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_input_single_line() {
        assert_eq!(encode_base64(b"Hello"), "SGVsbG8=\r\n");
    }

    #[test]
    fn test_lines_wrapped_at_76() {
        let data = vec![0xA5u8; 300];
        let encoded = encode_base64(&data);
        for line in encoded.split("\r\n").filter(|l| !l.is_empty()) {
            assert!(line.len() <= 76);
        }
        assert_eq!(decode_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(encode_base64(b""), "");
    }
}
