//! Transfer encodings: base64, quoted-printable, RFC 2047 header words,
//! charset conversion and line wrapping.

pub mod base64;
pub mod charset;
pub mod header;
pub mod qp;
pub mod transfer;
pub mod wrap;

/// Line terminator used on the wire and inside composed messages.
pub const CRLF: &str = "\r\n";

/// Hard ceiling for a line, excluding CRLF (RFC 5322 §2.1.1).
pub const MAX_LINE_LENGTH: usize = 998;

/// Recommended line length for encoded bodies (RFC 2045 §6.7/§6.8).
pub const STD_LINE_LENGTH: usize = 76;

/// Normalize every line ending (`\r\n`, lone `\r`, lone `\n`) to CRLF.
pub fn normalize_breaks(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 32);
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'\r' => {
                out.extend_from_slice(b"\r\n");
                if input.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\n' => out.extend_from_slice(b"\r\n"),
            b => out.push(b),
        }
        i += 1;
    }
    out
}
