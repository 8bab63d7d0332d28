//! Content-Transfer-Encoding selection and body encoding.

use serde::{Deserialize, Serialize};

use super::{base64, normalize_breaks, qp, MAX_LINE_LENGTH};

/// A Content-Transfer-Encoding value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferEncoding {
    #[serde(rename = "7bit")]
    SevenBit,
    #[serde(rename = "8bit")]
    EightBit,
    #[serde(rename = "binary")]
    Binary,
    #[serde(rename = "base64")]
    Base64,
    #[serde(rename = "quoted-printable")]
    QuotedPrintable,
}

impl TransferEncoding {
    /// Header value, e.g. `"quoted-printable"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Binary => "binary",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
        }
    }

    /// Parse a header value (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "7bit" => Some(Self::SevenBit),
            "8bit" => Some(Self::EightBit),
            "binary" => Some(Self::Binary),
            "base64" => Some(Self::Base64),
            "quoted-printable" => Some(Self::QuotedPrintable),
            _ => None,
        }
    }

    /// Whether the encoded output may contain octets above 127.
    pub fn is_eight_bit(&self) -> bool {
        matches!(self, Self::EightBit | Self::Binary)
    }
}

impl std::fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether any octet has the high bit set.
pub fn has_8bit(bytes: &[u8]) -> bool {
    bytes.iter().any(|&b| b >= 0x80)
}

/// Whether any line (split on LF, CR stripped) exceeds `limit` octets.
pub fn has_long_lines(bytes: &[u8], limit: usize) -> bool {
    bytes.split(|&b| b == b'\n').any(|line| {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        line.len() > limit
    })
}

/// Pick the encoding actually used for a text part.
///
/// Base64 and quoted-printable requests are honored. Otherwise 7bit is used
/// for pure ASCII and 8bit for anything else. Whatever was requested, a line
/// longer than 998 octets forces quoted-printable.
pub fn choose_text_encoding(requested: TransferEncoding, body: &[u8]) -> TransferEncoding {
    let chosen = match requested {
        TransferEncoding::Base64 | TransferEncoding::QuotedPrintable => requested,
        _ if has_8bit(body) => TransferEncoding::EightBit,
        _ => TransferEncoding::SevenBit,
    };
    if chosen != TransferEncoding::Base64 && has_long_lines(body, MAX_LINE_LENGTH) {
        return TransferEncoding::QuotedPrintable;
    }
    chosen
}

/// Encode a body in the given transfer encoding.
///
/// Identity encodings (7bit, 8bit) normalize line breaks to CRLF; binary is
/// passed through untouched.
pub fn encode_body(bytes: &[u8], encoding: TransferEncoding) -> Vec<u8> {
    match encoding {
        TransferEncoding::SevenBit | TransferEncoding::EightBit => normalize_breaks(bytes),
        TransferEncoding::Binary => bytes.to_vec(),
        TransferEncoding::Base64 => base64::encode_base64(bytes).into_bytes(),
        TransferEncoding::QuotedPrintable => qp::encode_quoted_printable(bytes).into_bytes(),
    }
}
