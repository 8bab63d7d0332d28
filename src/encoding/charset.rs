//! Charset lookup and text-to-bytes conversion backed by `encoding_rs`.

use std::borrow::Cow;

use encoding_rs::Encoding;
use tracing::warn;

use crate::error::{MailError, Result};

/// Whether the charset label names UTF-8.
pub fn is_utf8(charset: &str) -> bool {
    matches!(charset.to_ascii_lowercase().as_str(), "utf-8" | "utf8")
}

/// Resolve a charset label (`"utf-8"`, `"iso-8859-1"`, `"windows-1252"`, ...).
pub fn lookup(charset: &str) -> Result<&'static Encoding> {
    Encoding::for_label(charset.trim().as_bytes())
        .ok_or_else(|| MailError::Encoding(format!("Unknown charset '{charset}'")))
}

/// Convert `text` to bytes in `charset`.
///
/// Characters the charset cannot represent are replaced by numeric character
/// references, and a warning is logged.
pub fn encode_text<'a>(text: &'a str, charset: &str) -> Result<Cow<'a, [u8]>> {
    if is_utf8(charset) {
        return Ok(Cow::Borrowed(text.as_bytes()));
    }
    let encoding = lookup(charset)?;
    let (bytes, _, unmappable) = encoding.encode(text);
    if unmappable {
        warn!(charset = charset, "Text contains characters not representable in charset");
    }
    Ok(bytes)
}

/// Decode bytes in `charset` back to a string (lossy).
pub fn decode_bytes(bytes: &[u8], charset: &str) -> String {
    if is_utf8(charset) {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    match Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => {
            warn!(charset = charset, "Unknown charset, falling back to UTF-8 lossy");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
