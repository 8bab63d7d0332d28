//! Attachment records.
//!
//! File-backed payloads are NOT read until compose time; only the path and
//! metadata are stored.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::encoding::transfer::TransferEncoding;
use crate::error::{MailError, Result};

/// Identity of an attachment, stable across clones.
///
/// Two attachments with the same bytes still have different ids; only the
/// same attachment added twice collapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(u64);

impl AttachmentId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Where the payload comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    /// Read from disk when the message is composed.
    File(PathBuf),
    /// Supplied in memory by the caller.
    Bytes(Vec<u8>),
}

/// `Content-Disposition` of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Embedded and referenced from the HTML body by `cid:`.
    Inline,
    /// A regular downloadable attachment.
    Attachment,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Attachment => "attachment",
        }
    }
}

/// One attachment or inline image.
#[derive(Debug, Clone)]
pub struct Attachment {
    id: AttachmentId,
    /// Payload origin.
    pub source: AttachmentSource,
    /// File name shown to the recipient.
    pub filename: String,
    /// MIME content type (e.g. `"image/png"`).
    pub mime_type: String,
    /// Transfer encoding for the payload (base64 unless overridden).
    pub encoding: TransferEncoding,
    /// Inline or regular attachment.
    pub disposition: Disposition,
    /// Content-ID, required for inline parts.
    pub content_id: Option<String>,
}

impl Attachment {
    /// An attachment read from `path` at compose time.
    ///
    /// The file name defaults to the last path component and the MIME type
    /// is guessed from the file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = guess_mime_type(&filename);
        Self {
            id: AttachmentId::next(),
            source: AttachmentSource::File(path),
            filename,
            mime_type,
            encoding: TransferEncoding::Base64,
            disposition: Disposition::Attachment,
            content_id: None,
        }
    }

    /// An attachment held in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let mime_type = guess_mime_type(&filename);
        Self {
            id: AttachmentId::next(),
            source: AttachmentSource::Bytes(bytes.into()),
            filename,
            mime_type,
            encoding: TransferEncoding::Base64,
            disposition: Disposition::Attachment,
            content_id: None,
        }
    }

    /// Override the file name.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Override the guessed MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Override the transfer encoding.
    pub fn with_encoding(mut self, encoding: TransferEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Make this an inline part referenced as `cid:<content_id>`.
    pub fn inline(mut self, content_id: impl Into<String>) -> Self {
        self.disposition = Disposition::Inline;
        self.content_id = Some(content_id.into());
        self
    }

    /// Identity used for de-duplication.
    pub fn id(&self) -> AttachmentId {
        self.id
    }

    /// Whether this is an inline part.
    pub fn is_inline(&self) -> bool {
        self.disposition == Disposition::Inline
    }

    /// Check header-bound fields and the inline content-id requirement.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("filename", self.filename.as_str()),
            ("mime type", self.mime_type.as_str()),
            ("content id", self.content_id.as_deref().unwrap_or("")),
        ] {
            if value.contains(['\r', '\n']) {
                return Err(MailError::LineBreakInjection(format!(
                    "attachment {field}: {value:?}"
                )));
            }
        }
        if self.mime_type.split_once('/').is_none() {
            return Err(MailError::Encoding(format!(
                "Invalid MIME type '{}'",
                self.mime_type
            )));
        }
        if self.is_inline() && self.content_id.as_deref().is_none_or(str::is_empty) {
            return Err(MailError::Encoding(format!(
                "Inline attachment '{}' has no content id",
                self.filename
            )));
        }
        Ok(())
    }

    /// Load the payload bytes.
    pub fn load(&self) -> Result<Cow<'_, [u8]>> {
        match &self.source {
            AttachmentSource::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
            AttachmentSource::File(path) => std::fs::read(path)
                .map(Cow::Owned)
                .map_err(|e| MailError::io(format!("reading attachment {}", path.display()), e)),
        }
    }
}

/// MIME type for a file name, `application/octet-stream` when unknown.
pub fn guess_mime_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
