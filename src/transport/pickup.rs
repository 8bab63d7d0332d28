//! Direct handoff: drop the message as an `.eml` file into a local MTA's
//! pickup directory.
//!
//! The file starts with `X-Sender`/`X-Receiver` envelope lines followed by
//! the raw RFC 5322 message. It is written under a temporary name and
//! renamed into place so the MTA never sees a partial file.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use super::{Envelope, SendReport, Transport};
use crate::error::{MailError, Result};
use crate::mime::ComposedMessage;

/// Writes messages into a pickup directory.
#[derive(Debug, Clone)]
pub struct PickupTransport {
    dir: PathBuf,
}

impl PickupTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one message and return the final path.
    pub fn write(&self, envelope: &Envelope, message: &ComposedMessage) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| MailError::io(format!("creating {}", self.dir.display()), e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".postkit-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| MailError::io("creating pickup file", e))?;

        let mut envelope_lines = format!("X-Sender: <{}>\r\n", envelope.sender);
        for rcpt in &envelope.recipients {
            envelope_lines.push_str(&format!("X-Receiver: <{rcpt}>\r\n"));
        }
        tmp.write_all(envelope_lines.as_bytes())
            .and_then(|_| tmp.write_all(&message.to_bytes()))
            .and_then(|_| tmp.flush())
            .map_err(|e| MailError::io("writing pickup file", e))?;

        let path = self.dir.join(eml_filename(&message.message_id));
        tmp.persist(&path)
            .map_err(|e| MailError::io(format!("renaming to {}", path.display()), e.error))?;
        Ok(path)
    }
}

impl Transport for PickupTransport {
    fn name(&self) -> &'static str {
        "pickup"
    }

    fn send(&mut self, envelope: &Envelope, message: &ComposedMessage) -> Result<SendReport> {
        if envelope.recipients.is_empty() {
            return Err(MailError::NoRecipients);
        }
        let path = self.write(envelope, message)?;
        info!(path = %path.display(), recipients = envelope.recipients.len(), "Message dropped for pickup");
        Ok(SendReport {
            accepted: envelope.recipients.clone(),
            rejected: Vec::new(),
        })
    }
}

/// Generate a unique file name for a message.
///
/// Format: `{timestamp}_{message-id}.eml`, truncated to 200 chars.
fn eml_filename(message_id: &str) -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S_%f").to_string();
    let id = sanitize_filename_part(message_id.trim_matches(['<', '>']), 120);
    let name = format!("{stamp}_{id}.eml");
    if name.len() > 200 {
        format!("{}.eml", &name[..196])
    } else {
        name
    }
}

/// Sanitize a string for use in filenames.
///
/// Replaces invalid characters with `_` and truncates to `max_len`.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}
