//! The logical message handed to the composer and the orchestrator.

use chrono::{DateTime, FixedOffset};
use tracing::debug;

use super::address::Address;
use super::attachment::Attachment;
use crate::config::MessageConfig;
use crate::encoding::transfer::TransferEncoding;
use crate::error::{MailError, Result};

/// Header names the composer writes itself; custom headers may not reuse them.
const RESERVED_HEADERS: &[&str] = &[
    "date",
    "to",
    "from",
    "cc",
    "bcc",
    "reply-to",
    "subject",
    "message-id",
    "mime-version",
    "content-type",
    "content-transfer-encoding",
];

/// A message under construction.
///
/// Built incrementally by the caller, then composed and sent once.
#[derive(Debug, Clone)]
pub struct Message {
    /// `From` header address.
    pub from: Address,
    /// Envelope sender (`MAIL FROM`, `Return-Path`). Defaults to `from`.
    pub envelope_from: Option<Address>,
    /// Primary recipients.
    pub to: Vec<Address>,
    /// Carbon-copy recipients.
    pub cc: Vec<Address>,
    /// Blind carbon-copy recipients (envelope only unless the transport needs them inlined).
    pub bcc: Vec<Address>,
    /// `Reply-To` addresses.
    pub reply_to: Vec<Address>,
    /// Subject line (unencoded).
    pub subject: String,
    /// Plain-text body, or the alternative text when `html_body` is set.
    pub plain_body: String,
    /// HTML body.
    pub html_body: Option<String>,
    /// Character set for bodies and header words.
    pub charset: String,
    /// Requested transfer encoding for text parts.
    pub encoding: TransferEncoding,
    /// `X-Priority` value (1 = highest, 5 = lowest).
    pub priority: Option<u8>,
    /// Explicit Message-ID (with angle brackets). Generated when absent.
    pub message_id: Option<String>,
    /// Explicit Date. Current local time when absent.
    pub date: Option<DateTime<FixedOffset>>,
    /// `In-Reply-To` message id.
    pub in_reply_to: Option<String>,
    /// `References` message ids.
    pub references: Vec<String>,
    /// Address for `Disposition-Notification-To` (read receipt request).
    pub confirm_reading_to: Option<Address>,
    /// `X-Mailer` value. Empty disables the header.
    pub x_mailer: String,
    /// Wrap the plain body at this many columns (0 = off).
    pub word_wrap: usize,
    /// Accept an empty body.
    pub allow_empty: bool,
    custom_headers: Vec<(String, String)>,
    attachments: Vec<Attachment>,
}

impl Message {
    /// A new message from `from`, with built-in defaults.
    pub fn new(from: Address) -> Self {
        Self::with_config(from, &MessageConfig::default())
    }

    /// A new message from `from`, taking defaults from `config`.
    pub fn with_config(from: Address, config: &MessageConfig) -> Self {
        Self {
            from,
            envelope_from: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: Vec::new(),
            subject: String::new(),
            plain_body: String::new(),
            html_body: None,
            charset: config.charset.clone(),
            encoding: config.encoding,
            priority: None,
            message_id: None,
            date: None,
            in_reply_to: None,
            references: Vec::new(),
            confirm_reading_to: None,
            x_mailer: config.x_mailer.clone(),
            word_wrap: config.word_wrap,
            allow_empty: config.allow_empty,
            custom_headers: Vec::new(),
            attachments: Vec::new(),
        }
    }

    // ── Builder helpers ─────────────────────────────────────────

    pub fn add_to(&mut self, address: Address) -> &mut Self {
        self.to.push(address);
        self
    }

    pub fn add_cc(&mut self, address: Address) -> &mut Self {
        self.cc.push(address);
        self
    }

    pub fn add_bcc(&mut self, address: Address) -> &mut Self {
        self.bcc.push(address);
        self
    }

    pub fn add_reply_to(&mut self, address: Address) -> &mut Self {
        self.reply_to.push(address);
        self
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.subject = subject.into();
        self
    }

    pub fn set_plain_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.plain_body = body.into();
        self
    }

    pub fn set_html_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.html_body = Some(body.into());
        self
    }

    /// Add a custom header. Reserved names and line breaks are rejected.
    pub fn add_custom_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = name.trim();
        let valid_name = !name.is_empty()
            && name
                .bytes()
                .all(|b| (0x21..=0x7E).contains(&b) && b != b':');
        if !valid_name || value.contains(['\r', '\n']) {
            return Err(MailError::LineBreakInjection(format!("{name}: {value}")));
        }
        if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            return Err(MailError::Config(format!(
                "Header '{name}' is set by the composer"
            )));
        }
        self.custom_headers.push((name.to_string(), value.trim().to_string()));
        Ok(())
    }

    /// Custom headers in insertion order.
    pub fn custom_headers(&self) -> &[(String, String)] {
        &self.custom_headers
    }

    /// Add an attachment or inline part.
    ///
    /// Returns `Ok(false)` without adding anything when the same attachment
    /// (by identity) is already present, or when an inline part with the same
    /// content id was added before. The first one wins.
    pub fn add_attachment(&mut self, attachment: Attachment) -> Result<bool> {
        attachment.validate()?;
        if self.attachments.iter().any(|a| a.id() == attachment.id()) {
            debug!(filename = %attachment.filename, "Attachment already added, skipping");
            return Ok(false);
        }
        if attachment.is_inline()
            && self
                .attachments
                .iter()
                .any(|a| a.is_inline() && a.content_id == attachment.content_id)
        {
            debug!(
                content_id = attachment.content_id.as_deref().unwrap_or(""),
                "Inline content id already used, skipping"
            );
            return Ok(false);
        }
        self.attachments.push(attachment);
        Ok(true)
    }

    /// All attachments in insertion order.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Remove every attachment.
    pub fn clear_attachments(&mut self) {
        self.attachments.clear();
    }

    pub fn has_inline_images(&self) -> bool {
        self.attachments.iter().any(Attachment::is_inline)
    }

    pub fn has_attachments(&self) -> bool {
        self.attachments.iter().any(|a| !a.is_inline())
    }

    /// Whether a non-empty HTML body and a plain alternative are both present.
    pub fn is_alternative(&self) -> bool {
        self.html_body.as_deref().is_some_and(|h| !h.is_empty()) && !self.plain_body.is_empty()
    }

    /// The envelope sender: `envelope_from`, or `from` when unset.
    pub fn sender(&self) -> &Address {
        self.envelope_from.as_ref().unwrap_or(&self.from)
    }

    /// To, Cc and Bcc recipients in that order.
    pub fn recipients(&self) -> impl Iterator<Item = &Address> {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }

    /// Check the invariants required before composing or sending.
    ///
    /// At least one recipient must be present, and no header-bound string may
    /// contain a raw CR or LF.
    pub fn validate(&self) -> Result<()> {
        if self.recipients().next().is_none() {
            return Err(MailError::NoRecipients);
        }
        let mut header_bound: Vec<(&str, &str)> = vec![
            ("Subject", self.subject.as_str()),
            ("Message-ID", self.message_id.as_deref().unwrap_or("")),
            ("In-Reply-To", self.in_reply_to.as_deref().unwrap_or("")),
            ("X-Mailer", self.x_mailer.as_str()),
            ("Charset", self.charset.as_str()),
        ];
        header_bound.extend(self.references.iter().map(|r| ("References", r.as_str())));
        for (name, value) in header_bound {
            if value.contains(['\r', '\n']) {
                return Err(MailError::LineBreakInjection(format!("{name}: {value:?}")));
            }
        }
        if let Some(p) = self.priority {
            if !(1..=5).contains(&p) {
                return Err(MailError::Config(format!("Priority {p} outside 1..=5")));
            }
        }
        Ok(())
    }
}
