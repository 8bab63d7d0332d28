//! Message composition: header block plus encoded, possibly multipart, body.

use chrono::Local;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::headers::HeaderBlock;
use super::part::{Leaf, MimePart, MultipartKind};
use crate::encoding::header::{encode_header, HeaderPosition};
use crate::encoding::transfer::{choose_text_encoding, encode_body, has_long_lines, TransferEncoding};
use crate::encoding::wrap::wrap_text;
use crate::encoding::{charset, CRLF, MAX_LINE_LENGTH};
use crate::error::{MailError, Result};
use crate::model::address::Address;
use crate::model::attachment::Attachment;
use crate::model::message::Message;

/// Which combination of alternative bodies, inline parts and attachments a
/// message has. Selects how multipart nodes nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageShape {
    Plain,
    Alt,
    Inline,
    Attach,
    InlineAttach,
    AltInline,
    AltAttach,
    AltInlineAttach,
}

impl MessageShape {
    /// Shape from the three message flags.
    pub fn from_flags(alternative: bool, inline: bool, attach: bool) -> Self {
        match (alternative, inline, attach) {
            (false, false, false) => Self::Plain,
            (true, false, false) => Self::Alt,
            (false, true, false) => Self::Inline,
            (false, false, true) => Self::Attach,
            (false, true, true) => Self::InlineAttach,
            (true, true, false) => Self::AltInline,
            (true, false, true) => Self::AltAttach,
            (true, true, true) => Self::AltInlineAttach,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Alt => "alt",
            Self::Inline => "inline",
            Self::Attach => "attach",
            Self::InlineAttach => "inline_attach",
            Self::AltInline => "alt_inline",
            Self::AltAttach => "alt_attach",
            Self::AltInlineAttach => "alt_inline_attach",
        }
    }
}

/// Transport-dependent composition switches.
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    /// Host name used on the right-hand side of generated Message-IDs.
    pub hostname: String,
    /// Write the `To` header (transports that pass To separately turn this off).
    pub include_to: bool,
    /// Write the `Bcc` header (needed by `sendmail -t`, which strips it).
    pub include_bcc: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            hostname: "localhost.localdomain".to_string(),
            include_to: true,
            include_bcc: false,
        }
    }
}

/// A composed message ready for signing and transmission.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    /// Header fields in wire order.
    pub headers: HeaderBlock,
    /// Encoded body, CRLF line endings.
    pub body: Vec<u8>,
    /// The Message-ID written in the headers.
    pub message_id: String,
    /// The shape the body was built as.
    pub shape: MessageShape,
    /// Whether any part uses 8bit or binary encoding.
    pub eight_bit: bool,
}

impl ComposedMessage {
    /// Rendered header block, each field ending in CRLF, without the blank separator line.
    pub fn header_string(&self) -> String {
        self.headers.render()
    }

    /// The full message: headers, blank line, body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let headers = self.header_string();
        let mut out = Vec::with_capacity(headers.len() + 2 + self.body.len());
        out.extend_from_slice(headers.as_bytes());
        out.extend_from_slice(CRLF.as_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Replace the content headers and body (after external signing).
    pub fn replace_content(&mut self, content_headers: HeaderBlock, body: Vec<u8>) {
        for name in ["MIME-Version", "Content-Type", "Content-Transfer-Encoding"] {
            self.headers.remove(name);
        }
        self.headers.push("MIME-Version", "1.0");
        for (name, value) in content_headers.iter() {
            if !name.eq_ignore_ascii_case("MIME-Version") {
                self.headers.push(name, value);
            }
        }
        self.body = body;
    }

    /// Approximate wire size in octets.
    pub fn size(&self) -> usize {
        self.header_string().len() + 2 + self.body.len()
    }
}

/// Compose `message` into headers and body.
///
/// Fails with `EmptyMessageRejected` when there is no body text and empty
/// messages are not allowed, `NoRecipients` without recipients, and
/// `LineBreakInjection` when a header-bound string carries CR/LF.
pub fn compose(message: &Message, options: &ComposeOptions) -> Result<ComposedMessage> {
    message.validate()?;
    charset::lookup(&message.charset)?;

    let html = message.html_body.as_deref().filter(|h| !h.is_empty());
    if message.plain_body.is_empty() && html.is_none() && !message.allow_empty {
        return Err(MailError::EmptyMessageRejected);
    }

    let inline_parts: Vec<&Attachment> = message.attachments().iter().filter(|a| a.is_inline()).collect();
    let attachments: Vec<&Attachment> = message.attachments().iter().filter(|a| !a.is_inline()).collect();
    let alternative = message.is_alternative();
    let shape = MessageShape::from_flags(alternative, message.has_inline_images(), message.has_attachments());
    debug!(shape = shape.as_str(), "Composing message");

    // Main body: HTML when present, plain text otherwise
    let main = match html {
        Some(html) => text_leaf(html, "text/html", message, false)?,
        None => text_leaf(&message.plain_body, "text/plain", message, true)?,
    };

    let main = if inline_parts.is_empty() {
        main
    } else {
        let mut children = vec![main];
        for att in &inline_parts {
            children.push(attachment_leaf(att, &message.charset)?);
        }
        MimePart::multipart(MultipartKind::Related, children)
    };

    let content = if alternative {
        let plain = text_leaf(&message.plain_body, "text/plain", message, true)?;
        MimePart::multipart(MultipartKind::Alternative, vec![plain, main])
    } else {
        main
    };

    let mut root = if attachments.is_empty() {
        content
    } else {
        let mut children = vec![content];
        for att in &attachments {
            children.push(attachment_leaf(att, &message.charset)?);
        }
        MimePart::multipart(MultipartKind::Mixed, children)
    };
    root.assign_boundaries();

    let eight_bit = root.leaves().iter().any(|l| l.encoding.is_eight_bit());
    let message_id = match message.message_id {
        Some(ref id) => id.clone(),
        None => generate_message_id(&options.hostname),
    };

    let mut headers = build_headers(message, options, &message_id)?;
    headers.push("MIME-Version", "1.0");
    for (name, value) in root.content_headers().iter() {
        headers.push(name, value);
    }

    let mut body = Vec::new();
    root.write_body(&mut body, true);

    Ok(ComposedMessage {
        headers,
        body,
        message_id,
        shape,
        eight_bit,
    })
}

/// Header fields in their fixed order, up to the MIME headers.
fn build_headers(message: &Message, options: &ComposeOptions, message_id: &str) -> Result<HeaderBlock> {
    let charset = message.charset.as_str();
    let mut headers = HeaderBlock::new();

    let date = match message.date {
        Some(date) => date.to_rfc2822(),
        None => Local::now().to_rfc2822(),
    };
    headers.push("Date", date);

    if options.include_to {
        if !message.to.is_empty() {
            headers.push("To", address_list(&message.to, charset)?);
        } else if message.cc.is_empty() {
            headers.push("To", "undisclosed-recipients:;");
        }
    }
    headers.push("From", message.from.format(charset)?);
    if !message.cc.is_empty() {
        headers.push("Cc", address_list(&message.cc, charset)?);
    }
    if options.include_bcc && !message.bcc.is_empty() {
        headers.push("Bcc", address_list(&message.bcc, charset)?);
    }
    if !message.reply_to.is_empty() {
        headers.push("Reply-To", address_list(&message.reply_to, charset)?);
    }
    headers.push(
        "Subject",
        encode_header(message.subject.trim(), charset, HeaderPosition::Text)?,
    );
    headers.push("Message-ID", message_id);
    if let Some(priority) = message.priority {
        headers.push("X-Priority", priority.to_string());
    }
    if !message.x_mailer.is_empty() {
        headers.push("X-Mailer", message.x_mailer.clone());
    }
    if let Some(ref in_reply_to) = message.in_reply_to {
        headers.push("In-Reply-To", in_reply_to.clone());
    }
    if !message.references.is_empty() {
        headers.push("References", message.references.join(" "));
    }
    if let Some(ref confirm) = message.confirm_reading_to {
        headers.push("Disposition-Notification-To", format!("<{}>", confirm.address));
    }
    for (name, value) in message.custom_headers() {
        headers.push(name.clone(), encode_header(value, charset, HeaderPosition::Text)?);
    }
    Ok(headers)
}

fn address_list(addresses: &[Address], charset: &str) -> Result<String> {
    let formatted = addresses
        .iter()
        .map(|a| a.format(charset))
        .collect::<Result<Vec<_>>>()?;
    Ok(formatted.join(", "))
}

/// Build a text leaf in the message charset.
fn text_leaf(text: &str, mime_type: &str, message: &Message, is_plain: bool) -> Result<MimePart> {
    let wrapped;
    let text = if is_plain && message.word_wrap > 0 {
        wrapped = wrap_text(text, message.word_wrap, false);
        wrapped.as_str()
    } else {
        text
    };
    let bytes = charset::encode_text(text, &message.charset)?;
    let encoding = choose_text_encoding(message.encoding, &bytes);
    Ok(MimePart::Leaf(Leaf {
        content_type: format!("{mime_type}; charset={}", message.charset),
        encoding,
        content_id: None,
        disposition: None,
        body: encode_body(&bytes, encoding),
    }))
}

/// Build an attachment or inline leaf, reading file-backed payloads now.
fn attachment_leaf(attachment: &Attachment, charset_name: &str) -> Result<MimePart> {
    let payload = attachment.load()?;
    let mut encoding = attachment.encoding;
    if encoding != TransferEncoding::Base64 && has_long_lines(&payload, MAX_LINE_LENGTH) {
        encoding = TransferEncoding::QuotedPrintable;
    }

    let name = quoted_parameter(&attachment.filename, charset_name)?;
    Ok(MimePart::Leaf(Leaf {
        content_type: format!("{}; name={name}", attachment.mime_type),
        encoding,
        content_id: attachment.content_id.clone(),
        disposition: Some(format!("{}; filename={name}", attachment.disposition.as_str())),
        body: encode_body(&payload, encoding),
    }))
}

/// A file name as a quoted parameter value; non-ASCII names become encoded words.
fn quoted_parameter(value: &str, charset_name: &str) -> Result<String> {
    if value.is_ascii() {
        return encode_header(value, charset_name, HeaderPosition::Phrase);
    }
    let encoded = encode_header(value, charset_name, HeaderPosition::Text)?;
    Ok(format!("\"{encoded}\""))
}

/// A fresh Message-ID: `<` 32 hex digits of SHA-256(time, random) `@host>`.
pub fn generate_message_id(hostname: &str) -> String {
    let mut seed = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut seed);
    let mut hasher = Sha256::new();
    hasher.update(Local::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(seed);
    let digest = hex::encode(hasher.finalize());
    format!("<{}@{hostname}>", &digest[..32])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        let mut msg = Message::new(Address::parse("Sender <sender@example.com>").unwrap());
        msg.add_to(Address::parse("rcpt@example.com").unwrap());
        msg.set_subject("Hello");
        msg
    }

    fn header_names(composed: &ComposedMessage) -> Vec<String> {
        composed.headers.iter().map(|(n, _)| n.to_string()).collect()
    }

    #[test]
    fn test_plain_ascii_passthrough() {
        let mut msg = message();
        msg.set_plain_body("Hello there.\r\nSecond line.\r\n");
        let composed = compose(&msg, &ComposeOptions::default()).unwrap();
        assert_eq!(composed.shape, MessageShape::Plain);
        assert_eq!(composed.body, b"Hello there.\r\nSecond line.\r\n".to_vec());
        assert_eq!(composed.headers.get("Content-Transfer-Encoding"), Some("7bit"));
        assert!(!composed.eight_bit);
    }

    #[test]
    fn test_header_order() {
        let mut msg = message();
        msg.set_plain_body("x");
        msg.add_cc(Address::parse("cc@example.com").unwrap());
        msg.add_bcc(Address::parse("bcc@example.com").unwrap());
        msg.add_reply_to(Address::parse("reply@example.com").unwrap());
        msg.priority = Some(1);
        msg.add_custom_header("X-Tag", "t").unwrap();
        let options = ComposeOptions {
            include_bcc: true,
            ..ComposeOptions::default()
        };
        let composed = compose(&msg, &options).unwrap();
        assert_eq!(
            header_names(&composed),
            [
                "Date",
                "To",
                "From",
                "Cc",
                "Bcc",
                "Reply-To",
                "Subject",
                "Message-ID",
                "X-Priority",
                "X-Mailer",
                "X-Tag",
                "MIME-Version",
                "Content-Type",
                "Content-Transfer-Encoding",
            ]
        );
    }

    #[test]
    fn test_bcc_omitted_by_default() {
        let mut msg = message();
        msg.set_plain_body("x");
        msg.add_bcc(Address::parse("hidden@example.com").unwrap());
        let composed = compose(&msg, &ComposeOptions::default()).unwrap();
        assert!(!composed.headers.contains("Bcc"));
        assert!(!composed.header_string().contains("hidden@example.com"));
    }

    #[test]
    fn test_empty_body_rejected_unless_allowed() {
        let mut msg = message();
        assert!(matches!(
            compose(&msg, &ComposeOptions::default()),
            Err(MailError::EmptyMessageRejected)
        ));
        msg.allow_empty = true;
        assert!(compose(&msg, &ComposeOptions::default()).is_ok());
    }

    #[test]
    fn test_long_line_forces_quoted_printable() {
        let mut msg = message();
        msg.set_plain_body(format!("{}\r\nshort\r\n", "y".repeat(2000)));
        let composed = compose(&msg, &ComposeOptions::default()).unwrap();
        assert_eq!(
            composed.headers.get("Content-Transfer-Encoding"),
            Some("quoted-printable")
        );
        for line in composed.body.split(|&b| b == b'\n') {
            assert!(line.len() <= 77);
        }
    }

    #[test]
    fn test_all_eight_shapes() {
        let cases = [
            (false, false, false, MessageShape::Plain),
            (true, false, false, MessageShape::Alt),
            (false, true, false, MessageShape::Inline),
            (false, false, true, MessageShape::Attach),
            (false, true, true, MessageShape::InlineAttach),
            (true, true, false, MessageShape::AltInline),
            (true, false, true, MessageShape::AltAttach),
            (true, true, true, MessageShape::AltInlineAttach),
        ];
        for (alt, inline, attach, expected) in cases {
            let mut msg = message();
            msg.set_plain_body("plain");
            if alt {
                msg.set_html_body("<p>html</p>");
            }
            if inline {
                msg.add_attachment(Attachment::from_bytes(vec![1, 2, 3], "i.png").inline("img"))
                    .unwrap();
            }
            if attach {
                msg.add_attachment(Attachment::from_bytes(vec![4, 5, 6], "doc.pdf"))
                    .unwrap();
            }
            let composed = compose(&msg, &ComposeOptions::default()).unwrap();
            assert_eq!(composed.shape, expected);
            let content_type = composed.headers.get("Content-Type").unwrap();
            let top = match (alt, inline, attach) {
                (_, _, true) => "multipart/mixed",
                (true, _, false) => "multipart/alternative",
                (false, true, false) => "multipart/related",
                (false, false, false) => "text/plain",
            };
            assert!(content_type.starts_with(top), "{expected:?}: {content_type}");
        }
    }

    #[test]
    fn test_message_id_format() {
        let id = generate_message_id("mail.example.com");
        assert!(id.starts_with('<') && id.ends_with("@mail.example.com>"));
        assert_eq!(id.len(), 1 + 32 + 1 + "mail.example.com".len() + 1);
        assert_ne!(id, generate_message_id("mail.example.com"));
    }

    #[test]
    fn test_non_ascii_subject_encoded() {
        let mut msg = message();
        msg.set_subject("Grüße aus Köln");
        msg.set_plain_body("Grüße");
        let composed = compose(&msg, &ComposeOptions::default()).unwrap();
        let subject = composed.headers.get("Subject").unwrap();
        assert!(subject.starts_with("=?utf-8?"));
        assert_eq!(composed.headers.get("Content-Transfer-Encoding"), Some("8bit"));
        assert!(composed.eight_bit);
    }

    #[test]
    fn test_undisclosed_recipients() {
        let mut msg = Message::new(Address::parse("s@example.com").unwrap());
        msg.add_bcc(Address::parse("b@example.com").unwrap());
        msg.set_plain_body("x");
        let composed = compose(&msg, &ComposeOptions::default()).unwrap();
        assert_eq!(composed.headers.get("To"), Some("undisclosed-recipients:;"));
    }
}
