//! The delivery orchestrator and collaborator-facing API.
//!
//! `Mailer` owns the configuration, a [`PolicyStack`], pending attachments
//! and the transport. Every send returns a [`DeliveryResult`]; errors never
//! escape as `Err`.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::result::DeliveryResult;
use crate::config::{Config, Policy, PolicyStack, RecipientFailure, Security, SigningFailure, TransportKind};
use crate::dkim::DkimSigner;
use crate::error::{MailError, Result};
use crate::mime::html::html_to_text;
use crate::mime::{compose, ComposedMessage};
use crate::model::address::{Address, ValidationStrategy};
use crate::model::attachment::Attachment;
use crate::model::message::Message;
use crate::smime::SmimeSigner;
use crate::transport::{AnyTransport, Envelope, Transport};

/// Sends messages according to a [`Config`].
#[derive(Debug)]
pub struct Mailer {
    config: Config,
    policy: PolicyStack,
    attachments: Vec<Attachment>,
    smime: Option<SmimeSigner>,
    transport: Option<AnyTransport>,
}

impl Mailer {
    pub fn new(config: Config) -> Self {
        let policy = PolicyStack::new(config.policy);
        Self {
            config,
            policy,
            attachments: Vec::new(),
            smime: None,
            transport: None,
        }
    }

    /// A mailer using the configuration file from the standard locations.
    pub fn from_default_config() -> Self {
        Self::new(crate::config::load_config())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Change the configuration. Any held connection is dropped.
    pub fn config_mut(&mut self) -> &mut Config {
        self.close();
        &mut self.config
    }

    /// Scoped policy overrides for the following sends.
    pub fn policy_mut(&mut self) -> &mut PolicyStack {
        &mut self.policy
    }

    pub fn policy(&self) -> Policy {
        self.policy.current()
    }

    /// Point the mailer at an SMTP server.
    ///
    /// `host` may be a `;`-separated host list with `ssl://`/`tls://`
    /// prefixes. An empty username disables AUTH.
    pub fn configure_smtp(&mut self, host: &str, username: &str, password: &str, port: u16, security: Security) {
        self.close();
        let smtp = &mut self.config.smtp;
        smtp.hosts = host.to_string();
        smtp.username = username.to_string();
        smtp.password = password.to_string();
        smtp.port = port;
        smtp.security = security;
        self.config.transport.kind = TransportKind::Smtp;
    }

    /// Queue an attachment for every following send until
    /// [`Mailer::clear_attachments`].
    pub fn add_attachment(&mut self, attachment: Attachment) -> Result<()> {
        attachment.validate()?;
        self.attachments.push(attachment);
        Ok(())
    }

    /// Queue a file attachment. MIME type guessed from the name when `None`.
    pub fn add_file_attachment(
        &mut self,
        path: impl Into<PathBuf>,
        filename: Option<&str>,
        mime_type: Option<&str>,
        content_id: Option<&str>,
    ) -> Result<()> {
        let mut attachment = Attachment::from_path(path);
        if let Some(name) = filename {
            attachment = attachment.with_filename(name);
        }
        if let Some(mime) = mime_type {
            attachment = attachment.with_mime_type(mime);
        }
        if let Some(cid) = content_id {
            attachment = attachment.inline(cid);
        }
        self.add_attachment(attachment)
    }

    pub fn clear_attachments(&mut self) {
        self.attachments.clear();
    }

    /// Sign following messages with S/MIME through the `openssl` tool.
    pub fn sign(
        &mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        passphrase: Option<&str>,
        chain_path: Option<PathBuf>,
    ) {
        self.smime = Some(SmimeSigner::new(
            cert_path,
            key_path,
            passphrase.map(String::from),
            chain_path,
        ));
    }

    /// A message from `from` with the configured message defaults.
    pub fn new_message(&self, from: Address) -> Message {
        Message::with_config(from, &self.config.message)
    }

    /// Send a plain-text message. Unparseable recipients are reported in
    /// the result.
    pub fn send_text_message(&mut self, from: &str, to: &[&str], subject: &str, body: &str) -> DeliveryResult {
        self.send_simple(from, to, subject, |message| {
            message.set_plain_body(body);
        })
    }

    /// Send an HTML message with a plain-text alternative derived from it.
    pub fn send_html_message(&mut self, from: &str, to: &[&str], subject: &str, html_body: &str) -> DeliveryResult {
        self.send_simple(from, to, subject, |message| {
            message.set_html_body(html_body);
            message.set_plain_body(html_to_text(html_body));
        })
    }

    fn send_simple(&mut self, from: &str, to: &[&str], subject: &str, fill: impl FnOnce(&mut Message)) -> DeliveryResult {
        let mut errors = BTreeMap::new();
        let from = match Address::parse(from) {
            Ok(address) => address,
            Err(e) => return DeliveryResult::failed(&e, errors, None),
        };
        let abort = self.policy.current().recipient_failure == RecipientFailure::Abort;
        let mut message = self.new_message(from);
        for raw in to {
            match Address::parse(raw) {
                Ok(address) => {
                    message.add_to(address);
                }
                Err(e) if abort => return DeliveryResult::failed(&e, errors, None),
                Err(e) => {
                    errors.insert(raw.to_string(), e.to_string());
                }
            }
        }
        message.set_subject(subject);
        fill(&mut message);
        self.send_collecting(message, errors)
    }

    /// Compose, sign and hand off `message`.
    pub fn send(&mut self, message: Message) -> DeliveryResult {
        self.send_collecting(message, BTreeMap::new())
    }

    fn send_collecting(&mut self, message: Message, mut errors: BTreeMap<String, String>) -> DeliveryResult {
        let mut message_id = None;
        match self.try_send(message, &mut errors, &mut message_id) {
            Ok(id) => DeliveryResult::delivered(id, errors),
            Err(e) => {
                warn!(error = %e, "Send failed");
                DeliveryResult::failed(&e, errors, message_id)
            }
        }
    }

    fn try_send(
        &mut self,
        mut message: Message,
        errors: &mut BTreeMap<String, String>,
        message_id: &mut Option<String>,
    ) -> Result<String> {
        let policy = self.policy.current();
        let strategy = self.config.message.validation;
        let abort = policy.recipient_failure == RecipientFailure::Abort;

        // Punycode only now that the charset is final.
        message.from = prepare_address(&message.from, strategy)?;
        if let Some(sender) = message.envelope_from.take() {
            message.envelope_from = Some(prepare_address(&sender, strategy)?);
        }
        for list in [&mut message.to, &mut message.cc, &mut message.bcc] {
            let mut kept = Vec::with_capacity(list.len());
            for address in list.drain(..) {
                match prepare_address(&address, strategy) {
                    Ok(prepared) => kept.push(prepared),
                    Err(e) if abort => return Err(e),
                    Err(e) => {
                        errors.insert(address.address.clone(), e.to_string());
                    }
                }
            }
            *list = kept;
        }
        if message.to.is_empty() && message.cc.is_empty() && message.bcc.is_empty() {
            return Err(MailError::NoRecipients);
        }
        for attachment in &self.attachments {
            message.add_attachment(attachment.clone())?;
        }

        if self.transport.is_none() {
            self.transport = Some(AnyTransport::from_config(&self.config)?);
        }
        let hostname = self.config.message.resolved_hostname();
        let transport = match self.transport.as_mut() {
            Some(t) => t,
            None => return Err(MailError::Config("no transport".into())),
        };

        let mut composed = compose(&message, &transport.compose_options(hostname))?;
        *message_id = Some(composed.message_id.clone());
        apply_signatures(&mut composed, self.smime.as_ref(), &self.config, policy)?;

        let envelope = build_envelope(&message, composed.eight_bit, abort);
        debug!(
            transport = transport.name(),
            recipients = envelope.recipients.len(),
            bytes = composed.size(),
            "Handing off message"
        );
        let report = transport.send(&envelope, &composed)?;

        let mut last_rejection = None;
        for (address, detail) in report.rejected {
            errors.insert(address.clone(), detail.clone());
            last_rejection = Some(MailError::RecipientRejected { address, detail });
        }
        if report.accepted.is_empty() {
            return Err(last_rejection.unwrap_or(MailError::NoRecipients));
        }
        info!(
            message_id = %composed.message_id,
            accepted = report.accepted.len(),
            rejected = errors.len(),
            "Message sent"
        );
        Ok(composed.message_id)
    }

    /// Close any held connection.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }
}

impl Drop for Mailer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Punycode the domain, then validate.
fn prepare_address(address: &Address, strategy: ValidationStrategy) -> Result<Address> {
    let ascii = address.to_ascii()?;
    if ascii.is_valid(strategy) {
        Ok(ascii)
    } else {
        Err(MailError::AddressInvalid(address.address.clone()))
    }
}

/// S/MIME first since it rewrites the body, DKIM last over the final bytes.
fn apply_signatures(
    composed: &mut ComposedMessage,
    smime: Option<&SmimeSigner>,
    config: &Config,
    policy: Policy,
) -> Result<()> {
    let mut outcomes = Vec::new();
    if let Some(signer) = smime {
        outcomes.push(signer.sign(composed));
    }
    if let Some(ref dkim) = config.dkim {
        outcomes.push(DkimSigner::from_config(dkim).and_then(|signer| signer.sign(composed)));
    }
    for outcome in outcomes {
        if let Err(e) = outcome {
            match policy.signing_failure {
                SigningFailure::Fatal => return Err(e),
                SigningFailure::Skip => warn!(error = %e, "Signing failed, sending unsigned"),
            }
        }
    }
    Ok(())
}

/// Envelope with duplicates removed (case-insensitive, first wins).
fn build_envelope(message: &Message, eight_bit: bool, abort_on_rejection: bool) -> Envelope {
    let mut seen = HashSet::new();
    let recipients = message
        .recipients()
        .filter(|a| seen.insert(a.address.to_ascii_lowercase()))
        .map(|a| a.address.clone())
        .collect();
    Envelope {
        sender: message.sender().address.clone(),
        recipients,
        eight_bit,
        abort_on_rejection,
    }
}
