//! Message hand-off.
//!
//! Every transport implements [`Transport`]; [`AnyTransport`] is the closed
//! set selected by configuration.

pub mod pickup;
pub mod sendmail;
pub mod smtp;

use crate::config::{Config, TransportKind};
use crate::error::{MailError, Result};
use crate::mime::{ComposeOptions, ComposedMessage};

pub use pickup::PickupTransport;
pub use sendmail::SendmailTransport;
pub use smtp::SmtpTransport;

/// Envelope addresses and flags for one send, already in wire form.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    /// Return path (`MAIL FROM`).
    pub sender: String,
    /// Every To, Cc and Bcc address, in that order.
    pub recipients: Vec<String>,
    /// The body carries 8-bit data.
    pub eight_bit: bool,
    /// Stop at the first refused recipient instead of collecting refusals.
    pub abort_on_rejection: bool,
}

impl Envelope {
    /// Whether any envelope address needs `SMTPUTF8`.
    pub fn needs_smtputf8(&self) -> bool {
        !self.sender.is_ascii() || self.recipients.iter().any(|r| !r.is_ascii())
    }
}

/// Outcome of a hand-off that did not fail as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Recipients the transport accepted.
    pub accepted: Vec<String>,
    /// Refused recipients with the server's reason.
    pub rejected: Vec<(String, String)>,
}

impl SendReport {
    /// Whether the message went out to at least one recipient.
    pub fn delivered(&self) -> bool {
        !self.accepted.is_empty()
    }

    pub(crate) fn merge(&mut self, other: SendReport) {
        self.accepted.extend(other.accepted);
        self.rejected.extend(other.rejected);
    }
}

/// A way of handing a composed message to the next hop.
pub trait Transport {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Which envelope headers this transport needs written into the message.
    fn compose_options(&self, hostname: String) -> ComposeOptions {
        ComposeOptions {
            hostname,
            include_to: true,
            include_bcc: false,
        }
    }

    /// Hand the message off.
    fn send(&mut self, envelope: &Envelope, message: &ComposedMessage) -> Result<SendReport>;

    /// Release any held connection.
    fn close(&mut self) {}
}

/// The configured transport.
#[derive(Debug)]
pub enum AnyTransport {
    Smtp(SmtpTransport),
    Sendmail(SendmailTransport),
    Pickup(PickupTransport),
}

impl AnyTransport {
    /// Build the transport named by `config.transport.kind`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(match config.transport.kind {
            TransportKind::Smtp => Self::Smtp(SmtpTransport::new(
                config.smtp.clone(),
                config
                    .smtp
                    .helo
                    .clone()
                    .unwrap_or_else(|| config.message.resolved_hostname()),
            )),
            TransportKind::Sendmail => Self::Sendmail(SendmailTransport::new(
                config.transport.sendmail_path.clone(),
                config.smtp.single_to,
            )),
            TransportKind::Pickup => {
                let dir = config.transport.pickup_dir.clone().ok_or_else(|| {
                    MailError::Config("pickup transport needs transport.pickup_dir".into())
                })?;
                Self::Pickup(PickupTransport::new(dir))
            }
        })
    }

    fn inner(&mut self) -> &mut dyn Transport {
        match self {
            Self::Smtp(t) => t,
            Self::Sendmail(t) => t,
            Self::Pickup(t) => t,
        }
    }

    fn inner_ref(&self) -> &dyn Transport {
        match self {
            Self::Smtp(t) => t,
            Self::Sendmail(t) => t,
            Self::Pickup(t) => t,
        }
    }
}

impl Transport for AnyTransport {
    fn name(&self) -> &'static str {
        self.inner_ref().name()
    }

    fn compose_options(&self, hostname: String) -> ComposeOptions {
        self.inner_ref().compose_options(hostname)
    }

    fn send(&mut self, envelope: &Envelope, message: &ComposedMessage) -> Result<SendReport> {
        self.inner().send(envelope, message)
    }

    fn close(&mut self) {
        self.inner().close()
    }
}
