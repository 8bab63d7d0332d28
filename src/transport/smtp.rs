//! SMTP transport: host fallback, per-recipient bookkeeping, keep-alive.

use tracing::{debug, info, warn};

use super::{Envelope, SendReport, Transport};
use crate::config::SmtpConfig;
use crate::delivery::hosts::{connect_first, parse_hosts};
use crate::error::{MailError, Result};
use crate::mime::ComposedMessage;
use crate::smtp::{MailOptions, SmtpSession};

/// Sends through an SMTP server picked from the configured host list.
#[derive(Debug)]
pub struct SmtpTransport {
    config: SmtpConfig,
    helo: String,
    session: Option<SmtpSession>,
}

impl SmtpTransport {
    pub fn new(config: SmtpConfig, helo: String) -> Self {
        Self {
            config,
            helo,
            session: None,
        }
    }

    /// The held session, if keep-alive left one open.
    pub fn session(&self) -> Option<&SmtpSession> {
        self.session.as_ref()
    }

    /// Reuse the kept session when it still answers, else connect anew.
    fn ready_session(&mut self) -> Result<SmtpSession> {
        if let Some(mut session) = self.session.take() {
            match session.noop().and_then(|_| session.reset()) {
                Ok(()) => {
                    debug!(host = %session.host(), "Reusing SMTP session");
                    return Ok(session);
                }
                Err(e) => {
                    debug!(error = %e, "Kept session is stale, reconnecting");
                    session.close();
                }
            }
        }
        let hosts = parse_hosts(&self.config.hosts, self.config.port, self.config.security)?;
        connect_first(&hosts, &self.config, &self.helo)
    }

    /// One MAIL/RCPT/DATA transaction for `recipients`.
    fn transaction(
        &self,
        session: &mut SmtpSession,
        envelope: &Envelope,
        recipients: &[String],
        bytes: &[u8],
    ) -> Result<SendReport> {
        let options = MailOptions {
            eight_bit: envelope.eight_bit,
            smtputf8: envelope.needs_smtputf8(),
            verp: self.config.verp,
            size: Some(bytes.len()),
        };
        session.mail(&envelope.sender, &options)?;

        let mut report = SendReport::default();
        for rcpt in recipients {
            match session.recipient(rcpt, &self.config.dsn_notify) {
                Ok(()) => report.accepted.push(rcpt.clone()),
                Err(MailError::RecipientRejected { address, detail }) => {
                    if envelope.abort_on_rejection {
                        let _ = session.reset();
                        return Err(MailError::RecipientRejected { address, detail });
                    }
                    report.rejected.push((address, detail));
                }
                Err(e) => return Err(e),
            }
        }

        if report.accepted.is_empty() {
            warn!("Every recipient was rejected, DATA not sent");
            session.reset()?;
            return Ok(report);
        }
        session.data(bytes)?;
        info!(
            host = %session.host(),
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            "Message accepted"
        );
        Ok(report)
    }
}

impl Transport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn send(&mut self, envelope: &Envelope, message: &ComposedMessage) -> Result<SendReport> {
        if envelope.recipients.is_empty() {
            return Err(MailError::NoRecipients);
        }
        let mut session = self.ready_session()?;
        let bytes = message.to_bytes();

        let result = if self.config.single_to {
            let mut report = SendReport::default();
            let mut outcome = Ok(());
            for rcpt in &envelope.recipients {
                match self.transaction(&mut session, envelope, std::slice::from_ref(rcpt), &bytes) {
                    Ok(r) => report.merge(r),
                    Err(e) if e.is_transport() || envelope.abort_on_rejection => {
                        outcome = Err(e);
                        break;
                    }
                    Err(e) => {
                        let _ = session.reset();
                        report.rejected.push((rcpt.clone(), e.to_string()));
                    }
                }
            }
            outcome.map(|_| report)
        } else {
            self.transaction(&mut session, envelope, &envelope.recipients, &bytes)
        };

        let healthy = match result {
            Ok(_) => true,
            Err(ref e) => !e.is_transport() && session.reset().is_ok(),
        };
        if self.config.keep_alive && healthy && session.is_connected() {
            self.session = Some(session);
        } else if let Err(e) = session.quit() {
            debug!(error = %e, "QUIT failed");
        }
        result
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.quit() {
                debug!(error = %e, "QUIT failed");
            }
        }
    }
}

impl Drop for SmtpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
