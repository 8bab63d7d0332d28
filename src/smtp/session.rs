//! SMTP session state machine.
//!
//! One session owns one connection and drives it strictly lock-step: one
//! command, one reply. Commands that carry raw CR or LF are refused before
//! anything is written.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::auth::{self, Credentials, Mechanism};
use super::capabilities::{Capabilities, Greeting};
use super::data;
use super::reply::{is_last_line, Reply};
use super::stream::{Connection, TlsSettings};
use crate::config::SmtpConfig;
use crate::error::{MailError, Result};

/// Where the session is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Socket open, greeting received.
    Connected,
    Greeted(Greeting),
    /// TLS is up; capabilities must be renegotiated.
    TlsNegotiated,
    Authenticated,
    /// `MAIL FROM` accepted.
    TransactionOpen,
    /// Message accepted after the terminating dot.
    DataSent,
}

/// Timeouts and TLS trust for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Socket read/write timeout.
    pub timeout: Duration,
    /// Cumulative time allowed for one reply. Doubled for the DATA terminator.
    pub time_limit: Duration,
    pub tls: TlsSettings,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            time_limit: Duration::from_secs(300),
            tls: TlsSettings::default(),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &SmtpConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            time_limit: Duration::from_secs(config.time_limit_secs.max(1)),
            tls: TlsSettings {
                verify_certificates: config.verify_certificates,
                ca_cert_path: config.ca_cert_path.clone(),
            },
        }
    }
}

/// Optional `MAIL FROM` parameters, each sent only when the server supports it.
#[derive(Debug, Clone, Default)]
pub struct MailOptions {
    /// Body contains 8-bit data (`BODY=8BITMIME`).
    pub eight_bit: bool,
    /// Envelope contains non-ASCII addresses (`SMTPUTF8`).
    pub smtputf8: bool,
    /// Request `XVERP`.
    pub verp: bool,
    /// Message size in octets, checked against `SIZE` and announced.
    pub size: Option<usize>,
}

/// A client session with one SMTP server.
#[derive(Debug)]
pub struct SmtpSession {
    conn: Option<Connection>,
    host: String,
    state: SessionState,
    capabilities: Capabilities,
    helo_name: Option<String>,
    greeting: Greeting,
    authenticated: bool,
    accepted_recipients: usize,
    last_reply: Option<Reply>,
    options: SessionOptions,
}

impl SmtpSession {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            conn: None,
            host: String::new(),
            state: SessionState::Disconnected,
            capabilities: Capabilities::default(),
            helo_name: None,
            greeting: Greeting::Ehlo,
            authenticated: false,
            accepted_recipients: 0,
            last_reply: None,
            options,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn last_reply(&self) -> Option<&Reply> {
        self.last_reply.as_ref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn is_tls(&self) -> bool {
        self.conn.as_ref().is_some_and(Connection::is_tls)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    // ── Connection ─────────────────────────────────────────────

    /// Open the connection and read the `220` greeting.
    ///
    /// With `implicit_tls`, TLS is negotiated before the greeting.
    pub fn connect(&mut self, host: &str, port: u16, implicit_tls: bool) -> Result<Reply> {
        if self.conn.is_some() {
            self.close();
        }
        let tls = implicit_tls.then_some(&self.options.tls);
        info!(host, port, implicit_tls, "Connecting to SMTP server");
        self.conn = Some(Connection::open(host, port, self.options.timeout, tls)?);
        self.host = host.to_string();
        self.state = SessionState::Connected;

        let greeting = match self.read_reply(self.options.time_limit) {
            Ok(reply) => reply,
            Err(e) => {
                self.close();
                return Err(match e {
                    MailError::Timeout(_) => e,
                    other => MailError::GreetingFailed(other.to_string()),
                });
            }
        };
        if greeting.code != 220 {
            self.close();
            return Err(MailError::GreetingFailed(greeting.detail()));
        }
        Ok(greeting)
    }

    /// Send `EHLO`, falling back to `HELO`, and record the capabilities.
    pub fn hello(&mut self, name: &str) -> Result<&Capabilities> {
        let ehlo = self.command(&format!("EHLO {name}"))?;
        let (caps, kind) = if ehlo.code == 250 {
            (Capabilities::from_ehlo(&ehlo), Greeting::Ehlo)
        } else {
            debug!(code = ehlo.code, "EHLO refused, trying HELO");
            let helo = self.command(&format!("HELO {name}"))?;
            if helo.code != 250 {
                return Err(MailError::GreetingFailed(helo.detail()));
            }
            (Capabilities::from_helo(&helo), Greeting::Helo)
        };
        debug!(
            server = %caps.server_name,
            extensions = ?caps.keywords().collect::<Vec<_>>(),
            "Greeted"
        );
        self.capabilities = caps;
        self.helo_name = Some(name.to_string());
        self.greeting = kind;
        self.state = SessionState::Greeted(kind);
        Ok(&self.capabilities)
    }

    /// Upgrade with `STARTTLS` and renegotiate capabilities with a new `EHLO`.
    pub fn start_tls(&mut self) -> Result<()> {
        if self.is_tls() {
            return Ok(());
        }
        if !self.capabilities.starttls() {
            return Err(MailError::TlsUnavailable(format!(
                "{} does not offer STARTTLS",
                self.host
            )));
        }
        let reply = self.command("STARTTLS")?;
        if reply.code != 220 {
            return Err(MailError::TlsNegotiationFailed(reply.detail()));
        }
        let conn = self
            .conn
            .take()
            .ok_or_else(|| MailError::TlsNegotiationFailed("not connected".into()))?;
        match conn.upgrade(&self.options.tls) {
            Ok(upgraded) => self.conn = Some(upgraded),
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(e);
            }
        }
        self.capabilities = Capabilities::default();
        self.state = SessionState::TlsNegotiated;
        info!(host = %self.host, "STARTTLS negotiated");

        let name = self
            .helo_name
            .clone()
            .unwrap_or_else(|| "localhost.localdomain".to_string());
        self.hello(&name)?;
        Ok(())
    }

    /// Authenticate with `mechanism`, or the best advertised one.
    pub fn authenticate(&mut self, creds: &Credentials, mechanism: Option<&str>) -> Result<Mechanism> {
        let chosen = auth::select(self.capabilities.auth_mechanisms(), mechanism)?;
        auth::authenticate(self, creds, chosen)?;
        self.authenticated = true;
        self.state = SessionState::Authenticated;
        info!(host = %self.host, mechanism = %chosen, "Authenticated");
        Ok(chosen)
    }

    // ── Transaction ────────────────────────────────────────────

    /// `MAIL FROM:<from>` with whatever extensions apply.
    pub fn mail(&mut self, from: &str, options: &MailOptions) -> Result<()> {
        let mut line = format!("MAIL FROM:<{from}>");
        if let Some(size) = options.size {
            if let Some(max) = self.capabilities.max_size() {
                if size as u64 > max {
                    return Err(MailError::rejected(
                        "MAIL FROM",
                        552,
                        format!("message size {size} exceeds server limit {max}"),
                    ));
                }
            }
            if self.capabilities.has("SIZE") {
                line.push_str(&format!(" SIZE={size}"));
            }
        }
        if options.eight_bit && self.capabilities.eight_bit_mime() {
            line.push_str(" BODY=8BITMIME");
        }
        if options.smtputf8 && self.capabilities.smtputf8() {
            line.push_str(" SMTPUTF8");
        }
        if options.verp && self.capabilities.has("XVERP") {
            line.push_str(" XVERP");
        }
        self.expect(&line, "MAIL FROM", &[250])?;
        self.accepted_recipients = 0;
        self.state = SessionState::TransactionOpen;
        Ok(())
    }

    /// `RCPT TO:<to>`. A refusal is `RecipientRejected` and leaves the
    /// transaction open.
    pub fn recipient(&mut self, to: &str, dsn_notify: &[String]) -> Result<()> {
        let mut line = format!("RCPT TO:<{to}>");
        if !dsn_notify.is_empty() && self.capabilities.dsn() {
            line.push_str(&format!(" NOTIFY={}", dsn_notify.join(",")));
        }
        let reply = self.command(&line)?;
        if reply.is_one_of(&[250, 251]) {
            self.accepted_recipients += 1;
            Ok(())
        } else {
            warn!(recipient = to, code = reply.code, "Recipient rejected");
            Err(MailError::RecipientRejected {
                address: to.to_string(),
                detail: reply.detail(),
            })
        }
    }

    /// Recipients accepted in the current transaction.
    pub fn accepted_recipients(&self) -> usize {
        self.accepted_recipients
    }

    /// Send the message. Requires at least one accepted recipient.
    pub fn data(&mut self, message: &[u8]) -> Result<Reply> {
        if self.accepted_recipients == 0 {
            return Err(MailError::NoRecipients);
        }
        self.expect("DATA", "DATA", &[354])?;

        let framed = data::frame(message);
        debug!(bytes = framed.len(), "C: <message data>");
        self.write_raw(&framed)?;
        self.write_raw(data::TERMINATOR)?;
        debug!("C: .");

        let reply = self.read_reply(self.options.time_limit * 2)?;
        if reply.code != 250 {
            return Err(MailError::DataRejected(reply.detail()));
        }
        self.state = SessionState::DataSent;
        self.accepted_recipients = 0;
        Ok(reply)
    }

    /// `RSET`: abort the current transaction.
    pub fn reset(&mut self) -> Result<()> {
        self.expect("RSET", "RSET", &[250])?;
        self.accepted_recipients = 0;
        self.state = if self.authenticated {
            SessionState::Authenticated
        } else {
            SessionState::Greeted(self.greeting)
        };
        Ok(())
    }

    pub fn noop(&mut self) -> Result<()> {
        self.expect("NOOP", "NOOP", &[250]).map(|_| ())
    }

    /// `VRFY`. 252 means the server will not verify but will accept.
    pub fn verify(&mut self, address: &str) -> Result<Reply> {
        self.expect(&format!("VRFY {address}"), "VRFY", &[250, 251, 252])
    }

    /// `QUIT` (expects 221), then close. The socket is closed regardless.
    pub fn quit(&mut self) -> Result<()> {
        if self.conn.is_none() {
            return Ok(());
        }
        let result = self.expect("QUIT", "QUIT", &[221]).map(|_| ());
        self.close();
        result
    }

    /// Close the socket without `QUIT`.
    pub fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.shutdown();
            debug!(host = %self.host, "Connection closed");
        }
        self.state = SessionState::Disconnected;
        self.capabilities = Capabilities::default();
        self.authenticated = false;
        self.accepted_recipients = 0;
    }

    // ── Command / reply ────────────────────────────────────────

    /// Send one command and read its reply, without judging the code.
    pub fn command(&mut self, line: &str) -> Result<Reply> {
        self.send_line(line, false)?;
        self.read_reply(self.options.time_limit)
    }

    /// Send one command and require one of `expected`.
    pub fn expect(&mut self, line: &str, name: &str, expected: &[u16]) -> Result<Reply> {
        let reply = self.command(line)?;
        if reply.is_one_of(expected) {
            Ok(reply)
        } else {
            Err(MailError::rejected(name, reply.code, reply.message()))
        }
    }

    /// One step of an AUTH exchange. `secret` lines are not logged.
    pub(crate) fn auth_exchange(&mut self, line: &str, secret: bool) -> Result<Reply> {
        self.send_line(line, secret)?;
        self.read_reply(self.options.time_limit)
    }

    fn send_line(&mut self, line: &str, secret: bool) -> Result<()> {
        if line.contains(['\r', '\n']) {
            return Err(MailError::LineBreakInjection(line.to_string()));
        }
        if secret {
            debug!("C: <credentials>");
        } else {
            debug!("C: {line}");
        }
        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        self.write_raw(&bytes)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let conn = self.conn.as_mut().ok_or_else(not_connected)?;
        if let Err(e) = conn.write_all(bytes) {
            self.close();
            return Err(e);
        }
        Ok(())
    }

    /// Read a full reply within `limit`. Any failure closes the connection.
    fn read_reply(&mut self, limit: Duration) -> Result<Reply> {
        let started = Instant::now();
        let mut raw = String::new();
        loop {
            let remaining = limit.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                self.close();
                return Err(MailError::Timeout(format!(
                    "no complete reply within {}s",
                    limit.as_secs()
                )));
            }
            let conn = self.conn.as_mut().ok_or_else(not_connected)?;
            let line = conn
                .set_read_timeout(remaining.min(self.options.timeout))
                .and_then(|_| conn.read_line());
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            };
            debug!("S: {}", line.trim_end());
            let last = is_last_line(line.trim_end());
            raw.push_str(&line);
            if last {
                break;
            }
        }
        let reply = match Reply::parse(&raw) {
            Ok(reply) => reply,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };
        self.last_reply = Some(reply.clone());
        Ok(reply)
    }
}

impl Drop for SmtpSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn not_connected() -> MailError {
    MailError::io(
        "sending command",
        std::io::Error::new(std::io::ErrorKind::NotConnected, "session is not connected"),
    )
}
