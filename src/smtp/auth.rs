//! SMTP authentication mechanisms.
//!
//! Supports CRAM-MD5, LOGIN, PLAIN, NTLM and XOAUTH2. When no mechanism is
//! forced, the first one the server advertises in [`PREFERENCE`] order wins.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use tracing::debug;

use super::ntlm;
use super::session::SmtpSession;
use crate::error::{MailError, Result};

/// A SASL mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    CramMd5,
    Login,
    Plain,
    Ntlm,
    XOAuth2,
}

/// Auto-selection order.
pub const PREFERENCE: [Mechanism; 5] = [
    Mechanism::CramMd5,
    Mechanism::Login,
    Mechanism::Plain,
    Mechanism::Ntlm,
    Mechanism::XOAuth2,
];

impl Mechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CramMd5 => "CRAM-MD5",
            Self::Login => "LOGIN",
            Self::Plain => "PLAIN",
            Self::Ntlm => "NTLM",
            Self::XOAuth2 => "XOAUTH2",
        }
    }

    /// Parse a mechanism name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        PREFERENCE
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials for AUTH. For XOAUTH2 the password is the bearer token.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// NTLM domain.
    pub realm: String,
    /// NTLM workstation.
    pub workstation: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

/// Pick the mechanism to use from the server's advertised list.
///
/// A forced mechanism must be advertised too.
pub fn select(offered: &[String], forced: Option<&str>) -> Result<Mechanism> {
    if offered.is_empty() {
        return Err(MailError::AuthMechanismUnsupported(
            "server does not advertise AUTH".into(),
        ));
    }
    let is_offered = |m: Mechanism| offered.iter().any(|o| o.eq_ignore_ascii_case(m.as_str()));

    if let Some(name) = forced.filter(|n| !n.trim().is_empty()) {
        let mechanism = Mechanism::from_name(name)
            .ok_or_else(|| MailError::AuthMechanismUnsupported(format!("unknown mechanism {name}")))?;
        if !is_offered(mechanism) {
            return Err(MailError::AuthMechanismUnsupported(format!(
                "{mechanism} is not offered (server offers {})",
                offered.join(" ")
            )));
        }
        return Ok(mechanism);
    }

    PREFERENCE.into_iter().find(|m| is_offered(*m)).ok_or_else(|| {
        MailError::AuthMechanismUnsupported(format!(
            "no supported mechanism among {}",
            offered.join(" ")
        ))
    })
}

/// Run the AUTH exchange for `mechanism` on a greeted session.
pub fn authenticate(session: &mut SmtpSession, creds: &Credentials, mechanism: Mechanism) -> Result<()> {
    debug!(%mechanism, user = %creds.username, "Authenticating");
    match mechanism {
        Mechanism::Plain => {
            let line = format!("AUTH PLAIN {}", plain_token(&creds.username, &creds.password));
            expect(session.auth_exchange(&line, true)?, 235, mechanism)
        }
        Mechanism::Login => {
            expect(session.auth_exchange("AUTH LOGIN", false)?, 334, mechanism)?;
            expect(session.auth_exchange(&STANDARD.encode(&creds.username), true)?, 334, mechanism)?;
            expect(session.auth_exchange(&STANDARD.encode(&creds.password), true)?, 235, mechanism)
        }
        Mechanism::CramMd5 => {
            let reply = session.auth_exchange("AUTH CRAM-MD5", false)?;
            expect(reply.clone(), 334, mechanism)?;
            let challenge = reply.lines.first().cloned().unwrap_or_default();
            let response = cram_md5_response(&creds.username, &creds.password, &challenge)?;
            expect(session.auth_exchange(&response, true)?, 235, mechanism)
        }
        Mechanism::XOAuth2 => {
            let line = format!("AUTH XOAUTH2 {}", xoauth2_token(&creds.username, &creds.password));
            let reply = session.auth_exchange(&line, true)?;
            if reply.code == 334 {
                // Error details arrive base64-encoded; an empty line ends the exchange.
                let detail = STANDARD
                    .decode(reply.text().trim())
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .unwrap_or_else(|_| reply.text());
                let fin = session.auth_exchange("", false)?;
                return Err(MailError::AuthFailed(format!("XOAUTH2: {} {detail}", fin.code)));
            }
            expect(reply, 235, mechanism)
        }
        Mechanism::Ntlm => {
            let negotiate = STANDARD.encode(ntlm::negotiate_message());
            let reply = session.auth_exchange(&format!("AUTH NTLM {negotiate}"), false)?;
            expect(reply.clone(), 334, mechanism)?;
            let raw = STANDARD
                .decode(reply.text().trim())
                .map_err(|e| MailError::AuthFailed(format!("NTLM: invalid challenge encoding: {e}")))?;
            let challenge = ntlm::parse_challenge(&raw)?;
            let message = ntlm::authenticate_message(
                &challenge,
                &creds.username,
                &creds.password,
                &creds.realm,
                &creds.workstation,
                rand::random(),
                ntlm::timestamp_now(),
            );
            expect(session.auth_exchange(&STANDARD.encode(message), true)?, 235, mechanism)
        }
    }
}

fn expect(reply: super::reply::Reply, code: u16, mechanism: Mechanism) -> Result<()> {
    if reply.code == code {
        Ok(())
    } else {
        Err(MailError::AuthFailed(format!("{mechanism}: {}", reply.detail())))
    }
}

// ── Tokens ──────────────────────────────────────────────────────

/// `base64("\0user\0pass")`.
pub fn plain_token(username: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{username}\0{password}"))
}

/// `base64("user=<user>\x01auth=Bearer <token>\x01\x01")`.
pub fn xoauth2_token(username: &str, token: &str) -> String {
    STANDARD.encode(format!("user={username}\x01auth=Bearer {token}\x01\x01"))
}

/// `base64("<user> <hex hmac-md5(password, challenge)>")` for a base64 challenge.
pub fn cram_md5_response(username: &str, password: &str, challenge_b64: &str) -> Result<String> {
    let challenge = STANDARD
        .decode(challenge_b64.trim())
        .map_err(|e| MailError::AuthFailed(format!("Invalid CRAM-MD5 challenge: {e}")))?;
    let digest = cram_md5_digest(password, &challenge)?;
    Ok(STANDARD.encode(format!("{username} {digest}")))
}

/// Hex HMAC-MD5 of the challenge keyed by the password.
pub fn cram_md5_digest(password: &str, challenge: &[u8]) -> Result<String> {
    let mut mac = Hmac::<md5::Md5>::new_from_slice(password.as_bytes())
        .map_err(|e| MailError::AuthFailed(e.to_string()))?;
    mac.update(challenge);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
