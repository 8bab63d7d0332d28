//! Candidate SMTP hosts and establishing a ready session on the first that works.
//!
//! A host list is `;`-separated. Each entry may carry an `ssl://` (implicit
//! TLS) or `tls://` (STARTTLS) prefix and a `:port` suffix:
//! `tls://smtp1.example.com:587;ssl://smtp2.example.com:465;[2001:db8::1]`.

use std::net::IpAddr;

use tracing::{info, warn};

use crate::config::{is_valid_host, Security, SmtpConfig};
use crate::error::{MailError, Result};
use crate::smtp::{Credentials, SessionOptions, SmtpSession};

/// One candidate host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub host: String,
    pub port: u16,
    pub security: Security,
    /// Security came from an `ssl://`/`tls://` prefix.
    pub explicit: bool,
}

impl std::fmt::Display for HostSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match (self.explicit, self.security) {
            (true, Security::Implicit) => "ssl://",
            (true, Security::StartTls) => "tls://",
            _ => "",
        };
        if self.host.contains(':') {
            write!(f, "{scheme}[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{scheme}{}:{}", self.host, self.port)
        }
    }
}

/// Parse a host list. Entries without a port use `default_port`, entries
/// without a prefix use `default_security`.
pub fn parse_hosts(list: &str, default_port: u16, default_security: Security) -> Result<Vec<HostSpec>> {
    let hosts = list
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| parse_host(entry, default_port, default_security))
        .collect::<Result<Vec<_>>>()?;
    if hosts.is_empty() {
        return Err(MailError::InvalidHost(format!("no host in {list:?}")));
    }
    Ok(hosts)
}

fn parse_host(entry: &str, default_port: u16, default_security: Security) -> Result<HostSpec> {
    let invalid = || MailError::InvalidHost(entry.to_string());
    let lower = entry.to_ascii_lowercase();
    let (security, explicit, rest) = if lower.starts_with("ssl://") {
        (Security::Implicit, true, &entry[6..])
    } else if lower.starts_with("tls://") {
        (Security::StartTls, true, &entry[6..])
    } else if entry.contains("://") {
        return Err(invalid());
    } else {
        (default_security, false, entry)
    };

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (addr, after) = bracketed.split_once(']').ok_or_else(invalid)?;
        let port = match after.strip_prefix(':') {
            Some(p) => Some(p),
            None if after.is_empty() => None,
            None => return Err(invalid()),
        };
        (addr, port)
    } else {
        match rest.rsplit_once(':') {
            Some((h, p)) if !h.contains(':') => (h, Some(p)),
            // Bare IPv6 literal without brackets has no port.
            Some(_) => (rest, None),
            None => (rest, None),
        }
    };

    let port = match port {
        Some(p) => match p.parse::<u16>() {
            Ok(n) if n > 0 => n,
            _ => return Err(invalid()),
        },
        None => default_port,
    };
    if !(host.parse::<IpAddr>().is_ok() || is_valid_host(host)) {
        return Err(invalid());
    }
    Ok(HostSpec {
        host: host.to_string(),
        port,
        security,
        explicit,
    })
}

/// Connect, greet, secure and authenticate against one host.
///
/// Without an explicit requirement, STARTTLS is used when `auto_tls` is on
/// and the server offers it. An explicit `tls://` host without STARTTLS
/// fails with `TlsUnavailable`.
pub fn establish(spec: &HostSpec, config: &SmtpConfig, helo: &str) -> Result<SmtpSession> {
    let mut session = SmtpSession::new(SessionOptions::from_config(config));
    session.connect(&spec.host, spec.port, spec.security == Security::Implicit)?;
    session.hello(helo)?;

    let offers_tls = session.capabilities().starttls();
    match spec.security {
        Security::StartTls => session.start_tls()?,
        Security::None if config.auto_tls && offers_tls => session.start_tls()?,
        Security::None | Security::Implicit => {}
    }

    if !config.username.is_empty() {
        let creds = Credentials {
            username: config.username.clone(),
            password: config.password.clone(),
            realm: config.realm.clone(),
            workstation: config.workstation.clone(),
        };
        session.authenticate(&creds, config.auth_mechanism.as_deref())?;
    }
    Ok(session)
}

/// Try each host in order and return the first ready session.
///
/// When every host fails, the last host's error is returned.
pub fn connect_first(hosts: &[HostSpec], config: &SmtpConfig, helo: &str) -> Result<SmtpSession> {
    let mut last_error = MailError::InvalidHost("empty host list".into());
    for spec in hosts {
        match establish(spec, config, helo) {
            Ok(session) => {
                info!(host = %spec, tls = session.is_tls(), "SMTP session ready");
                return Ok(session);
            }
            Err(e) => {
                warn!(host = %spec, error = %e, "SMTP host failed");
                last_error = e;
            }
        }
    }
    Err(last_error)
}
