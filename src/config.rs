//! Library configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$POSTKIT_CONFIG` (environment variable)
//! 2. `~/.config/postkit/config.toml` (Linux/macOS)
//!    `%APPDATA%\postkit\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::encoding::transfer::TransferEncoding;
use crate::model::address::ValidationStrategy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SMTP connection and session settings.
    pub smtp: SmtpConfig,
    /// Defaults applied to every composed message.
    pub message: MessageConfig,
    /// Which transport hands the message off.
    pub transport: TransportConfig,
    /// DKIM signing, disabled when absent.
    pub dkim: Option<DkimConfig>,
    /// Failure handling policy.
    pub policy: Policy,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Connection security requested for SMTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Plain connection. STARTTLS may still be used when `auto_tls` is on.
    None,
    /// Plain connection upgraded with STARTTLS, failing if unavailable.
    StartTls,
    /// TLS from the first byte (SMTPS, usually port 465).
    Implicit,
}

/// SMTP connection and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Semicolon-separated candidate hosts, e.g. `"tls://smtp1.example.com:587;smtp2.example.com"`.
    pub hosts: String,
    /// Port used when a host entry carries none.
    pub port: u16,
    /// Security for hosts without an `ssl://` or `tls://` prefix.
    pub security: Security,
    /// Upgrade with STARTTLS when the server offers it and no security was forced.
    pub auto_tls: bool,
    /// Username for AUTH. Authentication is skipped when empty.
    pub username: String,
    /// Password (or OAuth2 bearer token for XOAUTH2).
    pub password: String,
    /// Force one AUTH mechanism instead of auto-selecting.
    pub auth_mechanism: Option<String>,
    /// NTLM realm (domain).
    pub realm: String,
    /// NTLM workstation name.
    pub workstation: String,
    /// Name sent with EHLO/HELO. Defaults to the message hostname.
    pub helo: Option<String>,
    /// Socket read/write timeout in seconds.
    pub timeout_secs: u64,
    /// Cumulative time allowed for reading one reply, in seconds.
    pub time_limit_secs: u64,
    /// Verify server certificates against the webpki roots.
    pub verify_certificates: bool,
    /// Extra PEM CA bundle trusted in addition to the webpki roots.
    pub ca_cert_path: Option<PathBuf>,
    /// Keep the session open between sends.
    pub keep_alive: bool,
    /// Run one transaction per recipient.
    pub single_to: bool,
    /// Request XVERP when the server supports it.
    pub verp: bool,
    /// DSN `NOTIFY=` values (`NEVER`, `SUCCESS`, `FAILURE`, `DELAY`).
    pub dsn_notify: Vec<String>,
}

/// Defaults applied to every composed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    /// Character set for bodies and header words.
    pub charset: String,
    /// Requested Content-Transfer-Encoding for text parts.
    pub encoding: TransferEncoding,
    /// `X-Mailer` header value. Empty disables the header.
    pub x_mailer: String,
    /// Host name used for Message-ID and as the default HELO name.
    pub hostname: Option<String>,
    /// Wrap the plain body at this many columns (0 = off).
    pub word_wrap: usize,
    /// Accept messages with an empty body.
    pub allow_empty: bool,
    /// Address validation strategy.
    pub validation: ValidationStrategy,
}

/// Selected transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Smtp,
    Sendmail,
    Pickup,
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Which transport delivers the message.
    pub kind: TransportKind,
    /// Path to the sendmail-compatible binary.
    pub sendmail_path: PathBuf,
    /// Directory watched by the local MTA for the pickup transport.
    pub pickup_dir: Option<PathBuf>,
}

/// DKIM signing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DkimConfig {
    /// Signing domain (`d=`).
    pub domain: String,
    /// Selector (`s=`).
    pub selector: String,
    /// Agent or user identifier (`i=`).
    pub identity: Option<String>,
    /// PEM private key (PKCS#1 or PKCS#8).
    pub private_key_path: PathBuf,
    /// Passphrase for an encrypted PKCS#8 key.
    pub passphrase: Option<String>,
    /// Additional header names to sign.
    pub extra_headers: Vec<String>,
}

/// What to do when DKIM signing fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningFailure {
    /// Abort the send.
    Fatal,
    /// Log a warning and send the message unsigned.
    Skip,
}

/// What to do when a recipient address fails to parse or is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientFailure {
    /// Record the failure and continue with the remaining recipients.
    Collect,
    /// Abort the whole send on the first bad recipient.
    Abort,
}

/// Failure handling policy, owned by the caller and passed down explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub signing_failure: SigningFailure,
    pub recipient_failure: RecipientFailure,
}

/// Scoped policy overrides.
///
/// The base policy is always present; `push` installs an override for a
/// stretch of sends and `pop` restores the previous one.
#[derive(Debug, Clone)]
pub struct PolicyStack {
    base: Policy,
    overrides: Vec<Policy>,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: String,
    /// Override directory for the log file.
    pub log_dir: Option<PathBuf>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            hosts: "localhost".to_string(),
            port: 587,
            security: Security::None,
            auto_tls: true,
            username: String::new(),
            password: String::new(),
            auth_mechanism: None,
            realm: String::new(),
            workstation: String::new(),
            helo: None,
            timeout_secs: 300,
            time_limit_secs: 300,
            verify_certificates: true,
            ca_cert_path: None,
            keep_alive: false,
            single_to: false,
            verp: false,
            dsn_notify: Vec::new(),
        }
    }
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            charset: "utf-8".to_string(),
            encoding: TransferEncoding::EightBit,
            x_mailer: format!("postkit {}", env!("CARGO_PKG_VERSION")),
            hostname: None,
            word_wrap: 0,
            allow_empty: false,
            validation: ValidationStrategy::Auto,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Smtp,
            sendmail_path: PathBuf::from("/usr/sbin/sendmail"),
            pickup_dir: None,
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            signing_failure: SigningFailure::Fatal,
            recipient_failure: RecipientFailure::Collect,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            log_dir: None,
        }
    }
}

impl PolicyStack {
    /// Start a stack with `base` as the bottom policy.
    pub fn new(base: Policy) -> Self {
        Self {
            base,
            overrides: Vec::new(),
        }
    }

    /// The policy in effect.
    pub fn current(&self) -> Policy {
        self.overrides.last().copied().unwrap_or(self.base)
    }

    /// Install an override until the matching [`PolicyStack::pop`].
    pub fn push(&mut self, policy: Policy) {
        self.overrides.push(policy);
    }

    /// Remove the latest override. The base policy is never popped.
    pub fn pop(&mut self) -> Option<Policy> {
        self.overrides.pop()
    }
}

impl MessageConfig {
    /// Host name for Message-ID and HELO: configured value, `$HOSTNAME`, or
    /// `localhost.localdomain`.
    pub fn resolved_hostname(&self) -> String {
        if let Some(ref name) = self.hostname {
            if is_valid_host(name) {
                return name.clone();
            }
        }
        match std::env::var("HOSTNAME") {
            Ok(name) if is_valid_host(&name) => name,
            _ => "localhost.localdomain".to_string(),
        }
    }
}

/// A host name usable in EHLO and Message-ID: non-empty, at most 253
/// octets, letters, digits, dots and hyphens only.
pub fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
        && !host.starts_with('.')
}

// ── Load / save ─────────────────────────────────────────────────

impl Config {
    /// Read a TOML config file. Missing sections take their defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Write this config as TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::info!(path = %path.display(), "Saved config");
        Ok(())
    }
}

/// Load the config from [`config_file_path`], or the defaults when the file
/// is absent or unreadable.
pub fn load_config() -> Config {
    let Some(path) = config_file_path().filter(|p| p.exists()) else {
        return Config::default();
    };
    match Config::load_from(&path) {
        Ok(cfg) => {
            tracing::info!(path = %path.display(), "Loaded config");
            cfg
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "Config unusable, using defaults");
            Config::default()
        }
    }
}

/// Save to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path().context("no config directory on this platform")?;
    config.save_to(&path)
}

/// `$POSTKIT_CONFIG` if set, else `postkit/config.toml` under the platform
/// config directory.
pub fn config_file_path() -> Option<PathBuf> {
    match std::env::var_os("POSTKIT_CONFIG") {
        Some(explicit) => Some(PathBuf::from(explicit)),
        None => dirs::config_dir().map(|d| d.join("postkit").join("config.toml")),
    }
}

/// Directory for `postkit.log`: `logging.log_dir`, else the platform cache dir.
pub fn cache_dir(config: &Config) -> PathBuf {
    config.logging.log_dir.clone().unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("postkit")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.smtp.port, 587);
        assert!(cfg.smtp.auto_tls);
        assert_eq!(cfg.message.charset, "utf-8");
        assert_eq!(cfg.transport.kind, TransportKind::Smtp);
        assert_eq!(cfg.policy.signing_failure, SigningFailure::Fatal);
        assert!(cfg.dkim.is_none());
    }

    #[test]
    fn test_save_then_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("postkit.toml");
        let mut cfg = Config::default();
        cfg.smtp.hosts = "relay-a.test;relay-b.test:2525".into();
        cfg.policy.recipient_failure = RecipientFailure::Abort;
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.smtp.hosts, cfg.smtp.hosts);
        assert_eq!(loaded.policy, cfg.policy);
        assert_eq!(loaded.message.encoding, cfg.message.encoding);
    }

    #[test]
    fn test_load_from_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[smtp\nport = ").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }

    #[test]
    fn test_sections_fill_in_defaults() {
        let partial = r#"
[smtp]
hosts = "tls://mail.example.com:587;backup.example.com"
security = "starttls"

[policy]
signing_failure = "skip"

[dkim]
domain = "example.com"
selector = "mail"
private_key_path = "/etc/dkim/mail.pem"
"#;
        let cfg: Config = toml::from_str(partial).unwrap();
        assert_eq!(cfg.smtp.security, Security::StartTls);
        assert_eq!(cfg.policy.signing_failure, SigningFailure::Skip);
        assert_eq!(cfg.policy.recipient_failure, RecipientFailure::Collect);
        assert_eq!(cfg.smtp.timeout_secs, 300);
        let dkim = cfg.dkim.expect("dkim section");
        assert_eq!(dkim.selector, "mail");
        assert!(dkim.extra_headers.is_empty());
    }

    #[test]
    fn test_policy_stack_push_pop() {
        let mut stack = PolicyStack::new(Policy::default());
        let lenient = Policy {
            signing_failure: SigningFailure::Skip,
            recipient_failure: RecipientFailure::Collect,
        };
        stack.push(lenient);
        assert_eq!(stack.current().signing_failure, SigningFailure::Skip);
        assert_eq!(stack.pop(), Some(lenient));
        assert_eq!(stack.current().signing_failure, SigningFailure::Fatal);
        assert_eq!(stack.pop(), None);
        assert_eq!(stack.current(), Policy::default());
    }

    #[test]
    fn test_hostname_fallback() {
        let cfg = MessageConfig {
            hostname: Some("bad host name".into()),
            ..MessageConfig::default()
        };
        let name = cfg.resolved_hostname();
        assert!(is_valid_host(&name));
        assert_ne!(name, "bad host name");
    }
}
