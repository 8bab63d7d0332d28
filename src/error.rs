//! Centralized error types for postkit.

use thiserror::Error;

/// All errors produced by the postkit library.
#[derive(Error, Debug)]
pub enum MailError {
    /// An address could not be parsed or failed validation.
    #[error("Invalid address: {0}")]
    AddressInvalid(String),

    /// No usable recipient remained in To, Cc or Bcc.
    #[error("You must provide at least one recipient email address")]
    NoRecipients,

    /// The message body is empty and empty bodies are not allowed.
    #[error("Message body empty")]
    EmptyMessageRejected,

    /// The TCP connection (or implicit TLS handshake) could not be established.
    #[error("Failed to connect to {host}: {reason}")]
    ConnectFailed { host: String, reason: String },

    /// The server greeting or EHLO/HELO exchange failed.
    #[error("Server greeting failed: {0}")]
    GreetingFailed(String),

    /// The server sent something that is not a well-formed SMTP reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// STARTTLS was required but is not offered by the server.
    #[error("TLS unavailable: {0}")]
    TlsUnavailable(String),

    /// The TLS handshake or STARTTLS exchange failed.
    #[error("TLS negotiation failed: {0}")]
    TlsNegotiationFailed(String),

    /// None of the server's mechanisms can be used, or the requested one is not offered.
    #[error("Authentication mechanism unsupported: {0}")]
    AuthMechanismUnsupported(String),

    /// The server refused the credentials.
    #[error("SMTP authentication failed: {0}")]
    AuthFailed(String),

    /// A command received a reply code outside the expected set.
    #[error("{command} command failed: {code} {detail}")]
    CommandRejected {
        command: String,
        code: u16,
        detail: String,
    },

    /// A single recipient was refused at `RCPT TO`. Collected, not fatal.
    #[error("Recipient {address} rejected: {detail}")]
    RecipientRejected { address: String, detail: String },

    /// The server refused the message content after `DATA`.
    #[error("Data not accepted: {0}")]
    DataRejected(String),

    /// DKIM signing could not be performed.
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// External S/MIME signing failed.
    #[error("S/MIME signing failed: {0}")]
    SmimeFailed(String),

    /// A read, write or cumulative time limit expired.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A command or header value contained a raw CR or LF.
    #[error("Command contained a line break: {0:?}")]
    LineBreakInjection(String),

    /// A host specification in the host list is malformed.
    #[error("Invalid host specification: {0}")]
    InvalidHost(String),

    /// A charset or transfer encoding problem.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A configuration value is invalid or a required backend is missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error with a short description of what was being done.
    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

/// Convenience alias for `Result<T, MailError>`.
pub type Result<T> = std::result::Result<T, MailError>;

impl MailError {
    /// Create an `Io` variant from a context string and an `io::Error`.
    ///
    /// Expired socket timeouts become `Timeout` instead.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                Self::Timeout(format!("{}: {source}", context.into()))
            }
            _ => Self::Io {
                context: context.into(),
                source,
            },
        }
    }

    /// Create a `CommandRejected` variant.
    pub fn rejected(command: impl Into<String>, code: u16, detail: impl Into<String>) -> Self {
        Self::CommandRejected {
            command: command.into(),
            code,
            detail: detail.into(),
        }
    }

    /// Whether this error ends the current host attempt but leaves the next
    /// candidate host worth trying.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. }
                | Self::GreetingFailed(_)
                | Self::Protocol(_)
                | Self::TlsUnavailable(_)
                | Self::TlsNegotiationFailed(_)
                | Self::AuthMechanismUnsupported(_)
                | Self::AuthFailed(_)
                | Self::Timeout(_)
                | Self::Io { .. }
        )
    }
}

/// Allow `?` on `std::io::Error` when no better context is available.
///
/// Socket timeouts surface as `WouldBlock`/`TimedOut` and map to `Timeout`.
impl From<std::io::Error> for MailError {
    fn from(source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                Self::Timeout(source.to_string())
            }
            _ => Self::Io {
                context: "<unknown>".to_string(),
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let err: MailError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, MailError::Timeout(_)));
        assert!(err.is_transport());
    }

    #[test]
    fn test_recipient_rejection_is_not_transport() {
        let err = MailError::RecipientRejected {
            address: "a@b.com".into(),
            detail: "550 no such user".into(),
        };
        assert!(!err.is_transport());
    }

    #[test]
    fn test_rejected_display() {
        let err = MailError::rejected("MAIL FROM", 550, "5.7.1 denied");
        assert_eq!(err.to_string(), "MAIL FROM command failed: 550 5.7.1 denied");
    }
}
