//! DKIM signing (RFC 6376): relaxed header and simple body canonicalization,
//! RSA-SHA256 signatures.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::DkimConfig;
use crate::encoding::CRLF;
use crate::error::{MailError, Result};
use crate::mime::{ComposedMessage, HeaderBlock};

/// Headers signed when present, in addition to any configured extras.
const DEFAULT_SIGNED_HEADERS: &[&str] = &[
    "from",
    "to",
    "cc",
    "date",
    "subject",
    "reply-to",
    "message-id",
    "in-reply-to",
    "references",
    "mime-version",
    "content-type",
    "content-transfer-encoding",
    "list-unsubscribe",
];

/// A configured DKIM signer.
#[derive(Debug, Clone)]
pub struct DkimSigner {
    domain: String,
    selector: String,
    identity: Option<String>,
    extra_headers: Vec<String>,
    key: SigningKey<Sha256>,
}

impl DkimSigner {
    /// Build a signer from a PEM private key (PKCS#1, PKCS#8, or encrypted
    /// PKCS#8 when `passphrase` is given).
    pub fn new(
        domain: &str,
        selector: &str,
        identity: Option<&str>,
        key_pem: &str,
        passphrase: Option<&str>,
    ) -> Result<Self> {
        for (tag, value) in [("d", domain), ("s", selector), ("i", identity.unwrap_or(""))] {
            if value.contains([';', '\r', '\n']) {
                return Err(MailError::SigningFailed(format!("Invalid {tag}= value {value:?}")));
            }
        }
        if domain.is_empty() || selector.is_empty() {
            return Err(MailError::SigningFailed("Domain and selector are required".into()));
        }
        let key = load_private_key(key_pem, passphrase)?;
        Ok(Self {
            domain: domain.to_string(),
            selector: selector.to_string(),
            identity: identity.filter(|i| !i.is_empty()).map(String::from),
            extra_headers: Vec::new(),
            key: SigningKey::<Sha256>::new(key),
        })
    }

    /// Build a signer from configuration, reading the key file.
    pub fn from_config(config: &DkimConfig) -> Result<Self> {
        let pem = std::fs::read_to_string(&config.private_key_path).map_err(|e| {
            MailError::SigningFailed(format!(
                "Cannot read key {}: {e}",
                config.private_key_path.display()
            ))
        })?;
        let mut signer = Self::new(
            &config.domain,
            &config.selector,
            config.identity.as_deref(),
            &pem,
            config.passphrase.as_deref(),
        )?;
        signer.extra_headers = config
            .extra_headers
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
        Ok(signer)
    }

    /// Compute the `DKIM-Signature` header value for `headers` and `body`.
    pub fn signature_header(&self, headers: &HeaderBlock, body: &[u8]) -> Result<String> {
        let canonical_body = canonicalize_body(body);
        let body_hash = STANDARD.encode(Sha256::digest(&canonical_body));

        let selected: Vec<(&str, &str)> = headers
            .iter()
            .filter(|(name, _)| {
                let lower = name.to_ascii_lowercase();
                DEFAULT_SIGNED_HEADERS.contains(&lower.as_str())
                    || self.extra_headers.iter().any(|h| *h == lower)
            })
            .collect();
        let signed_names: Vec<String> = selected.iter().map(|(n, _)| n.to_ascii_lowercase()).collect();

        let unsigned = build_header(
            &self.domain,
            &self.selector,
            self.identity.as_deref(),
            &signed_names,
            canonical_body.len(),
            Utc::now().timestamp(),
            &body_hash,
            "",
        );

        let mut data = canonicalize_headers(&selected);
        data.push_str(&canonicalize_header("DKIM-Signature", &unsigned));
        let signature = self
            .key
            .try_sign(data.as_bytes())
            .map_err(|e| MailError::SigningFailed(e.to_string()))?;

        debug!(
            domain = %self.domain,
            selector = %self.selector,
            headers = signed_names.len(),
            "DKIM signature computed"
        );
        Ok(format!("{unsigned}{}", STANDARD.encode(signature.to_bytes())))
    }

    /// Sign a composed message, prepending the `DKIM-Signature` header.
    pub fn sign(&self, message: &mut ComposedMessage) -> Result<()> {
        let value = self.signature_header(&message.headers, &message.body)?;
        message.headers.prepend("DKIM-Signature", value);
        Ok(())
    }
}

fn load_private_key(pem: &str, passphrase: Option<&str>) -> Result<RsaPrivateKey> {
    let key = match passphrase.filter(|p| !p.is_empty()) {
        Some(pass) => RsaPrivateKey::from_pkcs8_encrypted_pem(pem, pass.as_bytes())
            .map_err(|e| MailError::SigningFailed(format!("Cannot decrypt key: {e}")))?,
        None => RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| MailError::SigningFailed(format!("Cannot parse key: {e}")))?,
    };
    Ok(key)
}

// ── Canonicalization ────────────────────────────────────────────

/// Relaxed canonicalization of one header, without the trailing CRLF.
///
/// Field name lowercased; the value unfolded, runs of whitespace collapsed to
/// one space and trimmed.
pub fn canonicalize_header(name: &str, value: &str) -> String {
    let unfolded = value.replace(CRLF, "");
    let collapsed = unfolded.split([' ', '\t']).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");
    format!("{}:{}", name.trim().to_ascii_lowercase(), collapsed)
}

/// Relaxed canonicalization of a header list, each line ending in CRLF.
pub fn canonicalize_headers(headers: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (name, value) in headers {
        out.push_str(&canonicalize_header(name, value));
        out.push_str(CRLF);
    }
    out
}

/// Simple body canonicalization.
///
/// Line endings become CRLF and trailing empty lines are removed; the result
/// always ends with exactly one CRLF, so an empty body is a single CRLF.
pub fn canonicalize_body(body: &[u8]) -> Vec<u8> {
    let mut out = crate::encoding::normalize_breaks(body);
    while out.ends_with(b"\r\n") {
        out.truncate(out.len() - 2);
    }
    out.extend_from_slice(CRLF.as_bytes());
    out
}

/// Assemble the header value. `signature` is empty when computing the
/// signature itself.
#[allow(clippy::too_many_arguments)]
pub fn build_header(
    domain: &str,
    selector: &str,
    identity: Option<&str>,
    signed_headers: &[String],
    body_length: usize,
    timestamp: i64,
    body_hash: &str,
    signature: &str,
) -> String {
    let identity = identity.map(|i| format!(" i={i};")).unwrap_or_default();
    format!(
        "v=1; a=rsa-sha256; q=dns/txt; l={body_length}; s={selector};\r\n t={timestamp}; c=relaxed/simple;\r\n h={};\r\n d={domain};{identity}\r\n bh={body_hash};\r\n b={signature}",
        signed_headers.join(":")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use rsa::signature::Verifier;

    #[test]
    fn test_relaxed_header() {
        assert_eq!(
            canonicalize_header("Subject", "  Hello \t  world\r\n  again "),
            "subject:Hello world again"
        );
    }

    #[test]
    fn test_simple_body() {
        assert_eq!(canonicalize_body(b""), b"\r\n".to_vec());
        assert_eq!(canonicalize_body(b"a\nb\n\n\n"), b"a\r\nb\r\n".to_vec());
        assert_eq!(canonicalize_body(b"a  b"), b"a  b\r\n".to_vec());
    }

    #[test]
    fn test_header_tags() {
        let value = build_header(
            "example.com",
            "mail",
            Some("@example.com"),
            &["from".into(), "subject".into()],
            12,
            1_700_000_000,
            "BH",
            "",
        );
        let canonical = canonicalize_header("DKIM-Signature", &value);
        assert_eq!(
            canonical,
            "dkim-signature:v=1; a=rsa-sha256; q=dns/txt; l=12; s=mail; t=1700000000; c=relaxed/simple; h=from:subject; d=example.com; i=@example.com; bh=BH; b="
        );
    }

    #[test]
    fn test_signature_verifies() {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let signer = DkimSigner::new("example.com", "sel", None, &pem, None).unwrap();

        let mut headers = HeaderBlock::new();
        headers.push("From", "a@example.com");
        headers.push("X-Unsigned", "ignored");
        headers.push("Subject", "Hi   there");
        let value = signer.signature_header(&headers, b"Body\r\n").unwrap();
        assert!(value.contains("h=from:subject;"));

        let (unsigned, b64) = value.rsplit_once("\r\n b=").unwrap();
        let data = format!(
            "from:a@example.com\r\nsubject:Hi there\r\n{}",
            canonicalize_header("DKIM-Signature", &format!("{unsigned}\r\n b="))
        );
        let sig = Signature::try_from(STANDARD.decode(b64).unwrap().as_slice()).unwrap();
        let verifier = VerifyingKey::<Sha256>::new(key.to_public_key());
        assert!(verifier.verify(data.as_bytes(), &sig).is_ok());
    }

    #[test]
    fn test_bad_key_is_signing_failure() {
        let err = DkimSigner::new("example.com", "sel", None, "not a key", None).unwrap_err();
        assert!(matches!(err, MailError::SigningFailed(_)));
    }
}
