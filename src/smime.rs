//! Detached S/MIME signing through the `openssl smime` tool.
//!
//! The MIME entity (content headers and body) is written to a temporary
//! file, signed by an `openssl` child process, and the signed entity read
//! back replaces the message content.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::encoding::{normalize_breaks, CRLF};
use crate::error::{MailError, Result};
use crate::mime::{ComposedMessage, HeaderBlock};

/// Environment variable carrying the key passphrase to the child process.
const PASSPHRASE_ENV: &str = "POSTKIT_SMIME_PASSPHRASE";

/// Signing material for S/MIME.
#[derive(Debug, Clone)]
pub struct SmimeSigner {
    cert_path: PathBuf,
    key_path: PathBuf,
    passphrase: Option<String>,
    chain_path: Option<PathBuf>,
    openssl: PathBuf,
}

impl SmimeSigner {
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        passphrase: Option<String>,
        chain_path: Option<PathBuf>,
    ) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            passphrase: passphrase.filter(|p| !p.is_empty()),
            chain_path,
            openssl: PathBuf::from("openssl"),
        }
    }

    /// Use a specific `openssl` binary.
    pub fn with_openssl(mut self, path: impl Into<PathBuf>) -> Self {
        self.openssl = path.into();
        self
    }

    /// Sign `message` in place.
    pub fn sign(&self, message: &mut ComposedMessage) -> Result<()> {
        for path in [Some(&self.cert_path), Some(&self.key_path), self.chain_path.as_ref()]
            .into_iter()
            .flatten()
        {
            if !path.is_file() {
                return Err(MailError::SmimeFailed(format!(
                    "{} is not a readable file",
                    path.display()
                )));
            }
        }

        let mut input = tempfile::NamedTempFile::new()
            .map_err(|e| MailError::io("creating S/MIME input file", e))?;
        let output = tempfile::NamedTempFile::new()
            .map_err(|e| MailError::io("creating S/MIME output file", e))?;

        let mut entity = HeaderBlock::new();
        for name in ["Content-Type", "Content-Transfer-Encoding"] {
            if let Some(value) = message.headers.get(name) {
                entity.push(name, value);
            }
        }
        input
            .write_all(entity.render().as_bytes())
            .and_then(|_| input.write_all(CRLF.as_bytes()))
            .and_then(|_| input.write_all(&message.body))
            .and_then(|_| input.flush())
            .map_err(|e| MailError::io("writing S/MIME input file", e))?;

        let status = self
            .command(input.path(), output.path())
            .output()
            .map_err(|e| MailError::SmimeFailed(format!("cannot run {}: {e}", self.openssl.display())))?;
        if !status.status.success() {
            let stderr = String::from_utf8_lossy(&status.stderr);
            warn!(code = ?status.status.code(), "openssl smime failed");
            return Err(MailError::SmimeFailed(stderr.trim().to_string()));
        }

        let signed = std::fs::read(output.path())
            .map_err(|e| MailError::io("reading S/MIME output file", e))?;
        let (headers, body) = parse_entity(&signed)?;
        debug!(bytes = body.len(), "S/MIME signature applied");
        message.replace_content(headers, body);
        Ok(())
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.openssl);
        cmd.arg("smime")
            .arg("-sign")
            .arg("-in")
            .arg(input)
            .arg("-out")
            .arg(output)
            .arg("-signer")
            .arg(&self.cert_path)
            .arg("-inkey")
            .arg(&self.key_path);
        if let Some(ref pass) = self.passphrase {
            cmd.arg("-passin").arg(format!("env:{PASSPHRASE_ENV}"));
            cmd.env(PASSPHRASE_ENV, pass);
        }
        if let Some(ref chain) = self.chain_path {
            cmd.arg("-certfile").arg(chain);
        }
        cmd
    }
}

/// Split a signed MIME entity into its headers and body.
///
/// Line endings are normalized to CRLF. Folded values keep their folds.
pub fn parse_entity(raw: &[u8]) -> Result<(HeaderBlock, Vec<u8>)> {
    let normalized = normalize_breaks(raw);
    let split = normalized
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| MailError::SmimeFailed("signed output has no header block".into()))?;
    let header_text = String::from_utf8_lossy(&normalized[..split]);
    let body = normalized[split + 4..].to_vec();

    let mut headers = HeaderBlock::new();
    let mut current: Option<(String, String)> = None;
    for line in header_text.split(CRLF) {
        if line.starts_with([' ', '\t']) {
            if let Some((_, ref mut value)) = current {
                value.push_str(CRLF);
                value.push_str(line);
            }
            continue;
        }
        if let Some((name, value)) = current.take() {
            headers.push(name, value);
        }
        if let Some((name, value)) = line.split_once(':') {
            current = Some((name.trim().to_string(), value.trim_start().to_string()));
        }
    }
    if let Some((name, value)) = current {
        headers.push(name, value);
    }
    Ok((headers, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity_with_folds() {
        let raw = b"MIME-Version: 1.0\nContent-Type: multipart/signed; protocol=\"application/pkcs7-signature\";\n boundary=\"----ABC\"\n\nThis is an S/MIME signed message\n\n------ABC\n";
        let (headers, body) = parse_entity(raw).unwrap();
        assert_eq!(headers.len(), 2);
        let ct = headers.get("content-type").unwrap();
        assert!(ct.starts_with("multipart/signed;"));
        assert!(ct.contains("\r\n boundary=\"----ABC\""));
        assert!(body.starts_with(b"This is an S/MIME signed message\r\n"));
    }

    #[test]
    fn test_missing_certificate_rejected() {
        let signer = SmimeSigner::new("/nonexistent/cert.pem", "/nonexistent/key.pem", None, None);
        let mut composed = crate::mime::ComposedMessage {
            headers: HeaderBlock::new(),
            body: Vec::new(),
            message_id: "<x@y>".into(),
            shape: crate::mime::MessageShape::Plain,
            eight_bit: false,
        };
        assert!(matches!(signer.sign(&mut composed), Err(MailError::SmimeFailed(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_signed_entity_replaces_content() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "cert").unwrap();
        std::fs::write(&key, "key").unwrap();
        let openssl = dir.path().join("fake-openssl");
        std::fs::write(
            &openssl,
            concat!(
                "#!/bin/sh\n",
                "while [ $# -gt 0 ]; do\n",
                "  case \"$1\" in -in) src=\"$2\"; shift;; -out) dst=\"$2\"; shift;; esac\n",
                "  shift\n",
                "done\n",
                "{ printf 'MIME-Version: 1.0\\nContent-Type: multipart/signed;\\n boundary=\"SIG\"\\n\\n--SIG\\n'\n",
                "  cat \"$src\"\n",
                "  printf '\\n--SIG\\npass=%s\\n--SIG--\\n' \"$POSTKIT_SMIME_PASSPHRASE\"; } > \"$dst\"\n",
            ),
        )
        .unwrap();
        std::fs::set_permissions(&openssl, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut headers = HeaderBlock::new();
        headers.push("Subject", "Signed");
        headers.push("MIME-Version", "1.0");
        headers.push("Content-Type", "text/plain; charset=utf-8");
        headers.push("Content-Transfer-Encoding", "7bit");
        let mut composed = crate::mime::ComposedMessage {
            headers,
            body: b"Quarterly figures attached.\r\n".to_vec(),
            message_id: "<x@y>".into(),
            shape: crate::mime::MessageShape::Plain,
            eight_bit: false,
        };

        let signer = SmimeSigner::new(&cert, &key, Some("hunter2".into()), None).with_openssl(&openssl);
        signer.sign(&mut composed).unwrap();

        assert_eq!(composed.headers.get("Subject"), Some("Signed"));
        assert!(composed.headers.get("Content-Type").unwrap().starts_with("multipart/signed;"));
        assert!(composed.headers.get("Content-Transfer-Encoding").is_none());
        let body = String::from_utf8(composed.body).unwrap();
        assert!(body.starts_with("--SIG\r\nContent-Type: text/plain; charset=utf-8\r\n"), "{body}");
        assert!(body.contains("Quarterly figures attached.\r\n"));
        assert!(body.contains("pass=hunter2\r\n"));
    }
}
