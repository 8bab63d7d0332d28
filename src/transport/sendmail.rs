//! Local submission through a sendmail-compatible binary.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use super::{Envelope, SendReport, Transport};
use crate::error::{MailError, Result};
use crate::mime::{ComposeOptions, ComposedMessage};

/// Pipes the message into `sendmail -oi [-f sender] -t`, or one
/// `sendmail -oi [-f sender] <recipient>` per recipient in single-to mode.
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    path: PathBuf,
    single_to: bool,
}

impl SendmailTransport {
    pub fn new(path: impl Into<PathBuf>, single_to: bool) -> Self {
        Self {
            path: path.into(),
            single_to,
        }
    }

    fn command(&self, sender: &str) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.arg("-oi");
        if is_shell_safe(sender) {
            cmd.arg(format!("-f{sender}"));
        } else if !sender.is_empty() {
            warn!(sender, "Sender not passed to sendmail, unsafe characters");
        }
        cmd
    }

    /// Feed `bytes` to the child on its own thread while stderr is drained
    /// and the child reaped. A non-zero exit wins over a failed write.
    fn run(&self, mut cmd: Command, bytes: &[u8]) -> Result<()> {
        debug!(command = ?cmd, "Spawning sendmail");
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MailError::io(format!("spawning {}", self.path.display()), e))?;
        let stdin = child.stdin.take();

        let (written, output) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut pipe) => pipe.write_all(bytes),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer.join().unwrap_or_else(|_| {
                Err(std::io::Error::other("stdin writer panicked"))
            });
            (written, output)
        });

        let output = output.map_err(|e| MailError::io("waiting for sendmail", e))?;
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(code, %detail, "sendmail exited with failure");
            return Err(MailError::rejected("sendmail", u16::try_from(code).unwrap_or(0), detail));
        }
        written.map_err(|e| MailError::io("writing to sendmail", e))
    }
}

impl Transport for SendmailTransport {
    fn name(&self) -> &'static str {
        "sendmail"
    }

    /// `sendmail -t` reads recipients from the headers and strips `Bcc`.
    fn compose_options(&self, hostname: String) -> ComposeOptions {
        ComposeOptions {
            hostname,
            include_to: true,
            include_bcc: !self.single_to,
        }
    }

    fn send(&mut self, envelope: &Envelope, message: &ComposedMessage) -> Result<SendReport> {
        if envelope.recipients.is_empty() {
            return Err(MailError::NoRecipients);
        }
        let bytes = to_local_line_endings(&message.to_bytes());

        if !self.single_to {
            let mut cmd = self.command(&envelope.sender);
            cmd.arg("-t");
            self.run(cmd, &bytes)?;
            return Ok(SendReport {
                accepted: envelope.recipients.clone(),
                rejected: Vec::new(),
            });
        }

        let mut report = SendReport::default();
        for rcpt in &envelope.recipients {
            if !is_shell_safe(rcpt) {
                report.rejected.push((rcpt.clone(), "unsafe recipient for sendmail".into()));
                continue;
            }
            let mut cmd = self.command(&envelope.sender);
            cmd.arg("--").arg(rcpt);
            match self.run(cmd, &bytes) {
                Ok(()) => report.accepted.push(rcpt.clone()),
                Err(e) if envelope.abort_on_rejection => return Err(e),
                Err(e) => report.rejected.push((rcpt.clone(), e.to_string())),
            }
        }
        Ok(report)
    }
}

/// Whether `value` can be passed as a sendmail argument: no leading `-`,
/// only letters, digits and `@ _ - . +`.
pub fn is_shell_safe(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '_' | '-' | '.' | '+'))
}

/// CRLF to LF, the line ending local MTAs expect on stdin.
fn to_local_line_endings(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
            i += 1;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}
