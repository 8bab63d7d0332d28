//! SMTP replies: 3-digit code, optional enhanced status code, text lines.

use crate::error::{MailError, Result};

/// A complete (possibly multi-line) server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The 3-digit reply code.
    pub code: u16,
    /// Enhanced status code from the first line (e.g. `"2.1.0"`).
    pub enhanced_code: Option<String>,
    /// Text of each line, code and separator stripped.
    pub lines: Vec<String>,
}

impl Reply {
    /// Positive completion (2xx).
    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Positive intermediate (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Transient (4xx) or permanent (5xx) failure.
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// Whether the code is one of `expected`.
    pub fn is_one_of(&self, expected: &[u16]) -> bool {
        expected.contains(&self.code)
    }

    /// All lines joined with a space.
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// Enhanced code (when present) followed by the text.
    pub fn message(&self) -> String {
        match self.enhanced_code {
            Some(ref ec) => format!("{ec} {}", self.text()).trim_end().to_string(),
            None => self.text(),
        }
    }

    /// Code, enhanced code and text on one line, for error details.
    pub fn detail(&self) -> String {
        format!("{} {}", self.code, self.message()).trim_end().to_string()
    }

    /// Parse a reply from its raw lines (CRLF or LF terminated).
    ///
    /// Every line must start with the same 3-digit code; the last line has a
    /// space (or nothing) after the code, earlier lines a `-`.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut code: Option<u16> = None;
        let mut lines = Vec::new();
        let mut enhanced_code = None;

        for line in raw.lines() {
            let line = line.trim_end_matches('\r');
            let c = line
                .get(..3)
                .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|s| s.parse::<u16>().ok())
                .ok_or_else(|| MailError::Protocol(format!("malformed reply line {line:?}")))?;
            match code {
                None => code = Some(c),
                Some(first) if first != c => {
                    return Err(MailError::Protocol(format!(
                        "inconsistent reply codes {first} and {c}"
                    )));
                }
                Some(_) => {}
            }
            let text = line.get(4..).unwrap_or("");
            let text = if lines.is_empty() {
                match split_enhanced_code(text, c) {
                    Some((ec, rest)) => {
                        enhanced_code = Some(ec.to_string());
                        rest
                    }
                    None => text,
                }
            } else {
                text
            };
            lines.push(text.to_string());
        }

        let code = code.ok_or_else(|| MailError::Protocol("empty reply".into()))?;
        Ok(Self {
            code,
            enhanced_code,
            lines,
        })
    }
}

/// Whether `line` is the last line of a reply: its 4th character is not `-`.
pub fn is_last_line(line: &str) -> bool {
    line.as_bytes().get(3) != Some(&b'-')
}

/// Split `"2.1.0 Ok"` into `("2.1.0", "Ok")` when the class digit matches `code`.
fn split_enhanced_code(text: &str, code: u16) -> Option<(&str, &str)> {
    let (candidate, rest) = text.split_once(' ').unwrap_or((text, ""));
    let parts: Vec<&str> = candidate.split('.').collect();
    let well_formed = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.len() <= 3 && p.bytes().all(|b| b.is_ascii_digit()));
    if !well_formed {
        return None;
    }
    let class = candidate.bytes().next().map(|b| u16::from(b - b'0'));
    (class == Some(code / 100)).then_some((candidate, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let reply = Reply::parse("250 OK\r\n").unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.lines, ["OK"]);
        assert!(reply.is_positive());
        assert!(reply.enhanced_code.is_none());
    }

    #[test]
    fn test_multi_line() {
        let raw = "250-mail.example.com Hello\r\n250-SIZE 35882577\r\n250 AUTH LOGIN PLAIN\r\n";
        let reply = Reply::parse(raw).unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.lines.len(), 3);
        assert_eq!(reply.lines[2], "AUTH LOGIN PLAIN");
    }

    #[test]
    fn test_enhanced_code() {
        let reply = Reply::parse("550 5.1.1 User unknown\r\n").unwrap();
        assert_eq!(reply.enhanced_code.as_deref(), Some("5.1.1"));
        assert_eq!(reply.text(), "User unknown");
        assert_eq!(reply.detail(), "550 5.1.1 User unknown");
        assert!(reply.is_error());
    }

    #[test]
    fn test_enhanced_code_class_mismatch_kept_as_text() {
        let reply = Reply::parse("250 5.1.1 odd\r\n").unwrap();
        assert!(reply.enhanced_code.is_none());
        assert_eq!(reply.text(), "5.1.1 odd");
    }

    #[test]
    fn test_bare_code() {
        let reply = Reply::parse("354\r\n").unwrap();
        assert_eq!(reply.code, 354);
        assert_eq!(reply.detail(), "354");
        assert!(reply.is_intermediate());
    }

    #[test]
    fn test_text_starting_below_digits() {
        let challenge = Reply::parse("334 +PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2U+\r\n").unwrap();
        assert_eq!(challenge.code, 334);
        assert!(challenge.enhanced_code.is_none());
        assert_eq!(challenge.text(), "+PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2U+");

        let greeting = Reply::parse("220 (mx.example.com) ESMTP ready\r\n").unwrap();
        assert_eq!(greeting.text(), "(mx.example.com) ESMTP ready");

        let slash = Reply::parse("334 /wAAAA==\r\n").unwrap();
        assert_eq!(slash.lines, ["/wAAAA=="]);
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(Reply::parse("hello\r\n"), Err(MailError::Protocol(_))));
        assert!(matches!(Reply::parse(""), Err(MailError::Protocol(_))));
        assert!(matches!(
            Reply::parse("250-first\r\n550 second\r\n"),
            Err(MailError::Protocol(_))
        ));
    }

    #[test]
    fn test_last_line_detection() {
        assert!(!is_last_line("250-SIZE"));
        assert!(is_last_line("250 OK"));
        assert!(is_last_line("250"));
    }
}
