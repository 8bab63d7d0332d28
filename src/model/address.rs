//! Email addresses: parsing, validation and header formatting (RFC 5322 §3.4).

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::encoding::header::{encode_header, HeaderPosition};
use crate::error::{MailError, Result};

/// A parsed email address.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Address {
    /// The bare email address (`user@domain`).
    pub address: String,
    /// Human-readable display name (may be empty).
    pub display_name: String,
}

/// How addresses are checked before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStrategy {
    /// The strictest strategy available, chosen once per process.
    #[default]
    Auto,
    /// Anything shaped like `x@y` without whitespace.
    Permissive,
    /// Dot-atom local part and hostname-shaped domain (HTML5 rules).
    Strict,
    /// Structural RFC 5321 length and label checks, no regular expression.
    Native,
    /// Accept everything.
    Noop,
}

impl Address {
    /// Build an address from its parts, rejecting line breaks.
    pub fn new(address: impl Into<String>, display_name: impl Into<String>) -> Result<Self> {
        let address = address.into().trim().to_string();
        let display_name = display_name.into().trim().to_string();
        if has_line_break(&address) || has_line_break(&display_name) {
            return Err(MailError::AddressInvalid(format!(
                "{address:?} contains a line break"
            )));
        }
        if split_at_last_at(&address).is_none() {
            return Err(MailError::AddressInvalid(address));
        }
        Ok(Self {
            address,
            display_name,
        })
    }

    /// Parse a single address.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    ///
    /// The address is split on its last `@`; a missing local part, missing
    /// domain or any CR/LF is an `AddressInvalid` error.
    pub fn parse(raw: &str) -> Result<Self> {
        if has_line_break(raw) {
            return Err(MailError::AddressInvalid(format!("{raw:?} contains a line break")));
        }
        let trimmed = raw.trim();

        // Try "Display Name <address>" or "<address>"
        if trimmed.ends_with('>') {
            if let Some(angle_start) = trimmed.rfind('<') {
                let addr = trimmed[angle_start + 1..trimmed.len() - 1].trim();
                let display_name = unquote(trimmed[..angle_start].trim());
                return Self::new(addr, display_name);
            }
        }

        Self::new(trimmed, "")
    }

    /// Parse a comma-separated list of addresses.
    ///
    /// Handles quoted commas: `"Last, First" <a@b.com>, other@c.com`.
    /// Empty segments are skipped; the first malformed entry is an error.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        split_list(raw)
            .into_iter()
            .filter(|segment| !segment.trim().is_empty())
            .map(|segment| Self::parse(&segment))
            .collect()
    }

    /// The part before the last `@`.
    pub fn local_part(&self) -> &str {
        split_at_last_at(&self.address).map_or("", |(local, _)| local)
    }

    /// The part after the last `@`.
    pub fn domain(&self) -> &str {
        split_at_last_at(&self.address).map_or("", |(_, domain)| domain)
    }

    /// Whether the address needs `SMTPUTF8` to be transmitted as-is.
    pub fn is_ascii(&self) -> bool {
        self.address.is_ascii()
    }

    /// Convert an internationalized domain to its punycode form.
    ///
    /// The local part is left untouched. ASCII domains are returned unchanged.
    pub fn to_ascii(&self) -> Result<Self> {
        let domain = self.domain();
        if domain.is_ascii() {
            return Ok(self.clone());
        }
        let ascii = idna::domain_to_ascii(domain).map_err(|e| {
            MailError::AddressInvalid(format!("{}: cannot convert domain ({e:?})", self.address))
        })?;
        Ok(Self {
            address: format!("{}@{}", self.local_part(), ascii),
            display_name: self.display_name.clone(),
        })
    }

    /// Check the address with the given strategy.
    pub fn is_valid(&self, strategy: ValidationStrategy) -> bool {
        validate(&self.address, strategy)
    }

    /// Format for a header in `charset`.
    ///
    /// Produces `"Name" <addr>` when a display name is present; names that
    /// are not plain ASCII become an RFC 2047 encoded word instead of a
    /// quoted string. Without a name the bare address is returned.
    pub fn format(&self, charset: &str) -> Result<String> {
        if self.display_name.is_empty() {
            return Ok(self.address.clone());
        }
        let name = encode_header(&self.display_name, charset, HeaderPosition::Phrase)?;
        Ok(format!("{name} <{}>", self.address))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} <{}>", self.display_name, self.address)
        }
    }
}

impl std::str::FromStr for Address {
    type Err = MailError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ── Validation ──────────────────────────────────────────────────

impl ValidationStrategy {
    /// Replace `Auto` with the concrete strategy selected for this process.
    pub fn resolve(self) -> Self {
        static AUTO: OnceLock<ValidationStrategy> = OnceLock::new();
        match self {
            Self::Auto => *AUTO.get_or_init(|| {
                if strict_regex().is_some() {
                    Self::Strict
                } else {
                    Self::Native
                }
            }),
            other => other,
        }
    }
}

/// Validate a bare address with `strategy`.
pub fn validate(address: &str, strategy: ValidationStrategy) -> bool {
    if has_line_break(address) {
        return false;
    }
    match strategy.resolve() {
        ValidationStrategy::Noop => true,
        ValidationStrategy::Permissive => {
            permissive_regex().is_some_and(|re| re.is_match(address))
        }
        ValidationStrategy::Strict => match strict_regex() {
            Some(re) => re.is_match(address),
            None => validate_native(address),
        },
        ValidationStrategy::Native | ValidationStrategy::Auto => validate_native(address),
    }
}

fn permissive_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+$").ok())
        .as_ref()
}

fn strict_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
        )
        .ok()
    })
    .as_ref()
}

/// RFC 5321 limits: local part ≤ 64, whole address ≤ 254, domain labels
/// of 1..=63 letters/digits/hyphens not starting or ending with a hyphen,
/// or an address literal in brackets.
fn validate_native(address: &str) -> bool {
    let Some((local, domain)) = split_at_last_at(address) else {
        return false;
    };
    if address.len() > 254 || local.len() > 64 {
        return false;
    }

    let local_ok = if local.len() >= 2 && local.starts_with('"') && local.ends_with('"') {
        local[1..local.len() - 1]
            .bytes()
            .all(|b| (0x20..=0x7E).contains(&b))
    } else {
        !local.starts_with('.')
            && !local.ends_with('.')
            && !local.contains("..")
            && local
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+/=?^_`{|}~.-".contains(&b))
    };
    if !local_ok {
        return false;
    }

    if domain.starts_with('[') && domain.ends_with(']') {
        let literal = &domain[1..domain.len() - 1];
        let literal = literal.strip_prefix("IPv6:").unwrap_or(literal);
        return literal.parse::<std::net::IpAddr>().is_ok();
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

// ── Helpers ─────────────────────────────────────────────────────

fn has_line_break(s: &str) -> bool {
    s.contains(['\r', '\n'])
}

fn split_at_last_at(address: &str) -> Option<(&str, &str)> {
    let at = address.rfind('@')?;
    let (local, domain) = (&address[..at], &address[at + 1..]);
    if local.is_empty() || domain.is_empty() {
        None
    } else {
        Some((local, domain))
    }
}

/// Strip surrounding double-quotes and undo backslash escapes.
fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        let inner = &trimmed[1..trimmed.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut escaped = false;
        for ch in inner.chars() {
            if escaped {
                out.push(ch);
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else {
                out.push(ch);
            }
        }
        out.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Split on commas that are outside quotes and angle brackets.
fn split_list(raw: &str) -> Vec<String> {
    let mut results = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut escaped = false;

    for ch in raw.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                escaped = true;
                current.push(ch);
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '<' if !in_quotes => {
                in_angle = true;
                current.push(ch);
            }
            '>' if !in_quotes => {
                in_angle = false;
                current.push(ch);
            }
            ',' if !in_quotes && !in_angle => {
                results.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    results.push(current);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::header::decode_encoded_words;

    #[test]
    fn test_parse_forms() {
        let bare = Address::parse("ops@relay.test").unwrap();
        assert_eq!((bare.address.as_str(), bare.display_name.as_str()), ("ops@relay.test", ""));

        let angled = Address::parse("<ops@relay.test>").unwrap();
        assert_eq!(angled, bare);

        let quoted = Address::parse("  \"Ops, Night Shift\"   < ops@relay.test > ").unwrap();
        assert_eq!(quoted.address, "ops@relay.test");
        assert_eq!(quoted.display_name, "Ops, Night Shift");
    }

    #[test]
    fn test_parse_splits_on_last_at() {
        let addr = Address::parse("\"odd@local\"@example.com").unwrap();
        assert_eq!(addr.local_part(), "\"odd@local\"");
        assert_eq!(addr.domain(), "example.com");
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        assert!(Address::parse("no-at-sign").is_err());
        assert!(Address::parse("@example.com").is_err());
        assert!(Address::parse("user@").is_err());
    }

    #[test]
    fn test_parse_rejects_line_breaks() {
        let err = Address::parse("user@example.com\r\nBcc: victim@example.com").unwrap_err();
        assert!(matches!(err, MailError::AddressInvalid(_)));
        assert!(Address::new("a@b.com", "Evil\nName").is_err());
    }

    #[test]
    fn test_parse_list() {
        let list = Address::parse_list("Billing <bill@shop.test>, \"Smith, J.\" <js@shop.test>, x@y.test,")
            .unwrap();
        let addrs: Vec<_> = list.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(addrs, ["bill@shop.test", "js@shop.test", "x@y.test"]);
        assert_eq!(list[1].display_name, "Smith, J.");
    }

    #[test]
    fn test_format_without_name_round_trips() {
        let addr = Address::parse("  user@example.com ").unwrap();
        assert_eq!(addr.format("utf-8").unwrap(), "user@example.com");
    }

    #[test]
    fn test_format_ascii_name_is_quoted() {
        let addr = Address::new("alice@example.com", "Alice Liddell").unwrap();
        assert_eq!(
            addr.format("utf-8").unwrap(),
            "\"Alice Liddell\" <alice@example.com>"
        );
    }

    #[test]
    fn test_format_non_ascii_name_decodes_back() {
        let addr = Address::new("jose@example.com", "José Müller-Łukasz").unwrap();
        let formatted = addr.format("utf-8").unwrap();
        let (name, rest) = formatted.rsplit_once(" <").unwrap();
        assert_eq!(rest, "jose@example.com>");
        assert_eq!(decode_encoded_words(name), "José Müller-Łukasz");
    }

    #[test]
    fn test_to_ascii_converts_domain() {
        let addr = Address::parse("info@bücher.example").unwrap();
        let ascii = addr.to_ascii().unwrap();
        assert_eq!(ascii.address, "info@xn--bcher-kva.example");
        assert!(ascii.is_valid(ValidationStrategy::Strict));
    }

    #[test]
    fn test_validation_strategies() {
        assert!(validate("user@example.com", ValidationStrategy::Strict));
        assert!(!validate("user name@example.com", ValidationStrategy::Strict));
        assert!(validate("user@[192.0.2.1]", ValidationStrategy::Native));
        assert!(!validate("a..b@example.com", ValidationStrategy::Native));
        assert!(!validate("user@-bad.com", ValidationStrategy::Native));
        assert!(validate("ü@x", ValidationStrategy::Permissive));
        assert!(validate("anything", ValidationStrategy::Noop));
        assert_eq!(ValidationStrategy::Auto.resolve(), ValidationStrategy::Strict);
    }
}
