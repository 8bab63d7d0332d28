//! Capabilities announced in the EHLO reply.

use std::collections::BTreeMap;

use super::reply::Reply;

/// Which greeting succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greeting {
    Helo,
    Ehlo,
}

/// Extension keywords and their parameters, rebuilt on every EHLO/HELO.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Server name from the first reply line.
    pub server_name: String,
    /// Uppercased keyword → parameters.
    extensions: BTreeMap<String, Vec<String>>,
}

impl Capabilities {
    /// Parse an EHLO reply: each line after the first is `KEYWORD [params...]`.
    ///
    /// `AUTH=LOGIN PLAIN` (the pre-standard form) is merged into `AUTH`.
    pub fn from_ehlo(reply: &Reply) -> Self {
        let mut caps = Self {
            server_name: first_word(reply),
            extensions: BTreeMap::new(),
        };
        for line in reply.lines.iter().skip(1) {
            let mut parts = line.split_whitespace();
            let Some(keyword) = parts.next() else {
                continue;
            };
            let keyword = keyword.to_ascii_uppercase();
            let (keyword, mut params): (String, Vec<String>) = match keyword.split_once('=') {
                Some((k, first)) if k == "AUTH" => (k.to_string(), vec![first.to_string()]),
                _ => (keyword, Vec::new()),
            };
            params.extend(parts.map(String::from));
            let entry = caps.extensions.entry(keyword.clone()).or_default();
            for p in params {
                let p = if keyword == "AUTH" { p.to_ascii_uppercase() } else { p };
                if !entry.contains(&p) {
                    entry.push(p);
                }
            }
        }
        caps
    }

    /// A HELO reply carries no extensions.
    pub fn from_helo(reply: &Reply) -> Self {
        Self {
            server_name: first_word(reply),
            extensions: BTreeMap::new(),
        }
    }

    /// Whether `keyword` was announced.
    pub fn has(&self, keyword: &str) -> bool {
        self.extensions.contains_key(&keyword.to_ascii_uppercase())
    }

    /// Parameters of `keyword`, if announced.
    pub fn params(&self, keyword: &str) -> Option<&[String]> {
        self.extensions
            .get(&keyword.to_ascii_uppercase())
            .map(Vec::as_slice)
    }

    /// Advertised AUTH mechanisms, uppercased.
    pub fn auth_mechanisms(&self) -> &[String] {
        self.params("AUTH").unwrap_or(&[])
    }

    /// Whether `mechanism` is in the AUTH list.
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        let upper = mechanism.to_ascii_uppercase();
        self.auth_mechanisms().iter().any(|m| *m == upper)
    }

    /// SIZE limit in octets; `None` when absent or zero (no limit).
    pub fn max_size(&self) -> Option<u64> {
        self.params("SIZE")
            .and_then(|p| p.first())
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&n| n > 0)
    }

    pub fn starttls(&self) -> bool {
        self.has("STARTTLS")
    }

    pub fn eight_bit_mime(&self) -> bool {
        self.has("8BITMIME")
    }

    pub fn smtputf8(&self) -> bool {
        self.has("SMTPUTF8")
    }

    pub fn dsn(&self) -> bool {
        self.has("DSN")
    }

    /// All keywords in sorted order.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.extensions.keys().map(String::as_str)
    }
}

fn first_word(reply: &Reply) -> String {
    reply
        .lines
        .first()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or_default()
        .to_string()
}
