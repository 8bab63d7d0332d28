//! The MIME part tree and its serializer.
//!
//! A message body is either one leaf or a multipart node whose children are
//! parts themselves. Every message shape is a tree built from these two
//! variants, and one recursive serializer renders any of them.

use super::boundary;
use super::headers::HeaderBlock;
use crate::encoding::transfer::TransferEncoding;
use crate::encoding::CRLF;

/// Text written before the first delimiter of a top-level multipart body.
pub const PREAMBLE: &str = "This is a multi-part message in MIME format.";

/// Multipart subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartKind {
    /// Same content in several formats (plain + HTML).
    Alternative,
    /// A root part plus resources it references (HTML + inline images).
    Related,
    /// Independent parts (content + attachments).
    Mixed,
}

impl MultipartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alternative => "alternative",
            Self::Related => "related",
            Self::Mixed => "mixed",
        }
    }
}

/// A single body part with its payload already transfer-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    /// Full `Content-Type` value including parameters.
    pub content_type: String,
    /// Transfer encoding applied to `body`.
    pub encoding: TransferEncoding,
    /// `Content-ID` without angle brackets.
    pub content_id: Option<String>,
    /// Full `Content-Disposition` value including parameters.
    pub disposition: Option<String>,
    /// Encoded payload.
    pub body: Vec<u8>,
}

/// A node of the MIME tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimePart {
    Leaf(Leaf),
    Multipart {
        kind: MultipartKind,
        boundary: String,
        children: Vec<MimePart>,
    },
}

impl MimePart {
    /// A multipart node with an empty boundary, filled in by [`MimePart::assign_boundaries`].
    pub fn multipart(kind: MultipartKind, children: Vec<MimePart>) -> Self {
        Self::Multipart {
            kind,
            boundary: String::new(),
            children,
        }
    }

    /// The headers that describe this part's content.
    pub fn content_headers(&self) -> HeaderBlock {
        let mut headers = HeaderBlock::new();
        match self {
            Self::Leaf(leaf) => {
                headers.push("Content-Type", leaf.content_type.clone());
                headers.push("Content-Transfer-Encoding", leaf.encoding.as_str());
                if let Some(ref cid) = leaf.content_id {
                    headers.push("Content-ID", format!("<{cid}>"));
                }
                if let Some(ref disposition) = leaf.disposition {
                    headers.push("Content-Disposition", disposition.clone());
                }
            }
            Self::Multipart { kind, boundary, .. } => {
                headers.push(
                    "Content-Type",
                    format!("multipart/{};\r\n boundary=\"{boundary}\"", kind.as_str()),
                );
            }
        }
        headers
    }

    /// Write the body of this part (without its own headers).
    pub fn write_body(&self, out: &mut Vec<u8>, top_level: bool) {
        match self {
            Self::Leaf(leaf) => out.extend_from_slice(&leaf.body),
            Self::Multipart {
                boundary, children, ..
            } => {
                if top_level {
                    out.extend_from_slice(PREAMBLE.as_bytes());
                    out.extend_from_slice(CRLF.as_bytes());
                    out.extend_from_slice(CRLF.as_bytes());
                }
                for child in children {
                    out.extend_from_slice(format!("--{boundary}{CRLF}").as_bytes());
                    out.extend_from_slice(child.content_headers().render().as_bytes());
                    out.extend_from_slice(CRLF.as_bytes());
                    child.write_body(out, false);
                    if !out.ends_with(CRLF.as_bytes()) {
                        out.extend_from_slice(CRLF.as_bytes());
                    }
                    // The CRLF before a delimiter belongs to the delimiter
                    out.extend_from_slice(CRLF.as_bytes());
                }
                out.extend_from_slice(format!("--{boundary}--{CRLF}").as_bytes());
            }
        }
    }

    /// Give every multipart node a fresh boundary, regenerating any that
    /// occur inside an encoded payload.
    pub fn assign_boundaries(&mut self) {
        let mut leaves = Vec::new();
        self.collect_leaf_bodies(&mut leaves);
        self.assign_at(1, &leaves);
    }

    fn assign_at(&mut self, level: usize, leaves: &[Vec<u8>]) {
        if let Self::Multipart {
            boundary, children, ..
        } = self
        {
            *boundary = loop {
                let candidate = boundary::generate(level);
                let needle = candidate.as_bytes();
                let collides = leaves
                    .iter()
                    .any(|body| body.windows(needle.len()).any(|w| w == needle));
                if !collides {
                    break candidate;
                }
                tracing::debug!(level, "Boundary collided with part content, regenerating");
            };
            for child in children {
                child.assign_at(level + 1, leaves);
            }
        }
    }

    fn collect_leaf_bodies(&self, out: &mut Vec<Vec<u8>>) {
        match self {
            Self::Leaf(leaf) => out.push(leaf.body.clone()),
            Self::Multipart { children, .. } => {
                for child in children {
                    child.collect_leaf_bodies(out);
                }
            }
        }
    }

    /// Every leaf in document order.
    pub fn leaves(&self) -> Vec<&Leaf> {
        match self {
            Self::Leaf(leaf) => vec![leaf],
            Self::Multipart { children, .. } => children.iter().flat_map(|c| c.leaves()).collect(),
        }
    }

    /// Nesting depth: 0 for a leaf.
    pub fn depth(&self) -> usize {
        match self {
            Self::Leaf(_) => 0,
            Self::Multipart { children, .. } => {
                1 + children.iter().map(MimePart::depth).max().unwrap_or(0)
            }
        }
    }
}
