//! Plain-text alternative derived from an HTML body.

/// Convert HTML to plain text for the `text/plain` alternative.
///
/// Drops `<head>`, `<script>` and `<style>` blocks, turns block-level tags
/// into line breaks, strips the remaining tags, decodes common entities and
/// collapses runs of blank lines.
pub fn html_to_text(html: &str) -> String {
    let body = ["head", "script", "style"]
        .iter()
        .fold(html.to_owned(), |acc, name| strip_element(&acc, name));

    let mut flat = String::with_capacity(body.len());
    let mut tag: Option<String> = None;
    for ch in body.chars() {
        match (&mut tag, ch) {
            (None, '<') => tag = Some(String::new()),
            (Some(name), '>') => {
                if is_block_tag(name) {
                    flat.push('\n');
                }
                tag = None;
            }
            (Some(name), c) => name.push(c),
            (None, c) => flat.push(c),
        }
    }

    // At most one blank line between paragraphs
    let decoded = decode_entities(&flat);
    let mut lines: Vec<String> = Vec::new();
    for raw in decoded.lines() {
        let line = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let last_blank = lines.last().is_some_and(|l| l.is_empty());
        if line.is_empty() && (lines.is_empty() || last_blank) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn is_block_tag(tag: &str) -> bool {
    let name: String = tag
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    matches!(
        name.as_str(),
        "br" | "p" | "div" | "tr" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
            | "table" | "ul" | "ol" | "blockquote" | "hr"
    )
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp..];
        let Some(semi) = after.find(';').filter(|&i| i <= 10) else {
            out.push('&');
            rest = &after[1..];
            continue;
        };
        let entity = &after[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32)
                .map(|c| if c == '\u{a0}' { ' ' } else { c }),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Cut every `<name ...>...</name>` element, case-insensitively. An element
/// that is never closed swallows the rest of the document.
fn strip_element(html: &str, name: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with the original
    let lower = html.to_ascii_lowercase();
    let (open, close) = (format!("<{name}"), format!("</{name}>"));
    let mut kept = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(found) = lower[pos..].find(&open) {
        let begin = pos + found;
        kept.push_str(&html[pos..begin]);
        match lower[begin..].find(&close) {
            Some(len) => pos = begin + len + close.len(),
            None => return kept,
        }
    }
    kept.push_str(&html[pos..]);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs_become_lines() {
        let html = "<div>Order <em>#4411</em> shipped</div>\n\n\n<p>Track it   online</p>";
        assert_eq!(html_to_text(html), "Order #4411 shipped\n\nTrack it online");
    }

    #[test]
    fn test_entities_decoded() {
        let text = html_to_text("Tom &amp; Jerry &lt;3&gt; &amp;lt; &#233;&#x20AC;");
        assert_eq!(text, "Tom & Jerry <3> &lt; é€");
    }

    #[test]
    fn test_html_to_text_drops_head_and_script() {
        let html = "<html><HEAD><title>T</title></HEAD><body><SCRIPT>alert(1)</SCRIPT>Body<br/>Line</body></html>";
        assert_eq!(html_to_text(html), "Body\nLine");
    }

    #[test]
    fn test_lone_ampersand_kept() {
        assert_eq!(html_to_text("fish & chips"), "fish & chips");
    }
}
