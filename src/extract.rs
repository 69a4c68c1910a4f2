//! HTML to plain text, for indexing web pages.
//!
//! A deliberately small extractor: drop `<script>`/`<style>` bodies and
//! comments, turn block-level tags into line breaks, strip every other
//! tag, decode the common entities, and collapse whitespace. Good enough
//! for documentation pages; anything fancier belongs in a dedicated
//! crawler.

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "section", "article",
    "table", "ul", "ol", "blockquote", "pre",
];

/// Extract readable text from an HTML document.
pub fn html_to_text(html: &str) -> String {
    let text = strip_tags(html);
    let text = decode_entities(&text);
    collapse_whitespace(&text)
}

/// Page title for URL origins: the last non-empty path segment, or the
/// host when the path is empty.
pub fn title_from_url(url: &str) -> String {
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let trimmed = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);
    let (host, path) = match trimmed.split_once('/') {
        Some((host, path)) => (host, path),
        None => (trimmed, ""),
    };
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .next_back()
        .unwrap_or(host)
        .to_string()
}

/// Remove tags, emitting a newline for block-level ones. Script and
/// style elements lose their content entirely.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];

        // Comments end at "-->", not at the first '>'.
        if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(end) => rest = &rest[end + 3..],
                None => return out,
            }
            continue;
        }

        let Some(close) = rest.find('>') else {
            // Unterminated tag: drop the tail.
            return out;
        };
        let tag_body = &rest[1..close];
        let name: String = tag_body
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        rest = &rest[close + 1..];

        // Skip the entire element body for script/style.
        if (name == "script" || name == "style") && !tag_body.starts_with('/') {
            let closer = format!("</{}", name);
            let lower = rest.to_ascii_lowercase();
            match lower.find(&closer) {
                Some(pos) => {
                    let after = &rest[pos..];
                    match after.find('>') {
                        Some(end) => rest = &after[end + 1..],
                        None => return out,
                    }
                }
                None => return out,
            }
            continue;
        }

        // One break per block boundary, however many tags meet there.
        if BLOCK_TAGS.contains(&name.as_str()) && !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
    }

    out.push_str(rest);
    out
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let Some(semi) = rest[..rest.len().min(12)].find(';') else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..semi];

        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            "ndash" => Some('\u{2013}'),
            "mdash" => Some('\u{2014}'),
            "hellip" => Some('\u{2026}'),
            _ => decode_numeric_entity(entity),
        };

        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_numeric_entity(entity: &str) -> Option<char> {
    let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()?
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()?
    } else {
        return None;
    };
    char::from_u32(code)
}

/// Collapse runs of horizontal whitespace to one space and runs of blank
/// lines to one empty line.
fn collapse_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if lines.last().map(String::as_str) == Some("") {
                continue;
            }
            if !lines.is_empty() {
                lines.push(String::new());
            }
        } else {
            lines.push(collapsed);
        }
    }
    while lines.last().map(String::as_str) == Some("") {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tags_and_keeps_text() {
        let html = "<html><body><p>Hello <b>world</b></p></body></html>";
        assert_eq!(html_to_text(html), "Hello world");
    }

    #[test]
    fn test_block_tags_become_line_breaks() {
        let html = "<h1>Title</h1><p>First.</p><p>Second.</p>";
        assert_eq!(html_to_text(html), "Title\nFirst.\nSecond.");
    }

    #[test]
    fn test_script_and_style_bodies_dropped() {
        let html = "<p>keep</p><script>var x = '<p>not text</p>';</script>\
                    <style>p { color: red }</style><p>also keep</p>";
        let text = html_to_text(html);
        assert!(text.contains("keep"));
        assert!(text.contains("also keep"));
        assert!(!text.contains("color"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn test_comments_removed_even_with_angle_brackets() {
        let html = "before<!-- <p>hidden</p> -->after";
        assert_eq!(html_to_text(html), "beforeafter");
    }

    #[test]
    fn test_entities_decoded() {
        let html = "<p>a &amp; b &lt;c&gt; &#233; &#x41;</p>";
        assert_eq!(html_to_text(html), "a & b <c> é A");
    }

    #[test]
    fn test_unknown_entity_left_alone() {
        assert_eq!(html_to_text("&unknown; x"), "&unknown; x");
    }

    #[test]
    fn test_whitespace_collapsed() {
        let html = "<div>  lots\t of   space </div><div></div><div></div><div>end</div>";
        assert_eq!(html_to_text(html), "lots of space\nend");
    }

    #[test]
    fn test_title_from_url() {
        assert_eq!(
            title_from_url("https://example.com/docs/guide.html"),
            "guide.html"
        );
        assert_eq!(title_from_url("https://example.com/"), "example.com");
        assert_eq!(title_from_url("https://example.com"), "example.com");
        assert_eq!(title_from_url("https://example.com/a/b/?q=1"), "b");
    }
}
