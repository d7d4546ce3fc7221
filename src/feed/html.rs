//! HTML utilities for feed item content.
//!
//! Feed descriptions arrive as HTML fragments; delivery needs plain
//! text plus the embedded image URLs. No HTML parser dependency - the
//! fragments are small and the extraction rules simple.

/// Strip HTML tags from text, decoding common entities.
///
/// `<br>` and paragraph boundaries become newlines; runs of spaces
/// collapse to one and runs of blank lines to a single blank line.
pub fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut tag = String::new();
    let mut in_entity = false;
    let mut entity = String::new();

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split([' ', '/'])
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                if name == "br" || (name == "p" && tag.starts_with('/')) {
                    result.push('\n');
                }
            }
            _ if in_tag => {
                tag.push(ch);
            }
            '&' => {
                in_entity = true;
                entity.clear();
            }
            ';' if in_entity => {
                in_entity = false;
                match entity.as_str() {
                    "amp" => result.push('&'),
                    "lt" => result.push('<'),
                    "gt" => result.push('>'),
                    "quot" => result.push('"'),
                    "apos" => result.push('\''),
                    "nbsp" => result.push(' '),
                    _ if entity.starts_with('#') => {
                        if let Some(code) = parse_numeric_entity(&entity) {
                            if let Some(c) = char::from_u32(code) {
                                result.push(c);
                            }
                        }
                    }
                    _ => {
                        // Unknown entity, keep as-is
                        result.push('&');
                        result.push_str(&entity);
                        result.push(';');
                    }
                }
            }
            _ if in_entity => {
                entity.push(ch);
            }
            _ => {
                result.push(ch);
            }
        }
    }

    normalize_whitespace(&result)
}

/// Collapse space runs within lines and blank-line runs between them.
fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let compact = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if compact.is_empty() && lines.last().is_some_and(String::is_empty) {
            continue;
        }
        lines.push(compact);
    }
    lines.join("\n").trim().to_string()
}

/// Parse a numeric HTML entity (e.g. "#123" or "#x7B").
fn parse_numeric_entity(entity: &str) -> Option<u32> {
    if entity.starts_with("#x") || entity.starts_with("#X") {
        u32::from_str_radix(&entity[2..], 16).ok()
    } else if let Some(rest) = entity.strip_prefix('#') {
        rest.parse().ok()
    } else {
        None
    }
}

/// Extract image URLs from `<img>` tags, in document order.
///
/// Reads `src` first, then `data-src` (lazy-loaded images). URLs that
/// look like tracking pixels are skipped.
pub fn extract_image_urls(html: &str) -> Vec<String> {
    let lower = html.to_ascii_lowercase();
    let mut urls = Vec::new();
    let mut pos = 0;

    while let Some(start) = lower[pos..].find("<img") {
        let tag_start = pos + start;
        let Some(end) = lower[tag_start..].find('>') else {
            break;
        };
        let tag = &html[tag_start..tag_start + end];

        let src = find_attr(tag, "src").or_else(|| find_attr(tag, "data-src"));
        if let Some(src) = src {
            let src_lower = src.to_ascii_lowercase();
            if !src_lower.contains("tracking") && !src_lower.contains("pixel") {
                urls.push(src);
            }
        }

        pos = tag_start + end;
    }

    urls
}

/// Find a quoted attribute value inside a tag slice.
///
/// The attribute name must be preceded by whitespace so `src` does not
/// match inside `data-src`.
fn find_attr(tag: &str, name: &str) -> Option<String> {
    let lower = tag.to_ascii_lowercase();
    let needle = format!("{name}=");
    let mut search = 0;

    while let Some(found) = lower[search..].find(&needle) {
        let at = search + found;
        let preceded_ok = at > 0
            && lower[..at]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_whitespace());
        if !preceded_ok {
            search = at + needle.len();
            continue;
        }

        let rest = &tag[at + needle.len()..];
        let mut chars = rest.chars();
        return match chars.next() {
            Some(quote @ ('"' | '\'')) => {
                let value: String = chars.take_while(|&c| c != quote).collect();
                Some(value)
            }
            Some(first) => {
                let mut value = String::new();
                value.push(first);
                value.extend(chars.take_while(|c| !c.is_whitespace()));
                Some(value)
            }
            None => None,
        };
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html("<b>Bold</b> text"), "Bold text");
        assert_eq!(strip_html("<div><span>Nested</span></div>"), "Nested");
    }

    #[test]
    fn test_strip_html_entities() {
        assert_eq!(strip_html("&amp;"), "&");
        assert_eq!(strip_html("&lt;tag&gt;"), "<tag>");
        assert_eq!(strip_html("&quot;quoted&quot;"), "\"quoted\"");
        assert_eq!(strip_html("A&nbsp;B"), "A B");
    }

    #[test]
    fn test_strip_html_numeric_entities() {
        assert_eq!(strip_html("&#65;"), "A");
        assert_eq!(strip_html("&#x41;"), "A");
        assert_eq!(strip_html("&#x3042;"), "あ");
    }

    #[test]
    fn test_strip_html_unknown_entity_kept() {
        assert_eq!(strip_html("&bogus;"), "&bogus;");
    }

    #[test]
    fn test_strip_html_br_becomes_newline() {
        assert_eq!(strip_html("one<br>two"), "one\ntwo");
        assert_eq!(strip_html("one<br/>two"), "one\ntwo");
        assert_eq!(strip_html("one<BR />two"), "one\ntwo");
    }

    #[test]
    fn test_strip_html_paragraphs_become_newlines() {
        assert_eq!(strip_html("<p>one</p><p>two</p>"), "one\ntwo");
    }

    #[test]
    fn test_strip_html_collapses_whitespace() {
        assert_eq!(strip_html("<p>  Multiple   spaces  </p>"), "Multiple spaces");
        // Blank-line runs collapse to one blank line, not zero.
        assert_eq!(strip_html("<p>a</p>\n\n\n\n<p>b</p>"), "a\n\nb");
    }

    #[test]
    fn test_extract_image_urls_src() {
        let html = r#"<p>text</p><img src="https://example.com/a.jpg"><img src="https://example.com/b.png"/>"#;
        assert_eq!(
            extract_image_urls(html),
            vec![
                "https://example.com/a.jpg".to_string(),
                "https://example.com/b.png".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_image_urls_data_src() {
        let html = r#"<img data-src="https://example.com/lazy.jpg">"#;
        assert_eq!(
            extract_image_urls(html),
            vec!["https://example.com/lazy.jpg".to_string()]
        );
    }

    #[test]
    fn test_extract_image_urls_src_wins_over_data_src() {
        let html = r#"<img src="https://example.com/a.jpg" data-src="https://example.com/b.jpg">"#;
        assert_eq!(
            extract_image_urls(html),
            vec!["https://example.com/a.jpg".to_string()]
        );
    }

    #[test]
    fn test_extract_image_urls_skips_tracking_pixels() {
        let html = r#"<img src="https://t.example.com/tracking/1.gif"><img src="https://example.com/pixel.png"><img src="https://example.com/real.jpg">"#;
        assert_eq!(
            extract_image_urls(html),
            vec!["https://example.com/real.jpg".to_string()]
        );
    }

    #[test]
    fn test_extract_image_urls_single_quotes_and_bare() {
        let html = r#"<img src='https://example.com/sq.jpg'><img src=https://example.com/bare.jpg alt=x>"#;
        assert_eq!(
            extract_image_urls(html),
            vec![
                "https://example.com/sq.jpg".to_string(),
                "https://example.com/bare.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_image_urls_none() {
        assert!(extract_image_urls("<p>no images here</p>").is_empty());
        assert!(extract_image_urls("").is_empty());
    }

    #[test]
    fn test_find_attr_not_inside_other_attr() {
        let tag = r#"<img data-src="https://example.com/lazy.jpg""#;
        assert_eq!(find_attr(tag, "src"), None);
        assert_eq!(
            find_attr(tag, "data-src"),
            Some("https://example.com/lazy.jpg".to_string())
        );
    }
}
