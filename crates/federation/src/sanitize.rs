//! HTML sanitization for inbound federated content.
//!
//! Parser-based (ammonia / html5ever); regex never touches markup. The
//! policy is deliberately small: the tags a Mastodon- or Lemmy-compatible
//! peer legitimately produces, nothing more.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use ammonia::{Builder, UrlRelative};
use once_cell::sync::Lazy;

/// Tags preserved in remote content.
const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "hr", "h1", "h2", "h3", "h4", "h5", "h6", "em", "strong", "del", "code", "pre",
    "blockquote", "ul", "ol", "li", "span", "a",
];

/// Tags removed together with their contents.
const STRIP_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "form", "input", "textarea", "svg", "math",
];

/// `span` classes that survive sanitization (microformat / mention markup).
const ALLOWED_SPAN_CLASSES: &[&str] = &["h-card", "hashtag", "mention", "invisible"];

/// Maximum stored display-name length.
const MAX_DISPLAY_NAME_LEN: usize = 100;

static SANITIZER: Lazy<Builder<'static>> = Lazy::new(|| {
    let mut builder = Builder::default();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect::<HashSet<_>>())
        .clean_content_tags(STRIP_WITH_CONTENT.iter().copied().collect::<HashSet<_>>())
        .generic_attributes(HashSet::new())
        .tag_attributes(HashMap::from([
            ("a", HashSet::from(["href"])),
            ("span", HashSet::from(["class"])),
        ]))
        .url_schemes(HashSet::from(["http", "https"]))
        .url_relative(UrlRelative::PassThrough)
        .link_rel(Some("nofollow noopener noreferrer"))
        .attribute_filter(|element, attribute, value| {
            if element == "span" && attribute == "class" {
                let kept = value
                    .split_whitespace()
                    .filter(|class| ALLOWED_SPAN_CLASSES.contains(class))
                    .collect::<Vec<_>>()
                    .join(" ");
                if kept.is_empty() {
                    None
                } else {
                    Some(Cow::Owned(kept))
                }
            } else {
                Some(Cow::Borrowed(value))
            }
        });
    builder
});

/// Sanitize remote HTML content for storage and display.
#[must_use]
pub fn sanitize_html(input: &str) -> String {
    SANITIZER.clean(input).to_string()
}

/// Reduce a remote display name to plain text: tags removed, control
/// characters dropped, trimmed, capped at 100 characters.
#[must_use]
pub fn sanitize_display_name(input: &str) -> String {
    let mut text = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if in_tag || c.is_control() => {}
            c => text.push(c),
        }
    }
    text.trim().chars().take(MAX_DISPLAY_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_basic_formatting() {
        let out = sanitize_html("<p>Hello <strong>world</strong></p>");
        assert_eq!(out, "<p>Hello <strong>world</strong></p>");
    }

    #[test]
    fn test_script_stripped_with_content() {
        let out = sanitize_html("before<script>alert(1)</script>after");
        assert!(!out.contains("script"));
        assert!(!out.contains("alert"));
        assert_eq!(out, "beforeafter");
    }

    #[test]
    fn test_iframe_and_form_stripped_with_content() {
        let out = sanitize_html("<iframe src=\"https://evil.ex\">x</iframe><form>y</form>ok");
        assert!(!out.contains("iframe"));
        assert!(!out.contains("form"));
        assert_eq!(out, "ok");
    }

    #[test]
    fn test_unknown_tags_unwrapped() {
        let out = sanitize_html("<article><p>text</p></article>");
        assert_eq!(out, "<p>text</p>");
    }

    #[test]
    fn test_links_get_rel_and_keep_href() {
        let out = sanitize_html(r#"<a href="https://r.ex/x">link</a>"#);
        assert!(out.contains(r#"href="https://r.ex/x""#));
        assert!(out.contains(r#"rel="nofollow noopener noreferrer""#));
    }

    #[test]
    fn test_javascript_and_data_urls_dropped() {
        let out = sanitize_html(r#"<a href="javascript:alert(1)">x</a>"#);
        assert!(!out.contains("javascript:"));

        let out = sanitize_html(r#"<a href="data:text/html;base64,x">x</a>"#);
        assert!(!out.contains("data:"));
    }

    #[test]
    fn test_event_handlers_dropped() {
        let out = sanitize_html(r#"<p onclick="alert(1)" onerror="x">text</p>"#);
        assert!(!out.contains("onclick"));
        assert!(!out.contains("onerror"));
        assert_eq!(out, "<p>text</p>");
    }

    #[test]
    fn test_span_class_intersection() {
        let out = sanitize_html(r#"<span class="h-card sparkle mention">x</span>"#);
        assert!(out.contains("h-card"));
        assert!(out.contains("mention"));
        assert!(!out.contains("sparkle"));

        let out = sanitize_html(r#"<span class="sparkle">x</span>"#);
        assert_eq!(out, "<span>x</span>");
    }

    #[test]
    fn test_mastodon_mention_markup_survives() {
        let input = concat!(
            r#"<p><span class="h-card"><a href="https://r.ex/@alice" class="u-url mention">"#,
            r#"@<span>alice</span></a></span> hi</p>"#,
        );
        let out = sanitize_html(input);
        assert!(out.contains(r#"<span class="h-card">"#));
        assert!(out.contains("@<span>alice</span>"));
        // class on <a> is not an allowed attribute
        assert!(!out.contains("u-url"));
    }

    #[test]
    fn test_display_name_stripped_and_capped() {
        assert_eq!(sanitize_display_name("  <b>Alice</b>\u{0} \r\n "), "Alice");

        let long = "x".repeat(500);
        assert_eq!(sanitize_display_name(&long).chars().count(), 100);
    }
}
