use crate::config::CaptionConfig;
use crate::post::PostReference;

/// Builds the caption sent with delivered media.
///
/// Lines in order: post text, canonical post URL, `@<bot name>`, each gated
/// by its flag. Returns `None` when nothing is enabled or available.
pub fn compose(
    flags: &CaptionConfig,
    text: Option<&str>,
    post: &PostReference,
    bot_name: Option<&str>,
) -> Option<String> {
    let mut lines = Vec::new();

    if flags.include_text {
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            lines.push(text.to_string());
        }
    }
    if flags.include_url {
        lines.push(post.to_string());
    }
    if flags.include_bot_name {
        if let Some(name) = bot_name.filter(|n| !n.is_empty()) {
            lines.push(format!("@{name}"));
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Message for a post that has text but no media. The text is always included.
pub fn text_only(
    flags: &CaptionConfig,
    text: &str,
    post: &PostReference,
    bot_name: Option<&str>,
) -> String {
    let flags = CaptionConfig {
        include_text: true,
        ..*flags
    };
    compose(&flags, Some(text), post, bot_name).unwrap_or_else(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> PostReference {
        PostReference::parse("https://x.com/dogs/status/42?s=20").unwrap()
    }

    fn flags(include_text: bool, include_url: bool, include_bot_name: bool) -> CaptionConfig {
        CaptionConfig {
            include_text,
            include_url,
            include_bot_name,
        }
    }

    #[test]
    fn test_nothing_enabled() {
        assert_eq!(compose(&flags(false, false, false), Some("hi"), &post(), Some("bot")), None);
    }

    #[test]
    fn test_all_lines_in_order() {
        let caption = compose(&flags(true, true, true), Some("good dog"), &post(), Some("grabber"));
        assert_eq!(
            caption.as_deref(),
            Some("good dog\nhttps://twitter.com/dogs/status/42\n@grabber")
        );
    }

    #[test]
    fn test_missing_parts_are_skipped() {
        assert_eq!(compose(&flags(true, false, true), None, &post(), None), None);
        assert_eq!(
            compose(&flags(true, true, false), Some(""), &post(), None).as_deref(),
            Some("https://twitter.com/dogs/status/42")
        );
    }

    #[test]
    fn test_text_only_always_has_text() {
        assert_eq!(text_only(&flags(false, false, false), "hello", &post(), None), "hello");
        assert_eq!(
            text_only(&flags(false, false, true), "hello", &post(), Some("grabber")),
            "hello\n@grabber"
        );
    }
}
