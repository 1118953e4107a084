//! Small text helpers shared by the context selector, validator and formatter

use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

/// Whitespace normalization and bounded previews
pub struct TextUtils;

impl TextUtils {
    /// Collapse runs of whitespace into a single space and trim the ends
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        let trimmed = text.trim();
        if trimmed.len() == text.len() && !trimmed.contains(|c: char| c.is_whitespace() && c != ' ')
            && !trimmed.contains("  ")
        {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(WHITESPACE_REGEX.replace_all(trimmed, " ").into_owned())
        }
    }

    /// Count whitespace-separated words
    pub fn count_words(text: &str) -> usize {
        text.split_whitespace().count()
    }

    /// First `max_chars` characters of `text`, never splitting a code point
    pub fn take_chars(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    /// Preview of at most `max_chars` characters followed by "..." when cut
    pub fn preview(text: &str, max_chars: usize) -> Cow<'_, str> {
        let head = Self::take_chars(text, max_chars);
        if head.len() == text.len() {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(format!("{}...", head))
        }
    }

    /// Truncate to `max_chars` characters total, ellipsis included
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            Cow::Borrowed(text)
        } else if max_chars <= 3 {
            Cow::Borrowed("...")
        } else {
            Cow::Owned(format!("{}...", Self::take_chars(text, max_chars - 3)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_keeps_short_text() {
        assert_eq!(TextUtils::preview("short", 200), "short");
    }

    #[test]
    fn test_preview_cuts_on_char_boundary() {
        let text = "ééééé";
        assert_eq!(TextUtils::preview(text, 2), "éé...");
    }

    #[test]
    fn test_truncate_with_ellipsis_counts_the_dots() {
        assert_eq!(TextUtils::truncate_with_ellipsis("abcdefghij", 6), "abc...");
        assert_eq!(TextUtils::truncate_with_ellipsis("abc", 6), "abc");
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(TextUtils::normalize_whitespace("  a \t b\n\nc "), "a b c");
        assert!(matches!(TextUtils::normalize_whitespace("a b"), Cow::Borrowed(_)));
    }
}
