//! Question sanitization applied before anything reaches a collaborator

use crate::utils::text_utils::TextUtils;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

lazy_static! {
    static ref SUSPICIOUS_PATTERNS: Vec<Regex> = [
        r"(?i);\s*DROP\s+",
        r"(?i);\s*DELETE\s+",
        r"(?i);\s*UPDATE\s+",
        r"(?i);\s*INSERT\s+",
        r"--\s*$",
        r"/\*.*\*/",
        r"(?i)'\s*OR\s+'1'\s*=\s*'1",
        r"(?i)'\s*OR\s+1\s*=\s*1",
        r"(?i)UNION\s+SELECT",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
}

/// Strip NUL bytes, trim, collapse whitespace and cap the length.
///
/// Returns `None` when nothing is left.
pub fn sanitize_question(raw: &str, max_chars: usize) -> Option<String> {
    let without_nul = raw.replace('\0', "");
    let normalized = TextUtils::normalize_whitespace(&without_nul);
    let bounded = TextUtils::take_chars(&normalized, max_chars).trim();
    if bounded.is_empty() {
        return None;
    }
    if let Some(pattern) = find_suspicious_pattern(bounded) {
        // The validator is the real gate; this is only an operator signal.
        warn!("Suspicious pattern in question, allowing: {}", pattern);
    }
    Some(bounded.to_string())
}

/// First injection-looking fragment in the text, if any
pub fn find_suspicious_pattern(text: &str) -> Option<String> {
    SUSPICIOUS_PATTERNS
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| TextUtils::take_chars(m.as_str(), 50).to_string())
}
