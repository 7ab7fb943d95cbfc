use regex::Regex;
use std::sync::OnceLock;

use crate::error::ValidationError;

fn markup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Comments, then tags. A lone '<' that never closes is kept as text.
        Regex::new(r"(?s)<!--.*?-->|</?[A-Za-z][^<>]*>").expect("static markup pattern")
    })
}

/// Strip HTML markup from user-populated text and reject content that is
/// empty afterwards.
///
/// Stripping repeats until nothing matches, so nested input such as
/// `<<b>b>` cannot reassemble a tag.
pub fn sanitize_content(raw: &str) -> Result<String, ValidationError> {
    let mut cleaned = raw.to_string();
    while markup_pattern().is_match(&cleaned) {
        cleaned = markup_pattern().replace_all(&cleaned, "").into_owned();
    }
    if cleaned.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    Ok(cleaned)
}

/// Normalize a prompt before it is handed to generation: drops every
/// non-ASCII character (which also covers ™ and ®) and turns `~` into `-`.
pub fn normalize_prompt(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii)
        .map(|c| if c == '~' { '-' } else { c })
        .collect()
}
