//! Markup and text normalization applied around parsing.
//!
//! Old table-layout sites wrap almost every label and link in `<font>`, `<b>`
//! and friends. Stripping those before parsing keeps link and field
//! boundaries at the level where the form builder and label matching expect
//! them.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Pure text-formatting tags. Removed before parsing and looked through when
/// computing an element's associated text.
pub const FORMATTING_TAGS: &[&str] = &[
    "basefont", "font", "b", "i", "s", "strike", "u", "blink", "small", "big", "sub", "sup",
    "center", "marquee",
];

const NBSP: char = '\u{a0}';

pub fn is_formatting_tag(tag: &str) -> bool {
    FORMATTING_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

/// Any opening or closing formatting tag. Quoted attribute values may hold `>`.
#[allow(clippy::expect_used)]
static FORMATTING_TAG: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r#"(?i)</?(?:{})\b(?:"[^"]*"|'[^']*'|[^'">])*>"#,
        FORMATTING_TAGS.join("|")
    );
    Regex::new(&pattern).expect("formatting tag pattern is valid")
});

/// Remove every opening and closing formatting tag, keeping their content.
///
/// Matching is case-insensitive and ignores attributes (`<FONT face=arial>`).
/// A removal can splice a new tag together (`<<b>b>`), so passes repeat until
/// nothing changes; the result is a fixpoint. Unterminated tags are left alone.
pub fn strip_formatting_tags(markup: &str) -> String {
    let mut current = FORMATTING_TAG.replace_all(markup, "").into_owned();
    loop {
        match FORMATTING_TAG.replace_all(&current, "") {
            Cow::Borrowed(_) => return current,
            Cow::Owned(next) => current = next,
        }
    }
}

/// Trim surrounding whitespace (CR/LF included) and drop every non-breaking space.
pub fn clean(text: &str) -> String {
    let without_nbsp: String = text.chars().filter(|&c| c != NBSP).collect();
    without_nbsp.trim().to_string()
}
