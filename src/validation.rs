// Stateless form checks and label formatting

use regex::Regex;
use std::fmt::Display;
use std::sync::LazyLock;

/// Maximum length Discord accepts for a button label
pub const BUTTON_LABEL_MAX: usize = 80;

const ELLIPSIS: &str = "...";

static PASSPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("passport pattern is valid"));

/// A passport number (StaticID) is one or more ASCII digits once surrounding
/// whitespace is trimmed.
pub fn is_valid_passport(value: &str) -> bool {
    let trimmed = value.trim();
    // `\d` is Unicode-aware in `regex`; StaticIDs are ASCII only.
    trimmed.is_ascii() && PASSPORT.is_match(trimmed)
}

/// Ordinal rank wording used in audit actions, e.g. `Повышение на 2-й ранг`.
///
/// Range checks (1..=99) belong to the form or command that collected the rank.
pub fn rank_word(rank: impl Display) -> String {
    let rank = rank.to_string();
    match rank.as_str() {
        "1" => "1-й".to_string(),
        "2" => "2-й".to_string(),
        "3" => "3-й".to_string(),
        other => format!("{other}-й"),
    }
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate_label(text: &str, max: usize) -> String {
    let length = text.chars().count();
    if length <= max {
        return text.to_string();
    }
    if max < ELLIPSIS.len() {
        return ELLIPSIS.chars().take(max).collect();
    }
    let mut out: String = text.chars().take(max - ELLIPSIS.len()).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Button-sized variant of [`truncate_label`]
pub fn button_label(text: &str) -> String {
    truncate_label(text, BUTTON_LABEL_MAX)
}
