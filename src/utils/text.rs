// src/utils/text.rs

//! Text normalization helpers shared by the extraction strategies.

use std::sync::LazyLock;

use regex::Regex;

/// Separators between visual lines inside a rendered card: bullets,
/// newlines, or runs of two-plus spaces left over from inline elements.
static LINE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[•\n\r]+| {2,}").expect("line separator regex"));

/// Collapse all whitespace runs into single spaces and trim.
pub fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a card's flattened text into normalized, non-empty lines.
pub fn split_card_lines(text: &str) -> Vec<String> {
    LINE_SEPARATORS
        .split(text)
        .map(normalize_space)
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_space() {
        assert_eq!(normalize_space("  a \t b\n c  "), "a b c");
        assert_eq!(normalize_space(""), "");
    }

    #[test]
    fn test_split_card_lines() {
        let lines = split_card_lines("Titel  •  € 900 • 1190 Wien\n50 m²");
        assert_eq!(lines, vec!["Titel", "€ 900", "1190 Wien", "50 m²"]);
    }

    #[test]
    fn test_split_card_lines_drops_empty() {
        assert!(split_card_lines(" •  • ").is_empty());
    }
}
