//! Glob-style key patterns for the memory layer.
//!
//! The external store handles patterns natively; memory-layer invalidation
//! translates the same `*` globs into an anchored regex.

use regex::Regex;

pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => translated.push_str(".*"),
            ch => translated.push_str(&regex::escape(&ch.to_string())),
        }
    }
    translated.push('$');
    Regex::new(&translated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run() {
        let re = glob_to_regex("units:*").expect("valid pattern");
        assert!(re.is_match("units:all"));
        assert!(re.is_match("units:123:detail"));
        assert!(!re.is_match("reports:units:all"));
    }

    #[test]
    fn literal_metacharacters_are_escaped() {
        let re = glob_to_regex("report.daily:*").expect("valid pattern");
        assert!(re.is_match("report.daily:2026-01-01"));
        assert!(!re.is_match("reportXdaily:2026-01-01"));
    }

    #[test]
    fn pattern_without_star_is_exact() {
        let re = glob_to_regex("units:all").expect("valid pattern");
        assert!(re.is_match("units:all"));
        assert!(!re.is_match("units:all:v2"));
    }
}
