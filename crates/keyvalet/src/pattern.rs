//! Glob matching for user/host selectors.
//!
//! Credential records select their targets with glob patterns (`*`, `?`,
//! character classes). The values being matched are usernames and
//! hostnames, not filesystem paths, so path-separator and hidden-file
//! special cases are explicitly disabled: `*` matches any value including
//! the empty string and strings containing `/` or `.`.

use glob::{MatchOptions, Pattern};

/// Match options with all filesystem-specific behavior turned off.
const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Return `true` if `value` matches the glob `pattern`.
///
/// A syntactically invalid pattern matches nothing. A literal pattern
/// (no wildcards) matches only the identical string. The empty pattern
/// matches only the empty value.
pub fn matches(pattern: &str, value: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(value, OPTIONS),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_anything() {
        assert!(matches("*", "prod.internal.example"));
        assert!(matches("*", "deploy"));
        assert!(matches("*", ""));
    }

    #[test]
    fn test_literal_matches_only_itself() {
        assert!(matches("prod.example", "prod.example"));
        assert!(!matches("prod.example", "prod.example2"));
        assert!(!matches("prod.example", "aprod.example"));
        assert!(!matches("prod.example", ""));
    }

    #[test]
    fn test_prefix_and_suffix_wildcards() {
        assert!(matches("*.internal.example", "prod.internal.example"));
        assert!(matches("*.internal.example", "a.b.internal.example"));
        assert!(!matches("*.internal.example", "internal.example"));
        assert!(matches("prod.*", "prod.example"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("web?", "web1"));
        assert!(matches("web?", "webX"));
        assert!(!matches("web?", "web"));
        assert!(!matches("web?", "web10"));
    }

    #[test]
    fn test_character_class() {
        assert!(matches("web[0-9]", "web3"));
        assert!(!matches("web[0-9]", "webx"));
        assert!(matches("web[!0-9]", "webx"));
    }

    #[test]
    fn test_empty_value_matches_star_or_empty_pattern() {
        assert!(matches("*", ""));
        assert!(matches("", ""));
        assert!(!matches("?", ""));
        assert!(!matches("deploy", ""));
    }

    #[test]
    fn test_separators_are_not_special() {
        // User/host strings are not paths; `*` must cross `/` and dots.
        assert!(matches("*", "a/b"));
        assert!(matches("*", ".hidden"));
        assert!(matches("*example", "x/y.example"));
    }

    #[test]
    fn test_invalid_pattern_matches_nothing() {
        assert!(!matches("[unclosed", "anything"));
        assert!(!matches("[unclosed", "[unclosed"));
    }

    #[test]
    fn test_case_sensitive() {
        assert!(!matches("Deploy", "deploy"));
        assert!(matches("deploy", "deploy"));
    }
}
