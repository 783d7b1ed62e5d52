//! Glob matching of email addresses against routing patterns.

use glob::{MatchOptions, Pattern};
use tracing::warn;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Match an email address against a shell-style pattern.
///
/// `*` matches any run of characters (including none) and `?` matches a
/// single character; comparison ignores ASCII case. A pattern starting with
/// `@` is a domain shorthand, so `@trusted.com` behaves like `*@trusted.com`.
///
/// Malformed patterns never match. The failure is logged and swallowed.
pub fn matches(address: &str, pattern: &str) -> bool {
    let expanded = expand_pattern(pattern);

    match Pattern::new(&expanded) {
        Ok(compiled) => compiled.matches_with(address.trim(), MATCH_OPTIONS),
        Err(e) => {
            warn!(
                pattern = %pattern,
                error = %e,
                "pattern_invalid"
            );
            false
        }
    }
}

/// Return the first pattern in `patterns` that matches `address`.
pub fn first_match<'a>(address: &str, patterns: &'a [String]) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| matches(address, p))
        .map(String::as_str)
}

/// Apply the `@domain` shorthand and collapse runs of `*`, which `glob`
/// only accepts as a whole path component.
fn expand_pattern(pattern: &str) -> String {
    let trimmed = pattern.trim();
    let mut expanded = String::with_capacity(trimmed.len() + 1);
    if trimmed.starts_with('@') {
        expanded.push('*');
    }

    for c in trimmed.chars() {
        if c == '*' && expanded.ends_with('*') {
            continue;
        }
        expanded.push(c);
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_is_case_insensitive() {
        assert!(matches("USER@Example.com", "*@example.com"));
        assert!(matches("user@example.com", "*@EXAMPLE.COM"));
    }

    #[test]
    fn test_star_matches_empty_run() {
        assert!(matches("@example.com", "*@example.com"));
        assert!(matches("contact@company.org", "contact*@company.org"));
    }

    #[test]
    fn test_question_mark_matches_single_char() {
        assert!(matches("a1@example.com", "a?@example.com"));
        assert!(!matches("a12@example.com", "a?@example.com"));
    }

    #[test]
    fn test_exact_pattern() {
        assert!(matches("webhook@example.com", "webhook@example.com"));
        assert!(!matches("other@example.com", "webhook@example.com"));
    }

    #[test]
    fn test_domain_shorthand() {
        assert!(matches("user@trusted.com", "@trusted.com"));
        assert!(!matches("user@untrusted.com", "@trusted.com"));
    }

    #[test]
    fn test_prefix_wildcard() {
        assert!(matches("noreply@anywhere.com", "noreply@*"));
        assert!(!matches("reply@anywhere.com", "noreply@*"));
    }

    #[test]
    fn test_malformed_pattern_is_non_match() {
        assert!(!matches("user@example.com", "user@[example.com"));
    }

    #[test]
    fn test_repeated_stars_act_as_one() {
        assert!(matches("aXb@example.com", "a**b@example.com"));
        assert!(matches("ab@example.com", "a**b@example.com"));
        assert!(matches("user@example.com", "**@example.com"));
        assert!(matches("user@example.com", "@**example.com"));
        assert!(!matches("user@other.com", "**@example.com"));
    }

    #[test]
    fn test_first_match() {
        let patterns = vec![
            "support@company.org".to_string(),
            "*@company.org".to_string(),
        ];
        assert_eq!(first_match("sales@company.org", &patterns), Some("*@company.org"));
        assert_eq!(first_match("support@company.org", &patterns), Some("support@company.org"));
        assert_eq!(first_match("user@other.org", &patterns), None);
    }
}
