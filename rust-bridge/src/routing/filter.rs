//! Sender allow/block filtering for a candidate route.

use tracing::info;

use super::pattern::{first_match, matches};
use super::types::ResolvedFilters;

/// Outcome of evaluating a sender against a route's filters, naming the
/// rule that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// Sender matched a `blocked_senders` pattern
    BlockedSender(String),
    /// Sender's domain is listed in `blocked_domains`
    BlockedDomain(String),
    /// `allowed_senders` is the wildcard
    AllowAll,
    /// Sender matched an `allowed_senders` pattern
    AllowedSender(String),
    /// No `allowed_senders` pattern matched
    NotAllowed,
}

impl FilterDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FilterDecision::AllowAll | FilterDecision::AllowedSender(_))
    }

    /// Short rule label for logs.
    pub fn rule(&self) -> &'static str {
        match self {
            FilterDecision::BlockedSender(_) => "blocked_senders",
            FilterDecision::BlockedDomain(_) => "blocked_domains",
            FilterDecision::AllowAll => "allowed_senders_wildcard",
            FilterDecision::AllowedSender(_) => "allowed_senders",
            FilterDecision::NotAllowed => "allowed_senders_no_match",
        }
    }
}

/// Domain part of an address: everything after the last `@`, lowercased.
pub fn sender_domain(sender: &str) -> String {
    sender
        .rsplit('@')
        .next()
        .unwrap_or(sender)
        .trim()
        .to_lowercase()
}

/// Evaluate a sender against filters.
///
/// Order is fixed and the first decisive rule wins: blocked senders, then
/// blocked domains, then the allow-all wildcard, then allowed senders.
pub fn evaluate(sender: &str, filters: &ResolvedFilters) -> FilterDecision {
    let decision = if let Some(pattern) = first_match(sender, &filters.blocked_senders) {
        FilterDecision::BlockedSender(pattern.to_string())
    } else if let Some(domain) = blocked_domain(sender, &filters.blocked_domains) {
        FilterDecision::BlockedDomain(domain)
    } else if filters.allowed_senders.iter().any(|p| p.trim() == "*") {
        FilterDecision::AllowAll
    } else if let Some(pattern) = filters
        .allowed_senders
        .iter()
        .find(|p| matches(sender, p))
    {
        FilterDecision::AllowedSender(pattern.clone())
    } else {
        FilterDecision::NotAllowed
    };

    let matched = match &decision {
        FilterDecision::BlockedSender(p) | FilterDecision::AllowedSender(p) => Some(p.as_str()),
        FilterDecision::BlockedDomain(d) => Some(d.as_str()),
        FilterDecision::AllowAll => Some("*"),
        FilterDecision::NotAllowed => None,
    };

    info!(
        sender = %sender,
        accepted = decision.is_accepted(),
        rule = decision.rule(),
        matched = ?matched,
        "sender_filter_decision"
    );

    decision
}

/// Whether a sender passes the filters.
pub fn passes(sender: &str, filters: &ResolvedFilters) -> bool {
    evaluate(sender, filters).is_accepted()
}

fn blocked_domain(sender: &str, blocked: &[String]) -> Option<String> {
    let domain = sender_domain(sender);
    blocked
        .iter()
        .find(|d| d.trim().eq_ignore_ascii_case(&domain))
        .map(|d| d.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company_filters() -> ResolvedFilters {
        ResolvedFilters {
            max_size_mb: 5,
            allowed_senders: vec!["@trusted.com".to_string()],
            blocked_senders: vec!["noreply@*".to_string()],
            blocked_domains: vec!["spam.com".to_string()],
        }
    }

    #[test]
    fn test_sender_domain() {
        assert_eq!(sender_domain("User@Example.COM"), "example.com");
        assert_eq!(sender_domain("weird@name@host.org"), "host.org");
        assert_eq!(sender_domain("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn test_allowed_sender() {
        let decision = evaluate("user@trusted.com", &company_filters());
        assert_eq!(decision, FilterDecision::AllowedSender("@trusted.com".to_string()));
        assert!(decision.is_accepted());
    }

    #[test]
    fn test_blocked_sender_wins_over_allow() {
        let decision = evaluate("noreply@trusted.com", &company_filters());
        assert_eq!(decision, FilterDecision::BlockedSender("noreply@*".to_string()));
        assert!(!decision.is_accepted());
    }

    #[test]
    fn test_blocked_domain_is_case_insensitive() {
        let decision = evaluate("anyone@SPAM.com", &company_filters());
        assert_eq!(decision, FilterDecision::BlockedDomain("spam.com".to_string()));
    }

    #[test]
    fn test_blocked_domain_is_exact() {
        // sub.spam.com is not spam.com; it falls through to the allow list
        let decision = evaluate("anyone@sub.spam.com", &company_filters());
        assert_eq!(decision, FilterDecision::NotAllowed);
    }

    #[test]
    fn test_not_in_allow_list() {
        assert!(!passes("user@normal.com", &company_filters()));
    }

    #[test]
    fn test_wildcard_allows_everyone() {
        let filters = ResolvedFilters::default();
        assert_eq!(evaluate("anyone@anywhere.com", &filters), FilterDecision::AllowAll);
    }

    #[test]
    fn test_wildcard_still_honours_blocks() {
        let filters = ResolvedFilters {
            blocked_domains: vec!["spam.com".to_string()],
            ..ResolvedFilters::default()
        };
        assert!(!passes("anyone@spam.com", &filters));
        assert!(passes("anyone@ham.com", &filters));
    }

    #[test]
    fn test_empty_allow_list_rejects() {
        let filters = ResolvedFilters {
            allowed_senders: Vec::new(),
            ..ResolvedFilters::default()
        };
        assert_eq!(evaluate("user@trusted.com", &filters), FilterDecision::NotAllowed);
    }
}
