//! Topic routing-key patterns.
//!
//! Routing keys are dot-separated words. In a binding pattern `*` matches
//! exactly one word and `#` matches zero or more words, so `ws_order.#`
//! matches `ws_order`, `ws_order.update` and `ws_order.update.v2`.

use std::fmt;

use crate::domain::foundation::ValidationError;

/// A validated topic binding pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingPattern(String);

impl RoutingPattern {
    /// Parses a binding pattern, rejecting empty patterns and empty words.
    pub fn parse(pattern: impl Into<String>) -> Result<Self, ValidationError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(ValidationError::empty_field("routing_key"));
        }
        if pattern.split('.').any(str::is_empty) {
            return Err(ValidationError::invalid_format(
                "routing_key",
                format!("'{}' contains an empty word", pattern),
            ));
        }
        Ok(Self(pattern))
    }

    /// Returns the pattern text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if `routing_key` is routed to a queue bound with this pattern.
    pub fn matches(&self, routing_key: &str) -> bool {
        let pattern: Vec<&str> = self.0.split('.').collect();
        let key: Vec<&str> = routing_key.split('.').collect();
        match_words(&pattern, &key)
    }
}

impl fmt::Display for RoutingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(p: &str) -> RoutingPattern {
        RoutingPattern::parse(p).unwrap()
    }

    #[test]
    fn literal_pattern_matches_only_itself() {
        let p = pattern("ws_order.update");
        assert!(p.matches("ws_order.update"));
        assert!(!p.matches("ws_order.cancel"));
        assert!(!p.matches("ws_order.update.v2"));
    }

    #[test]
    fn hash_matches_zero_or_more_words() {
        let p = pattern("ws_order.#");
        assert!(p.matches("ws_order"));
        assert!(p.matches("ws_order.update"));
        assert!(p.matches("ws_order.update.v2"));
        assert!(!p.matches("ws_trade.update"));
    }

    #[test]
    fn star_matches_exactly_one_word() {
        let p = pattern("ws_order.*");
        assert!(p.matches("ws_order.update"));
        assert!(!p.matches("ws_order"));
        assert!(!p.matches("ws_order.update.v2"));
    }

    #[test]
    fn wildcards_combine_in_the_middle_of_a_pattern() {
        let p = pattern("*.order.#");
        assert!(p.matches("eu.order"));
        assert!(p.matches("us.order.created.today"));
        assert!(!p.matches("order.created"));

        let p = pattern("#.done");
        assert!(p.matches("done"));
        assert!(p.matches("a.b.done"));
        assert!(!p.matches("a.b.done.x"));
    }

    #[test]
    fn bare_hash_matches_everything() {
        let p = pattern("#");
        assert!(p.matches("anything"));
        assert!(p.matches("a.b.c"));
    }

    #[test]
    fn parse_rejects_empty_pattern_and_empty_words() {
        assert!(RoutingPattern::parse("").is_err());
        assert!(RoutingPattern::parse("ws_order..update").is_err());
        assert!(RoutingPattern::parse(".ws_order").is_err());
    }
}
