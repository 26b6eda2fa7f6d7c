//! Fuzz tests for deeplink construction helpers

use proptest::prelude::*;
use wallet_broker_core::links::{percent_encode_chars, strip_query};

/// Subsets of the characters wallets list in their `encoding` string
fn encoding_strategy() -> impl Strategy<Value = String> {
    prop::sample::subsequence(vec![':', '/', '?', '&', '=', '@'], 0..=6)
        .prop_map(|chars| chars.into_iter().collect())
}

proptest! {
    /// Every listed character is escaped and nothing else changes
    #[test]
    fn encodes_exactly_the_listed_chars(input in "[a-z0-9:/?&=@.]{0,40}", chars in encoding_strategy()) {
        let encoded = percent_encode_chars(&input, &chars);
        let escaped = input.chars().filter(|c| chars.contains(*c)).count();

        prop_assert!(!encoded.chars().any(|c| chars.contains(c)));
        prop_assert_eq!(encoded.len(), input.len() + 2 * escaped);
        if chars.is_empty() {
            prop_assert_eq!(encoded, input);
        }
    }

    /// The stripped URI is the part before the first `?`
    #[test]
    fn strip_query_keeps_prefix(head in "wc:[a-f0-9-]{1,36}@[12]", tail in "[a-z=&]{0,20}") {
        let uri = format!("{head}?{tail}");
        prop_assert_eq!(strip_query(&uri), head.as_str());
        prop_assert_eq!(strip_query(&head), head.as_str());
    }
}
