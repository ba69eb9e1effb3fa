//! Cache key naming.
//!
//! Rate limit state lives under `resource:identifier`, which operators may
//! rely on for manual inspection and reset. It is not a stable format.
//!
//! Both segments are escaped (`%` as `%25`, `:` as `%3A`), so a segment
//! never contains the separator and no identifier can name another
//! identifier's key.

use std::borrow::Cow;

use sha2::{Digest, Sha256};

/// Suffix for token bucket state, kept apart from the window sequence.
const BUCKET_SUFFIX: &str = "bucket";

/// Prefix for memoized moderation results. Rate limit keys never contain
/// `::` before a hex digest, so no resource can reach this namespace.
const MODERATION_PREFIX: &str = "moderation::";

/// Key for the sliding-window timestamp sequence.
pub fn window_key(resource: &str, identifier: &str) -> String {
    format!("{}:{}", segment(resource), segment(identifier))
}

/// Key for the token bucket state.
pub fn bucket_key(resource: &str, identifier: &str) -> String {
    format!("{}:{}:{BUCKET_SUFFIX}", segment(resource), segment(identifier))
}

/// Glob matching every key held for one resource.
pub fn resource_pattern(resource: &str) -> String {
    let mut pattern = String::with_capacity(resource.len() + 2);
    for c in segment(resource).chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str(":*");
    pattern
}

fn segment(raw: &str) -> Cow<'_, str> {
    if !raw.contains([':', '%']) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Key for a memoized moderation result.
///
/// Uses a SHA-256 prefix so the key is identical across processes sharing
/// a networked cache.
pub fn moderation_key(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{MODERATION_PREFIX}{}", hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_key_is_resource_then_identifier() {
        assert_eq!(window_key("generation", "user-1"), "generation:user-1");
    }

    #[test]
    fn bucket_key_differs_from_window_key() {
        assert_eq!(bucket_key("api_call", "u"), "api_call:u:bucket");
        assert_ne!(bucket_key("api_call", "u"), window_key("api_call", "u"));
    }

    #[test]
    fn separator_in_identifier_cannot_forge_a_bucket_key() {
        assert_eq!(window_key("api_call", "alice:bucket"), "api_call:alice%3Abucket");
        assert_ne!(
            window_key("api_call", "alice:bucket"),
            bucket_key("api_call", "alice")
        );
        assert_ne!(window_key("a:b", "c"), window_key("a", "b:c"));
        assert_ne!(window_key("x", "%3A"), window_key("x", ":"));
    }

    #[test]
    fn resource_pattern_escapes_glob_syntax() {
        assert_eq!(resource_pattern("generation"), "generation:*");
        assert_eq!(resource_pattern("a:b"), "a%3Ab:*");
        assert_eq!(resource_pattern("v[1]*"), "v\\[1\\]\\*:*");
    }

    #[test]
    fn moderation_key_is_deterministic() {
        assert_eq!(moderation_key("hello"), moderation_key("hello"));
        assert_ne!(moderation_key("hello"), moderation_key("world"));
        assert!(moderation_key("hello").starts_with(MODERATION_PREFIX));
        assert_eq!(moderation_key("hello").len(), MODERATION_PREFIX.len() + 32);
        assert_ne!(
            moderation_key("hello"),
            window_key("moderation", &moderation_key("hello")[MODERATION_PREFIX.len()..])
        );
    }
}
