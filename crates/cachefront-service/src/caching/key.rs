use std::fmt;

/// Reserved namespace suffix for in-flight markers.
///
/// Marker keys live in `{namespace}!inflight:` while value keys live in
/// `{namespace}:`. The namespace itself may contain neither `:` nor `!`
/// (enforced by config validation), so the two key spaces are disjoint.
const MARKER_NAMESPACE: &str = "!inflight";

/// Reserved namespace suffix for dedup event keys.
///
/// Dedup events live in `{namespace}!dedup:`, disjoint from both value keys
/// and marker keys for the same reason as above.
const DEDUP_NAMESPACE: &str = "!dedup";

/// A fully namespaced key as written to the store.
///
/// There is no way to construct one from a raw string without a namespace;
/// namespacing is mandatory and never bypassed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    full: String,
    /// Byte length of the namespace part of `full`.
    namespace_len: usize,
}

impl CacheKey {
    /// Builds the key `{namespace}:{logical}`.
    pub fn new(namespace: &str, logical: &str) -> Self {
        debug_assert!(!namespace.is_empty());
        debug_assert!(!namespace.contains([':', '!']));
        CacheKey {
            full: format!("{namespace}:{logical}"),
            namespace_len: namespace.len(),
        }
    }

    /// Builds the key recording a dedup event, in its own reserved key space.
    ///
    /// A cache request for the logical key `dedup:{event}` must not read or
    /// shadow the event's token, so dedup never shares the value key space.
    pub fn dedup(namespace: &str, event: &str) -> Self {
        debug_assert!(!namespace.is_empty());
        debug_assert!(!namespace.contains([':', '!']));
        CacheKey {
            full: format!("{namespace}{DEDUP_NAMESPACE}:{event}"),
            namespace_len: namespace.len() + DEDUP_NAMESPACE.len(),
        }
    }

    /// The key of the in-flight marker belonging to this value key.
    pub fn marker(&self) -> CacheKey {
        let (namespace, rest) = self.full.split_at(self.namespace_len);
        let full = format!("{namespace}{MARKER_NAMESPACE}{rest}");
        CacheKey {
            namespace_len: namespace.len() + MARKER_NAMESPACE.len(),
            full,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespacing() {
        let key = CacheKey::new("svc", "user:42");
        assert_eq!(key.as_str(), "svc:user:42");
        assert_eq!(key.to_string(), "svc:user:42");
    }

    #[test]
    fn test_marker_is_disjoint() {
        let key = CacheKey::new("svc", "user:42");
        let marker = key.marker();
        assert_eq!(marker.as_str(), "svc!inflight:user:42");
        assert_ne!(key, marker);

        // No logical key can alias a marker, because `!` never appears in a
        // namespace and the marker namespace is derived, not user supplied.
        let tricky = CacheKey::new("svc", "!inflight:user:42");
        assert_ne!(tricky, marker);
    }

    #[test]
    fn test_dedup_is_disjoint() {
        let dedup = CacheKey::dedup("svc", "evt-1");
        assert_eq!(dedup.as_str(), "svc!dedup:evt-1");

        // Neither a value key nor a marker can alias an event key.
        assert_ne!(dedup, CacheKey::new("svc", "dedup:evt-1"));
        assert_ne!(dedup, CacheKey::new("svc", "evt-1"));
        assert_ne!(dedup, CacheKey::new("svc", "evt-1").marker());
    }
}
