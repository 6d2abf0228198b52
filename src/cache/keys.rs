use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::CacheCategory;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Derive a cache key from the semantic parameters of a request.
///
/// Parameters are lower-cased and whitespace-collapsed before hashing so
/// that identical logical requests collide. The category and subject scope
/// are kept readable in the key prefix; subject-scoped and unscoped keys
/// can therefore never collide, and subject invalidation is a scan for the
/// `:{subject}:` fragment.
pub fn cache_key(category: CacheCategory, subject: Option<&str>, parts: &[&str]) -> String {
    let normalized: Vec<String> = parts.iter().map(|p| normalize(p)).collect();
    let digest = Sha256::digest(normalized.join("|").as_bytes());
    let digest_hex = hex_prefix(digest.as_slice(), 16);

    match subject {
        Some(subject) => format!("{}:{}:{}", category.as_str(), normalize(subject), digest_hex),
        None => format!("{}:global:{}", category.as_str(), digest_hex),
    }
}

/// Key fragment matching every entry scoped to `subject`, across categories.
pub fn subject_fragment(subject: &str) -> String {
    format!(":{}:", normalize(subject))
}

/// Extract the subject scope embedded in a derived key, if any.
pub fn subject_of(key: &str) -> Option<&str> {
    let scope = key.split(':').nth(1)?;
    if scope == "global" || scope.is_empty() {
        None
    } else {
        Some(scope)
    }
}

fn normalize(input: &str) -> String {
    WHITESPACE.replace_all(input.trim(), " ").to_lowercase()
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .take(len / 2)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_logical_requests_collide() {
        let a = cache_key(
            CacheCategory::PropertyData,
            Some("u1"),
            &["123 Main St", "Austin", "TX"],
        );
        let b = cache_key(
            CacheCategory::PropertyData,
            Some("u1"),
            &["  123  MAIN st ", "austin", "tx"],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn different_subjects_never_collide() {
        let a = cache_key(CacheCategory::PropertyData, Some("u1"), &["123 Main St"]);
        let b = cache_key(CacheCategory::PropertyData, Some("u2"), &["123 Main St"]);
        let unscoped = cache_key(CacheCategory::PropertyData, None, &["123 Main St"]);
        assert_ne!(a, b);
        assert_ne!(a, unscoped);
        assert_ne!(b, unscoped);
    }

    #[test]
    fn different_params_never_collide() {
        let a = cache_key(CacheCategory::PropertyData, Some("u1"), &["123 Main St"]);
        let b = cache_key(CacheCategory::PropertyData, Some("u1"), &["124 Main St"]);
        assert_ne!(a, b);
    }

    #[test]
    fn subject_scope_round_trips() {
        let scoped = cache_key(CacheCategory::PropertyData, Some("U1"), &["123 Main St"]);
        assert_eq!(subject_of(&scoped), Some("u1"));
        let unscoped = cache_key(CacheCategory::PropertyData, None, &["123 Main St"]);
        assert_eq!(subject_of(&unscoped), None);
    }

    #[test]
    fn subject_fragment_matches_scoped_keys_only() {
        let scoped = cache_key(CacheCategory::PropertyData, Some("u1"), &["123 Main St"]);
        let other = cache_key(CacheCategory::PropertyData, Some("u10"), &["123 Main St"]);
        let fragment = subject_fragment("u1");
        assert!(scoped.contains(&fragment));
        assert!(!other.contains(&fragment));
    }
}
