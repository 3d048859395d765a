/// Content hash of a release: MD5 over `"{source_url}::{normalized_title}"`.
///
/// A missing URL hashes as the empty string, so URL-less releases with the
/// same key collide with each other.
pub fn fingerprint(source_url: Option<&str>, normalized_title: &str) -> String {
    let material = format!("{}::{}", source_url.unwrap_or(""), normalized_title);
    format!("{:x}", md5::compute(material.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::normalize::normalize_title;

    #[test]
    fn test_known_digest() {
        assert_eq!(fingerprint(None, ""), format!("{:x}", md5::compute(b"::")));
        assert_eq!(fingerprint(None, "").len(), 32);
    }

    #[test]
    fn test_stable_across_calls() {
        let key = normalize_title("Stitch Plush");
        let a = fingerprint(Some("https://x/a"), &key);
        let b = fingerprint(Some("https://x/a"), &key);
        assert_eq!(a, b);
    }

    #[test]
    fn test_changes_with_either_input() {
        let base = fingerprint(Some("https://x/a"), "stitch-plush");
        assert_ne!(base, fingerprint(Some("https://x/b"), "stitch-plush"));
        assert_ne!(base, fingerprint(Some("https://x/a"), "stitch-ears"));
    }

    #[test]
    fn test_missing_url_equals_empty_url() {
        assert_eq!(
            fingerprint(None, "stitch-plush"),
            fingerprint(Some(""), "stitch-plush")
        );
    }

    #[test]
    fn test_url_is_not_trimmed() {
        assert_ne!(
            fingerprint(Some("https://x/a "), "stitch-plush"),
            fingerprint(Some("https://x/a"), "stitch-plush")
        );
    }

    #[test]
    fn test_equal_keys_collide_across_title_spellings() {
        assert_eq!(
            fingerprint(Some("https://x/a"), &normalize_title("Stitch Plush")),
            fingerprint(Some("https://x/a"), &normalize_title("STITCH   plush!!"))
        );
    }
}
