use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").unwrap());
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\+|\b)\d(?:[\s.-]?\d){6,15}\b").unwrap());
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:https?://|www\.)\S+").unwrap());
static HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^\w])@[A-Za-z0-9_]{2,}").unwrap());

/// Best-effort removal of contact details before text leaves the process.
/// Emails go first so their `@` is not mistaken for a handle.
pub fn scrub_pii(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = EMAIL_RE.replace_all(text, "[redacted-email]");
    let text = PHONE_RE.replace_all(&text, "[redacted-phone]");
    let text = URL_RE.replace_all(&text, "[redacted-url]");
    let text = HANDLE_RE.replace_all(&text, "${1}[redacted-handle]");
    text.into_owned()
}

/// Hex SHA-256 of the trimmed text, used to spot reposted content.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_contact_details() {
        let text = "Email me at jane.doe@example.com or call +1 555-123-4567, see https://example.com/x and ping @jane_d";
        let scrubbed = scrub_pii(text);
        assert!(scrubbed.contains("[redacted-email]"));
        assert!(scrubbed.contains("[redacted-phone]"));
        assert!(scrubbed.contains("[redacted-url]"));
        assert!(scrubbed.contains("ping [redacted-handle]"));
        assert!(!scrubbed.contains("example.com"));
        assert!(!scrubbed.contains("jane_d"));
    }

    #[test]
    fn leaves_ordinary_text_alone() {
        let text = "My 2 yo fell off the couch at 18 months, ER visit on 3/14";
        assert_eq!(scrub_pii(text), text);
        assert_eq!(scrub_pii(""), "");
    }

    #[test]
    fn hash_ignores_surrounding_whitespace() {
        assert_eq!(content_hash("  title\nbody \n"), content_hash("title\nbody"));
        assert_eq!(content_hash("abc").len(), 64);
    }
}
