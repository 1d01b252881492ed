//! Resource naming grammar and unique-name generation.
//!
//! Most compute resources accept RFC 1035 labels; project identifiers allow a
//! wider grammar (dots, colons for domain-scoped projects). Real names sent to
//! the API get a run-scoped suffix appended so repeated runs never collide,
//! truncated to the per-kind length limit with the trailing dash rule intact.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

/// RFC 1035 label grammar used by most compute resource names.
pub static RFC1035_RGX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").expect("static regex"));

/// Project identifier grammar (allows dots and domain-scoped colons).
pub static PROJECT_RGX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]([-.:a-z0-9]*[a-z0-9])?$").expect("static regex"));

/// Maximum length for most resource names.
pub const MAX_NAME_LEN: usize = 63;

/// Alphabet for generated suffixes; starts with a letter-only pool so any
/// truncation point stays inside the name grammar.
const SUFFIX_ALPHABET: &[u8] = b"bdghjlmnpqrstvwxyz0123456789";

/// Whether `name` is a valid RFC 1035 label of acceptable length.
pub fn is_rfc1035_label(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && RFC1035_RGX.is_match(name)
}

/// Whether `project` is a plausible project identifier.
pub fn is_valid_project_id(project: &str) -> bool {
    !project.is_empty() && PROJECT_RGX.is_match(project)
}

/// Generate a random lowercase suffix of `len` characters.
pub fn rand_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..SUFFIX_ALPHABET.len());
            SUFFIX_ALPHABET[idx] as char
        })
        .collect()
}

/// Append a run-id suffix to `name`, truncating the result to
/// [`MAX_NAME_LEN`] and never ending on a dash.
pub fn suffixed_name(name: &str, run_id: &str) -> String {
    let mut combined = format!("{name}-{run_id}");
    if combined.len() > MAX_NAME_LEN {
        combined.truncate(MAX_NAME_LEN);
    }
    while combined.ends_with('-') {
        combined.pop();
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1035_accepts_plain_labels() {
        assert!(is_rfc1035_label("disk-1"));
        assert!(is_rfc1035_label("a"));
        assert!(is_rfc1035_label("x2"));
    }

    #[test]
    fn rfc1035_rejects_bad_shapes() {
        assert!(!is_rfc1035_label(""));
        assert!(!is_rfc1035_label("1disk"));
        assert!(!is_rfc1035_label("disk-"));
        assert!(!is_rfc1035_label("Disk"));
        assert!(!is_rfc1035_label(&"a".repeat(64)));
    }

    #[test]
    fn project_grammar_allows_domain_scoping() {
        assert!(is_valid_project_id("my-project"));
        assert!(is_valid_project_id("example.com:my-project"));
        assert!(!is_valid_project_id("-bad"));
    }

    #[test]
    fn suffixed_name_truncates_without_trailing_dash() {
        let long = "a".repeat(62);
        let name = suffixed_name(&long, "abcde");
        assert_eq!(name.len(), MAX_NAME_LEN - 1, "dash at the limit must be dropped: {name}");
        assert!(!name.ends_with('-'));
        assert!(name.starts_with(&long));
    }

    #[test]
    fn suffixed_name_appends_run_id() {
        assert_eq!(suffixed_name("disk", "q4zrp"), "disk-q4zrp");
    }

    #[test]
    fn rand_suffix_stays_in_alphabet() {
        let suffix = rand_suffix(16);
        assert_eq!(suffix.len(), 16);
        assert!(suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)));
    }
}
