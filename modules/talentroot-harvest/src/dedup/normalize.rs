//! Identity-field normalization feeding the fingerprint and the matchers.

use talentroot_common::identity_fingerprint;

/// Lowercase and trim. Gmail-style plus-suffixes are left alone; stripping
/// them merges distinct inboxes at some providers.
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_lowercase();
    if normalized.contains('@') {
        Some(normalized)
    } else {
        None
    }
}

/// Digits only, international prefixes collapsed ("+" and leading "00"
/// dropped). Too-short strings are rejected rather than matched on noise.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = digits.strip_prefix("00").unwrap_or(&digits).to_string();
    if digits.len() >= 7 {
        Some(digits)
    } else {
        None
    }
}

/// Lowercase, punctuation stripped, whitespace collapsed.
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fingerprint over the normalized identity triple.
pub fn fingerprint(
    normalized_email: Option<&str>,
    normalized_phone: Option<&str>,
    normalized_name: &str,
) -> String {
    identity_fingerprint(normalized_email, normalized_phone, normalized_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_case_and_whitespace_collapse() {
        assert_eq!(
            normalize_email("  Jane.Doe@Example.COM "),
            Some("jane.doe@example.com".to_string())
        );
        assert_eq!(normalize_email("not-an-email"), None);
    }

    #[test]
    fn phone_formats_converge() {
        assert_eq!(
            normalize_phone("+1 (555) 123-4567"),
            Some("15551234567".to_string())
        );
        assert_eq!(
            normalize_phone("0015551234567"),
            Some("15551234567".to_string())
        );
        assert_eq!(normalize_phone("x1234"), None);
    }

    #[test]
    fn name_punctuation_and_spacing() {
        assert_eq!(normalize_name("  Doe,  Jane-Marie "), "doe jane marie");
        assert_eq!(normalize_name("JANE DOE"), "jane doe");
    }

    #[test]
    fn same_identity_same_fingerprint() {
        let a = fingerprint(Some("a@x.com"), Some("15551234567"), "jane doe");
        let b = fingerprint(Some("a@x.com"), Some("15551234567"), "jane doe");
        assert_eq!(a, b);
        let c = fingerprint(Some("b@x.com"), Some("15551234567"), "jane doe");
        assert_ne!(a, c);
    }
}
