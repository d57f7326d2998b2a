//! Deterministic content fingerprint used as the deduplication key.

use std::fmt::{self, Display};

const FINGERPRINT_HEX_LEN: usize = 32;

/// 128-bit digest rendered as 32 lowercase hex characters, safe to embed in a
/// search query and in a custom field value.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn of(input: &str) -> Self {
        let hash = blake3::hash(input.as_bytes());
        let hex = hash.to_hex();
        Self(hex[..FINGERPRINT_HEX_LEN].to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Fingerprint;

    #[test]
    fn same_input_same_fingerprint() {
        let input = "System.NullReferenceException: Object reference not set";
        assert_eq!(Fingerprint::of(input), Fingerprint::of(input));
    }

    #[test]
    fn different_input_different_fingerprint() {
        assert_ne!(
            Fingerprint::of("Disk C: is full"),
            Fingerprint::of("Disk D: is full")
        );
    }

    #[test]
    fn empty_input_is_hashed() {
        let fp = Fingerprint::of("");
        assert_eq!(fp, Fingerprint::of(""));
        assert_eq!(fp.as_str().len(), 32);
    }

    #[test]
    fn fingerprint_is_32_lowercase_hex_chars() {
        let fp = Fingerprint::of("boom");
        assert_eq!(fp.as_str().len(), 32);
        assert!(
            fp.as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }
}
