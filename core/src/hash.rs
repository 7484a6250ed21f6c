//! Stable 64-bit content hashes, rendered as 16 lowercase hex digits.
//!
//! Template ids, workflow pattern ids and L1 prefix hashes must agree across
//! processes and releases, so they are derived from SHA-1 rather than any
//! process-seeded hasher.

use sha1::Digest;
use sha1::Sha1;

/// Field separator for multi-part hashes; cannot occur in command text.
const UNIT_SEP: u8 = 0x1f;

/// Hex of the first 8 digest bytes of `input`.
pub fn stable_hex64(input: &str) -> String {
    let digest = Sha1::digest(input.as_bytes());
    hex16(&digest[..8])
}

/// Hash of several fields with an unambiguous separator, so that
/// `("ab", "c")` and `("a", "bc")` produce different ids.
pub fn stable_hex64_parts(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([UNIT_SEP]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    hex16(&digest[..8])
}

fn hex16(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(16);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hex64_is_16_digits_and_stable() {
        let a = stable_hex64("git checkout {}");
        assert_eq!(a.len(), 16);
        assert_eq!(a, stable_hex64("git checkout {}"));
        assert_ne!(a, stable_hex64("git checkout"));
    }

    #[test]
    fn parts_are_separator_safe() {
        assert_ne!(
            stable_hex64_parts(&["ab", "c"]),
            stable_hex64_parts(&["a", "bc"])
        );
    }
}
