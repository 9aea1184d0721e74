// Script checksums
// SHA-256 over the raw script bytes, lowercase hex.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest (lowercase) of `bytes`.
pub fn compute(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compare two hex digests, ignoring case and surrounding whitespace.
pub fn matches(expected: &str, computed: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(computed.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            compute(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            compute(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn deterministic_and_input_sensitive() {
        let inputs: [&[u8]; 4] = [b"SELECT 1;", b"SELECT 1; ", b"select 1;", b"\x00\xff"];
        for x in inputs {
            assert_eq!(compute(x), compute(x));
            assert_eq!(compute(x).len(), 64);
        }
        for (i, x) in inputs.iter().enumerate() {
            for y in inputs.iter().skip(i + 1) {
                assert_ne!(compute(x), compute(y));
            }
        }
    }

    #[test]
    fn matches_ignores_case() {
        let digest = compute(b"abc");
        assert!(matches(&digest.to_ascii_uppercase(), &digest));
        assert!(matches(&format!(" {} ", digest), &digest));
        assert!(!matches(&compute(b"abd"), &digest));
    }
}
