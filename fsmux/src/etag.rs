//! Cheap integrity tag derived from modification time and size.
//!
//! The tag is `mtime` in radix 29 followed by `size` in radix 31. It does not
//! hash content: two versions of a file with the same size and mtime share a
//! tag. The two parts are joined without a separator, so distinct pairs can
//! also render the same tag (`(846, 0)` and `(29, 155)` are both `"1050"`).

/// Disables etag checks when passed as the expected tag.
pub const ETAG_DISABLED: &str = "";

/// Tag for `(mtime, size)`; `None` when either input is unknown.
pub fn etag(mtime: Option<u64>, size: Option<u64>) -> Option<String> {
    let (mtime, size) = (mtime?, size?);
    let mut tag = to_radix(mtime, 29);
    tag.push_str(&to_radix(size, 31));
    Some(tag)
}

fn to_radix(mut n: u64, radix: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        let d = (n % radix as u64) as u32;
        // d < radix <= 36
        digits.push(char::from_digit(d, radix).unwrap_or('0'));
        n /= radix as u64;
    }
    digits.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_format() {
        // 100 = 3*29 + 13, 50 = 1*31 + 19
        assert_eq!(etag(Some(100), Some(50)).as_deref(), Some("3d1j"));
        assert_eq!(etag(Some(0), Some(0)).as_deref(), Some("00"));
        assert_eq!(to_radix(28, 29), "s");
        assert_eq!(to_radix(30, 31), "u");
    }

    #[test]
    fn test_etag_is_deterministic_and_distinguishes_inputs() {
        let a = etag(Some(1_700_000_000_000), Some(4096));
        assert_eq!(a, etag(Some(1_700_000_000_000), Some(4096)));
        assert_ne!(a, etag(Some(1_700_000_000_001), Some(4096)));
        assert_ne!(a, etag(Some(1_700_000_000_000), Some(4097)));
        assert_ne!(etag(Some(100), Some(50)), etag(Some(100), Some(999)));
        assert_ne!(etag(Some(100), Some(50)), etag(Some(200), Some(50)));
    }

    #[test]
    fn test_etag_parts_are_not_separated() {
        // 846 = "105" and 0 = "0"; 29 = "10" and 155 = "50"
        assert_eq!(etag(Some(846), Some(0)).as_deref(), Some("1050"));
        assert_eq!(etag(Some(846), Some(0)), etag(Some(29), Some(155)));
    }

    #[test]
    fn test_etag_missing_inputs() {
        assert_eq!(etag(None, Some(1)), None);
        assert_eq!(etag(Some(1), None), None);
        assert_eq!(etag(None, None), None);
    }
}
