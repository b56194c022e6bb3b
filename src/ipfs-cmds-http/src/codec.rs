//! Multibase `base64url` codec for binary query values.
//!
//! Binary arguments travel as `u` followed by unpadded URL-safe base64 so
//! that arbitrary bytes survive URL encoding.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Multibase prefix of unpadded base64url.
pub const BASE64URL_PREFIX: char = 'u';

/// Encode bytes as multibase base64url.
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(1 + bytes.len().div_ceil(3) * 4);
    out.push(BASE64URL_PREFIX);
    out.push_str(&URL_SAFE_NO_PAD.encode(bytes));
    out
}

/// Decode a multibase base64url value. Returns `None` for other bases or
/// malformed input.
pub fn decode(value: &str) -> Option<Vec<u8>> {
    let payload = value.strip_prefix(BASE64URL_PREFIX)?;
    URL_SAFE_NO_PAD.decode(payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_value() {
        assert_eq!(encode(b"hello"), "uaGVsbG8");
        assert_eq!(encode(&[0xfb, 0xff]), "u-_8");
        assert_eq!(encode(b""), "u");
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode("uaGVsbG8").unwrap(), b"hello");
        assert_eq!(decode("u-_8").unwrap(), vec![0xfb, 0xff]);
        assert!(decode("zabc").is_none());
        assert!(decode("u***").is_none());
    }
}
