//! Byte-string encodings used by keys and tokens.

use data_encoding::{BASE64URL_NOPAD, HEXLOWER};

/// URL-safe base64, unpadded. The form keys and signatures take in config
/// files and on the wire.
pub(crate) fn base64_encode(bytes: &[u8]) -> String {
    BASE64URL_NOPAD.encode(bytes)
}

pub(crate) fn base64_decode(s: &str) -> Result<Vec<u8>, data_encoding::DecodeError> {
    BASE64URL_NOPAD.decode(s.as_bytes())
}

/// Lowercase hex, used for key fingerprints.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    HEXLOWER.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrip() {
        let data = b"gridflow token payload";
        let encoded = base64_encode(data);
        assert!(!encoded.contains('='));
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(data.as_slice(), decoded.as_slice());
    }

    #[test]
    fn hex_is_lowercase() {
        assert_eq!(hex_encode(&[0xDE, 0xAD, 0x00]), "dead00");
    }
}
