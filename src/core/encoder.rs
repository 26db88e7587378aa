//! Optional per-line obfuscation with an integrity tag.
//!
//! This is defense in depth against casual inspection of history files, not
//! encryption at rest: the keystream is SHA-256 in counter mode over a
//! passphrase-derived key, and the tag is a truncated keyed SHA-256 digest.
//! Deployments that need real confidentiality should wrap file I/O with a
//! proper encryption layer outside this crate.
//!
//! Token shape: `<n>|~v1~<base64url(nonce ‖ ciphertext)>~<16 hex tag>`. The
//! line number stays in clear so writers can find the tail without the key,
//! and it is bound into the tag so lines cannot be reordered undetected.

use crate::core::error::MemlogError;
use crate::core::format::split_line_number;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::borrow::Cow;

pub const TOKEN_MARKER: &str = "~v1~";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 8;

#[derive(Clone)]
pub struct LineEncoder {
    key: [u8; 32],
}

impl std::fmt::Debug for LineEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineEncoder").field("key", &"[REDACTED]").finish()
    }
}

/// True when the content after the line number has the encoded-token shape.
pub fn is_encoded(line: &str) -> bool {
    split_line_number(line)
        .map(|(_, rest)| rest.starts_with(TOKEN_MARKER))
        .unwrap_or(false)
}

impl LineEncoder {
    pub fn new(secret: &str) -> Result<Self, MemlogError> {
        if secret.trim().is_empty() {
            return Err(MemlogError::ConfigError(
                "encoder key must not be empty".to_string(),
            ));
        }
        let mut hasher = Sha256::new();
        hasher.update(b"memlog-encoder-v1\0");
        hasher.update(secret.as_bytes());
        Ok(Self {
            key: hasher.finalize().into(),
        })
    }

    /// Encode a full `<n>|<content>` line.
    pub fn encode(&self, line: &str) -> Result<String, MemlogError> {
        let (number, content) = split_line_number(line).ok_or_else(|| {
            MemlogError::ValidationError("cannot encode a line without a line number".to_string())
        })?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut payload = Vec::with_capacity(NONCE_LEN + content.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(content.as_bytes());
        self.apply_keystream(&nonce, &mut payload[NONCE_LEN..]);

        let tag = self.tag(number, &nonce, content.as_bytes());
        Ok(format!(
            "{}|{}{}~{}",
            number,
            TOKEN_MARKER,
            URL_SAFE_NO_PAD.encode(&payload),
            hex(&tag)
        ))
    }

    /// Decode a token produced by `encode`. Any mismatch is an `IntegrityError`.
    pub fn decode(&self, token: &str) -> Result<String, MemlogError> {
        let (number, rest) = split_line_number(token)
            .ok_or_else(|| integrity("token has no line number"))?;
        let body = rest
            .strip_prefix(TOKEN_MARKER)
            .ok_or_else(|| integrity("token marker missing"))?;
        let (encoded, tag_hex) = body
            .rsplit_once('~')
            .ok_or_else(|| integrity("token tag missing"))?;
        if tag_hex.len() != TAG_LEN * 2 {
            return Err(integrity("token tag has wrong length"));
        }

        let mut payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| integrity("token payload is not base64"))?;
        if payload.len() < NONCE_LEN {
            return Err(integrity("token payload too short"));
        }
        let (nonce, cipher) = payload.split_at_mut(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = (&*nonce)
            .try_into()
            .map_err(|_| integrity("token nonce malformed"))?;
        self.apply_keystream(&nonce, cipher);

        let expected = hex(&self.tag(number, &nonce, cipher));
        if !constant_time_eq(expected.as_bytes(), tag_hex.as_bytes()) {
            return Err(integrity(&format!("tag mismatch on line {}", number)));
        }

        let content = std::str::from_utf8(cipher)
            .map_err(|_| integrity("decoded content is not UTF-8"))?;
        Ok(format!("{}|{}", number, content))
    }

    /// Decode when the line is a token, otherwise pass it through. This is
    /// what lets a file mix encoded and plain lines during migration.
    pub fn decode_or_plain<'a>(&self, line: &'a str) -> Result<Cow<'a, str>, MemlogError> {
        if is_encoded(line) {
            self.decode(line).map(Cow::Owned)
        } else {
            Ok(Cow::Borrowed(line))
        }
    }

    fn apply_keystream(&self, nonce: &[u8; NONCE_LEN], data: &mut [u8]) {
        for (block_index, chunk) in data.chunks_mut(32).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(self.key);
            hasher.update(nonce);
            hasher.update((block_index as u64).to_be_bytes());
            let block = hasher.finalize();
            for (byte, k) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= k;
            }
        }
    }

    fn tag(&self, number: u64, nonce: &[u8; NONCE_LEN], content: &[u8]) -> [u8; TAG_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(b"tag");
        hasher.update(number.to_be_bytes());
        hasher.update(nonce);
        hasher.update(content);
        let digest = hasher.finalize();
        let mut out = [0u8; TAG_LEN];
        out.copy_from_slice(&digest[..TAG_LEN]);
        out
    }
}

fn integrity(reason: &str) -> MemlogError {
    MemlogError::IntegrityError(reason.to_string())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> LineEncoder {
        LineEncoder::new("correct horse battery staple").unwrap()
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let enc = encoder();
        for line in ["1|@DECISIONS:d1", "2|rationale=a \\| b", "3|note=✓ unicode", "4|empty="] {
            let token = enc.encode(line).unwrap();
            assert!(is_encoded(&token));
            assert!(!token.contains("DECISIONS"));
            assert_eq!(enc.decode(&token).unwrap(), line);
        }
    }

    #[test]
    fn test_tokens_keep_line_number_in_clear() {
        let token = encoder().encode("42|@STATE:s1").unwrap();
        assert!(token.starts_with("42|~v1~"));
        assert_eq!(split_line_number(&token).unwrap().0, 42);
    }

    #[test]
    fn test_same_line_encodes_differently() {
        let enc = encoder();
        assert_ne!(enc.encode("1|a=b").unwrap(), enc.encode("1|a=b").unwrap());
    }

    #[test]
    fn test_tampered_payload_fails_integrity() {
        let enc = encoder();
        let token = enc.encode("7|decision=keep").unwrap();
        let marker_end = token.find(TOKEN_MARKER).unwrap() + TOKEN_MARKER.len();
        let mut bytes = token.into_bytes();
        bytes[marker_end + 20] = if bytes[marker_end + 20] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert!(matches!(enc.decode(&tampered), Err(MemlogError::IntegrityError(_))));
    }

    #[test]
    fn test_moved_line_number_fails_integrity() {
        let enc = encoder();
        let token = enc.encode("7|decision=keep").unwrap();
        let moved = token.replacen("7|", "8|", 1);
        assert!(matches!(enc.decode(&moved), Err(MemlogError::IntegrityError(_))));
    }

    #[test]
    fn test_wrong_key_fails_integrity() {
        let token = encoder().encode("1|a=b").unwrap();
        let other = LineEncoder::new("another key").unwrap();
        assert!(matches!(other.decode(&token), Err(MemlogError::IntegrityError(_))));
    }

    #[test]
    fn test_plain_lines_pass_through() {
        let enc = encoder();
        let plain = "3|decision=plain text";
        assert!(matches!(enc.decode_or_plain(plain).unwrap(), Cow::Borrowed(_)));
        let token = enc.encode(plain).unwrap();
        assert_eq!(enc.decode_or_plain(&token).unwrap(), plain);
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(matches!(LineEncoder::new("  "), Err(MemlogError::ConfigError(_))));
    }

    #[test]
    fn test_debug_hides_key() {
        assert!(format!("{:?}", encoder()).contains("REDACTED"));
    }
}
