//! Crypto primitives for the worker boundary: request signing, vault
//! sealing, and the random identifiers handed out by admin flows.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// AES-GCM nonces are 96 bits.
pub const NONCE_LEN: usize = 12;

/// Alphabet for pairing codes; drops the symbols humans misread (0/O, 1/I/L).
pub const PAIRING_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("failed to encrypt payload")]
    Encrypt,
    #[error("message authentication failed")]
    Decrypt,
    #[error("invalid sealed record: {0}")]
    InvalidRecord(String),
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// The canonical string covered by a runtime request signature.
/// Method uppercased, path without query or fragment, lowercase body hash.
pub fn signing_string(method: &str, path: &str, timestamp: i64, body_sha256_hex: &str) -> String {
    format!(
        "{method}\n{path}\n{timestamp}\n{body_sha256_hex}",
        method = method.to_ascii_uppercase()
    )
}

/// Lowercase hex HMAC-SHA256 of `message` under `secret`.
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a presented hex signature in constant time. A leading `v1=`
/// version tag is accepted and stripped.
pub fn verify_hmac_hex(secret: &[u8], message: &[u8], presented: &str) -> bool {
    let presented = presented.strip_prefix("v1=").unwrap_or(presented);
    let Ok(expected) = hex::decode(presented) else {
        return false;
    };
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time byte equality. Length is not secret; mismatched lengths
/// short-circuit to false.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// The vault data key is derived from the KEK by a single SHA-256.
pub fn vault_key(kek: &str) -> [u8; 32] {
    Sha256::digest(kek.as_bytes()).into()
}

/// Nonce and ciphertext of one vault entry, base64 for JSON storage.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub nonce: String,
    pub ciphertext: String,
}

/// Encrypts `plaintext` under the KEK-derived key with a fresh random nonce.
pub fn seal(kek: &str, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(&vault_key(kek)).map_err(|_| CryptoError::Encrypt)?;
    let nonce_bytes = random_bytes(NONCE_LEN);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;
    Ok(Sealed {
        nonce: STANDARD_NO_PAD.encode(nonce_bytes),
        ciphertext: STANDARD_NO_PAD.encode(ciphertext),
    })
}

/// Decrypts a sealed vault entry. Tampering or a wrong KEK fails the GCM tag.
pub fn open(kek: &str, nonce_b64: &str, ciphertext_b64: &str) -> Result<Vec<u8>, CryptoError> {
    let nonce_bytes = STANDARD_NO_PAD
        .decode(nonce_b64)
        .map_err(|err| CryptoError::InvalidRecord(err.to_string()))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::InvalidRecord("bad nonce length".into()));
    }
    let ciphertext = STANDARD_NO_PAD
        .decode(ciphertext_b64)
        .map_err(|err| CryptoError::InvalidRecord(err.to_string()))?;
    let cipher =
        Aes256Gcm::new_from_slice(&vault_key(kek)).map_err(|_| CryptoError::Decrypt)?;
    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| CryptoError::Decrypt)
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; len];
    rand::rng().fill_bytes(&mut buffer);
    buffer
}

/// `len` random bytes rendered as lowercase hex (`2 * len` characters).
pub fn random_hex(len: usize) -> String {
    hex::encode(random_bytes(len))
}

/// An eight-symbol pairing code grouped `XXXX-XXXX`.
pub fn pairing_code() -> String {
    // 256 is a multiple of 32, so a plain modulus stays uniform.
    let raw = random_bytes(8);
    let mut code = String::with_capacity(9);
    for (i, byte) in raw.iter().enumerate() {
        if i == 4 {
            code.push('-');
        }
        code.push(PAIRING_ALPHABET[(*byte as usize) % PAIRING_ALPHABET.len()] as char);
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn signing_string_shape() {
        let s = signing_string("post", "/v1/adapter/youtube/list", 1700000000, "abc123");
        assert_eq!(s, "POST\n/v1/adapter/youtube/list\n1700000000\nabc123");
    }

    #[test]
    fn hmac_roundtrip_with_and_without_version_tag() {
        let sig = hmac_sha256_hex(b"secret", b"message");
        assert!(verify_hmac_hex(b"secret", b"message", &sig));
        assert!(verify_hmac_hex(b"secret", b"message", &format!("v1={sig}")));
        assert!(!verify_hmac_hex(b"other", b"message", &sig));
        assert!(!verify_hmac_hex(b"secret", b"tampered", &sig));
        assert!(!verify_hmac_hex(b"secret", b"message", "not-hex!"));
    }

    #[test]
    fn seal_open_roundtrip() {
        let sealed = seal("kek-material", b"plaintext value").expect("seal");
        let recovered = open("kek-material", &sealed.nonce, &sealed.ciphertext).expect("open");
        assert_eq!(recovered, b"plaintext value");
    }

    #[test]
    fn open_rejects_tampered_ciphertext() {
        let sealed = seal("kek-material", b"critical").expect("seal");
        let mut raw = STANDARD_NO_PAD.decode(&sealed.ciphertext).unwrap();
        raw[0] ^= 0xFF;
        let tampered = STANDARD_NO_PAD.encode(raw);
        assert_eq!(
            open("kek-material", &sealed.nonce, &tampered),
            Err(CryptoError::Decrypt)
        );
    }

    #[test]
    fn open_rejects_wrong_kek() {
        let sealed = seal("kek-one", b"value").expect("seal");
        assert_eq!(
            open("kek-two", &sealed.nonce, &sealed.ciphertext),
            Err(CryptoError::Decrypt)
        );
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let a = seal("kek", b"same").expect("seal");
        let b = seal("kek", b"same").expect("seal");
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abcd", b"abcd"));
        assert!(!constant_time_eq(b"abcd", b"abce"));
        assert!(!constant_time_eq(b"abcd", b"abc"));
    }

    #[test]
    fn pairing_code_format() {
        for _ in 0..32 {
            let code = pairing_code();
            assert_eq!(code.len(), 9);
            let (left, right) = code.split_once('-').expect("grouped");
            assert_eq!(left.len(), 4);
            assert_eq!(right.len(), 4);
            for ch in left.chars().chain(right.chars()) {
                assert!(PAIRING_ALPHABET.contains(&(ch as u8)), "symbol {ch}");
            }
        }
    }
}
