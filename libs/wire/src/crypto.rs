use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};

use crate::error::WireError;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm identifiers as they appear on the wire.
pub const HASH_ALGORITHM: &str = "SHA256";
pub const HMAC_ALGORITHM: &str = "HMACSHA256";
pub const CIPHER_ALGORITHM: &str = "AES";

/// Digest of a serialized body element, base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashValue {
    pub algorithm: String,
    pub value: String,
}

/// Keyed signature over serialized header bytes, base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmacValue {
    pub algorithm: String,
    pub value: String,
}

/// Ciphertext produced by [`Cryptographer::encrypt`], carried with enough
/// metadata to decrypt it later (used by at-rest secret storage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    pub algorithm: String,
    pub encoding: String,
    pub value: String,
}

/// Narrow interface over the cryptographic primitives the runtime needs.
///
/// Key material is always base64. Implementations must be cheap to call; the
/// envelope builder invokes `hash` and `hmac` on every request.
pub trait Cryptographer: Send + Sync {
    fn hash(&self, text: &str) -> HashValue;
    fn hmac(&self, key_material: &str, text: &str) -> Result<HmacValue, WireError>;
    fn encrypt(&self, key_material: &str, text: &str) -> Result<EncryptedValue, WireError>;
    fn decrypt(&self, key_material: &str, value: &EncryptedValue) -> Result<String, WireError>;
}

/// SHA-256 / HMAC-SHA256 / AES-ECB-PKCS7 implementation of [`Cryptographer`].
///
/// ECB with PKCS7 padding matches the service's at-rest secret format;
/// request signing only ever goes through `hash`/`hmac`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCryptographer;

impl Cryptographer for DefaultCryptographer {
    fn hash(&self, text: &str) -> HashValue {
        let digest = Sha256::digest(text.as_bytes());
        HashValue {
            algorithm: HASH_ALGORITHM.to_string(),
            value: B64.encode(digest),
        }
    }

    fn hmac(&self, key_material: &str, text: &str) -> Result<HmacValue, WireError> {
        let key = decode_key(key_material)?;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&key)
            .map_err(|err| WireError::KeyMaterial(err.to_string()))?;
        mac.update(text.as_bytes());
        Ok(HmacValue {
            algorithm: HMAC_ALGORITHM.to_string(),
            value: B64.encode(mac.finalize().into_bytes()),
        })
    }

    fn encrypt(&self, key_material: &str, text: &str) -> Result<EncryptedValue, WireError> {
        let key = decode_key(key_material)?;
        let ciphertext = match key.len() {
            16 => ecb::Encryptor::<aes::Aes128>::new_from_slice(&key)
                .map_err(|err| WireError::KeyMaterial(err.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(text.as_bytes()),
            24 => ecb::Encryptor::<aes::Aes192>::new_from_slice(&key)
                .map_err(|err| WireError::KeyMaterial(err.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(text.as_bytes()),
            32 => ecb::Encryptor::<aes::Aes256>::new_from_slice(&key)
                .map_err(|err| WireError::KeyMaterial(err.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(text.as_bytes()),
            other => {
                return Err(WireError::KeyMaterial(format!(
                    "unsupported cipher key length {other}"
                )));
            }
        };
        Ok(EncryptedValue {
            algorithm: CIPHER_ALGORITHM.to_string(),
            encoding: "base64".to_string(),
            value: B64.encode(ciphertext),
        })
    }

    fn decrypt(&self, key_material: &str, value: &EncryptedValue) -> Result<String, WireError> {
        let key = decode_key(key_material)?;
        let ciphertext = B64
            .decode(&value.value)
            .map_err(|err| WireError::Crypto(format!("ciphertext not base64: {err}")))?;
        let plaintext = match key.len() {
            16 => ecb::Decryptor::<aes::Aes128>::new_from_slice(&key)
                .map_err(|err| WireError::KeyMaterial(err.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
            24 => ecb::Decryptor::<aes::Aes192>::new_from_slice(&key)
                .map_err(|err| WireError::KeyMaterial(err.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
            32 => ecb::Decryptor::<aes::Aes256>::new_from_slice(&key)
                .map_err(|err| WireError::KeyMaterial(err.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
            other => {
                return Err(WireError::KeyMaterial(format!(
                    "unsupported cipher key length {other}"
                )));
            }
        }
        .map_err(|_| WireError::Crypto("bad padding".to_string()))?;
        String::from_utf8(plaintext).map_err(|_| WireError::Crypto("non-utf8 plaintext".to_string()))
    }
}

fn decode_key(key_material: &str) -> Result<Vec<u8>, WireError> {
    if key_material.is_empty() {
        return Err(WireError::KeyMaterial("empty key material".to_string()));
    }
    B64.decode(key_material)
        .map_err(|err| WireError::KeyMaterial(format!("not base64: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64 of 32 arbitrary bytes
    const KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

    #[test]
    fn hash_of_empty_string_matches_known_digest() {
        let hash = DefaultCryptographer.hash("");
        assert_eq!(hash.algorithm, "SHA256");
        assert_eq!(hash.value, "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
    }

    #[test]
    fn hmac_is_stable_and_key_dependent() {
        let crypto = DefaultCryptographer;
        let a = crypto.hmac(KEY, "payload").unwrap();
        let b = crypto.hmac(KEY, "payload").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.algorithm, "HMACSHA256");

        let other_key = B64.encode([7u8; 32]);
        let c = crypto.hmac(&other_key, "payload").unwrap();
        assert_ne!(a.value, c.value);
    }

    #[test]
    fn hmac_matches_direct_computation() {
        let crypto = DefaultCryptographer;
        let signed = crypto.hmac(KEY, "header-bytes").unwrap();

        let key = B64.decode(KEY).unwrap();
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&key).unwrap();
        mac.update(b"header-bytes");
        assert_eq!(signed.value, B64.encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let crypto = DefaultCryptographer;
        let sealed = crypto.encrypt(KEY, "keep this safe").unwrap();
        assert_eq!(sealed.algorithm, "AES");
        assert_eq!(sealed.encoding, "base64");
        assert_ne!(sealed.value, "keep this safe");

        let opened = crypto.decrypt(KEY, &sealed).unwrap();
        assert_eq!(opened, "keep this safe");
    }

    #[test]
    fn decrypt_with_wrong_key_never_reveals_plaintext() {
        let crypto = DefaultCryptographer;
        let sealed = crypto.encrypt(KEY, "keep this safe").unwrap();
        let wrong = B64.encode([9u8; 32]);
        // A wrong key usually fails the padding check; if it happens to pass,
        // the output must still be garbage.
        match crypto.decrypt(&wrong, &sealed) {
            Ok(text) => assert_ne!(text, "keep this safe"),
            Err(_) => {}
        }
    }

    #[test]
    fn rejects_unusable_key_material() {
        let crypto = DefaultCryptographer;
        assert!(crypto.hmac("", "x").is_err());
        assert!(crypto.hmac("not-base64!!!", "x").is_err());
        let short = B64.encode([1u8; 5]);
        assert!(crypto.encrypt(&short, "x").is_err());
    }
}
