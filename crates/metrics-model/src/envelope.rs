//! Asymmetric + symmetric envelope, HMAC sign/verify, and gzip helpers
//! (§4.3, §4.4, §9). Grounded on `examples/original_source/internal/asymcrypto/asym.go`
//! (AES-CFB with the IV taken from the first 16 bytes of the session key —
//! preserved for wire compatibility per §9, not hardened here) and on
//! `examples/estuary-flow/.graveyard/control/src/services/signatures.rs`
//! for the HMAC shape.

use std::io::{Read, Write};

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rand::rngs::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const SESSION_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("reading key file {0:?}: {1}")]
    ReadKeyFile(String, std::io::Error),
    #[error("parsing PKCS#1 key: {0}")]
    Pkcs1(pkcs1::Error),
    #[error("RSA operation failed: {0}")]
    Rsa(rsa::Error),
    #[error("gzip I/O error: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("HMAC signature of wrong length: expected 32 bytes, got {0}")]
    WrongHmacLength(usize),
    #[error("HMAC signature mismatch")]
    HmacMismatch,
}

/// Loads a PKCS#1 RSA public key from a PEM file (§6: "Keys are PEM files
/// holding PKCS#1 RSA public/private keys").
pub fn load_public_key(path: &std::path::Path) -> Result<RsaPublicKey, EnvelopeError> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| EnvelopeError::ReadKeyFile(path.display().to_string(), e))?;
    RsaPublicKey::from_pkcs1_pem(&pem).map_err(EnvelopeError::Pkcs1)
}

pub fn load_private_key(path: &std::path::Path) -> Result<RsaPrivateKey, EnvelopeError> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| EnvelopeError::ReadKeyFile(path.display().to_string(), e))?;
    RsaPrivateKey::from_pkcs1_pem(&pem).map_err(EnvelopeError::Pkcs1)
}

/// Generates a fresh 256-bit session key, AES-CFB-encrypts `data` under it
/// (IV = first 16 bytes of the session key, see module docs), and
/// RSA-PKCS1v15-encrypts the session key under `public_key`. Returns
/// `(encrypted_session_key, encrypted_data)` (§4.3 step 2).
pub fn encrypt(
    public_key: &RsaPublicKey,
    data: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), EnvelopeError> {
    let mut session_key = [0u8; SESSION_KEY_LEN];
    rand::RngCore::fill_bytes(&mut OsRng, &mut session_key);

    let encrypted_session_key = public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, &session_key)
        .map_err(EnvelopeError::Rsa)?;

    let mut buf = data.to_vec();
    let iv = &session_key[..16];
    Aes256CfbEnc::new(&session_key.into(), iv.into()).encrypt(&mut buf);

    Ok((encrypted_session_key, buf))
}

/// Recovers the session key via `private_key` and AES-CFB-decrypts
/// `encrypted_data` (§4.5 step/§4.4 step 5).
pub fn decrypt(
    private_key: &RsaPrivateKey,
    encrypted_session_key: &[u8],
    encrypted_data: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    let session_key = private_key
        .decrypt(Pkcs1v15Encrypt, encrypted_session_key)
        .map_err(EnvelopeError::Rsa)?;
    if session_key.len() != SESSION_KEY_LEN {
        return Err(EnvelopeError::Rsa(rsa::Error::Decryption));
    }

    let mut buf = encrypted_data.to_vec();
    let iv = &session_key[..16];
    Aes256CfbDec::new(session_key.as_slice().into(), iv.into()).decrypt(&mut buf);
    Ok(buf)
}

/// Computes the hex-encoded HMAC-SHA-256 of `body` under `secret` (§4.3
/// step 3, §6 `HashSHA256` header).
pub fn sign_hex(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies `signature_hex` against `body` under `secret` in constant
/// time. A signature of the wrong byte length is reported distinctly so
/// callers can implement the §9 legacy pass-through behaviour.
pub fn verify_hex(secret: &[u8], body: &[u8], signature_hex: &str) -> Result<(), EnvelopeError> {
    let signature = hex::decode(signature_hex).map_err(|_| EnvelopeError::WrongHmacLength(0))?;
    if signature.len() != 32 {
        return Err(EnvelopeError::WrongHmacLength(signature.len()));
    }
    let expected = {
        let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any size");
        mac.update(body);
        mac.finalize().into_bytes()
    };
    if expected.ct_eq(&signature[..]).into() {
        Ok(())
    } else {
        Err(EnvelopeError::HmacMismatch)
    }
}

pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).expect("generate test key");
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    #[test]
    fn hmac_round_trips_and_rejects_bit_flip() {
        let key = b"test";
        let body = b"hello world";
        let sig = sign_hex(key, body);
        assert!(verify_hex(key, body, &sig).is_ok());

        let mut flipped = body.to_vec();
        flipped[0] ^= 1;
        assert!(verify_hex(key, &flipped, &sig).is_err());

        let mut bad_sig = hex::decode(&sig).unwrap();
        bad_sig[0] ^= 1;
        assert!(verify_hex(key, body, &hex::encode(bad_sig)).is_err());
    }

    #[test]
    fn wrong_length_signature_is_distinguished() {
        let err = verify_hex(b"test", b"body", "deadbeef").unwrap_err();
        assert!(matches!(err, EnvelopeError::WrongHmacLength(_)));
    }

    #[test]
    fn gzip_round_trips() {
        let data = b"some request body".repeat(10);
        let compressed = gzip_compress(&data).unwrap();
        let decompressed = gzip_decompress(&compressed).unwrap();
        assert_eq!(data, &decompressed[..]);
    }

    #[test]
    fn asymmetric_envelope_round_trips() {
        let (private, public) = test_keypair();
        let plaintext = b"a batch of metrics as json";
        let (enc_key, enc_data) = encrypt(&public, plaintext).unwrap();
        let decrypted = decrypt(&private, &enc_key, &enc_data).unwrap();
        assert_eq!(decrypted, plaintext);
        // Sanity: the public key we generated really does pair with the private one.
        assert_eq!(public.n(), private.n());
    }
}
