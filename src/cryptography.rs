use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};

use crate::error::{Error, Result};
use crate::{KEY_SIZE, NONCE_SIZE};

/// Generate a fresh random 32-byte AES session key.
pub fn generate_session_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

/// Generate a fresh random 12-byte nonce. Nonces are random per sealed unit
/// and never reused under the same key.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// AES-256-GCM-seal `plaintext` under a fresh random nonce, no associated
/// data. Returns the nonce and the ciphertext (tag appended).
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
    let cipher = Aes256Gcm::new(key.into());
    let nonce_bytes = generate_nonce();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| Error::Cipher)?;
    Ok((nonce_bytes, ciphertext))
}

/// AES-256-GCM-open one sealed unit. Tag verification failure surfaces as
/// a cipher error; no partial plaintext is ever returned.
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce_bytes: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| Error::Cipher)
}

/// RSA-OAEP(SHA-256, empty label) encrypt `message` under the receiver's
/// public key, and RSA-PSS(SHA-256, default salt) sign it under the sender's
/// private key. Returns (ciphertext, signature).
pub fn encrypt_and_sign(
    message: &[u8],
    receiver_public: &RsaPublicKey,
    sender_private: &RsaPrivateKey,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut rng = rand::thread_rng();

    let ciphertext = receiver_public
        .encrypt(&mut rng, Oaep::new::<Sha256>(), message)
        .map_err(|e| Error::Key(e.to_string()))?;

    let signing_key = SigningKey::<Sha256>::new(sender_private.clone());
    let signature = signing_key.sign_with_rng(&mut rng, message);

    Ok((ciphertext, signature.to_vec()))
}

/// RSA-OAEP decrypt under the receiver's private key, then verify the
/// RSA-PSS signature over the decrypted message under the sender's public
/// key. The message is surfaced only after verification succeeds.
pub fn decrypt_and_verify(
    ciphertext: &[u8],
    signature: &[u8],
    sender_public: &RsaPublicKey,
    receiver_private: &RsaPrivateKey,
) -> Result<Vec<u8>> {
    let message = receiver_private
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| Error::Cipher)?;

    let signature = Signature::try_from(signature).map_err(|_| Error::SignatureMismatch)?;
    let verifying_key = VerifyingKey::<Sha256>::new(sender_public.clone());
    verifying_key
        .verify(&message, &signature)
        .map_err(|_| Error::SignatureMismatch)?;

    Ok(message)
}

/// Pack the key-bundle message: 32-byte symmetric key followed by the
/// 2-byte big-endian chunk count.
pub fn bundle_message(key: &[u8; KEY_SIZE], chunk_count: u16) -> Vec<u8> {
    let mut message = Vec::with_capacity(KEY_SIZE + 2);
    message.extend_from_slice(key);
    message.extend_from_slice(&chunk_count.to_be_bytes());
    message
}

/// Split a verified key-bundle message back into key and chunk count.
pub fn split_bundle_message(message: &[u8]) -> Result<([u8; KEY_SIZE], u16)> {
    if message.len() != KEY_SIZE + 2 {
        return Err(Error::InvalidKeyBundle);
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&message[..KEY_SIZE]);
    let chunk_count = u16::from_be_bytes([message[KEY_SIZE], message[KEY_SIZE + 1]]);
    Ok((key, chunk_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    // 4096-bit generation is too slow for unit tests; 2048 exercises the
    // same code paths.
    fn test_key_pair() -> &'static (RsaPrivateKey, RsaPublicKey) {
        static PAIR: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
        PAIR.get_or_init(|| {
            let private =
                RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate test key");
            let public = RsaPublicKey::from(&private);
            (private, public)
        })
    }

    #[test]
    fn seal_open_round_trip() {
        let key = generate_session_key();
        let (nonce, ciphertext) = seal(&key, b"chunk data").unwrap();
        assert_eq!(ciphertext.len(), b"chunk data".len() + crate::TAG_SIZE);
        let plaintext = open(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext, b"chunk data");
    }

    #[test]
    fn open_rejects_flipped_ciphertext_bit() {
        let key = generate_session_key();
        let (nonce, mut ciphertext) = seal(&key, b"payload").unwrap();
        ciphertext[0] ^= 0x01;
        assert!(matches!(open(&key, &nonce, &ciphertext), Err(Error::Cipher)));
    }

    #[test]
    fn open_rejects_flipped_nonce_bit() {
        let key = generate_session_key();
        let (mut nonce, ciphertext) = seal(&key, b"payload").unwrap();
        nonce[0] ^= 0x80;
        assert!(matches!(open(&key, &nonce, &ciphertext), Err(Error::Cipher)));
    }

    #[test]
    fn nonces_are_fresh_per_seal() {
        let key = generate_session_key();
        let (nonce_a, _) = seal(&key, b"x").unwrap();
        let (nonce_b, _) = seal(&key, b"x").unwrap();
        assert_ne!(nonce_a, nonce_b);
    }

    #[test]
    fn key_bundle_round_trips() {
        let (private, public) = test_key_pair();
        let key = generate_session_key();
        let message = bundle_message(&key, 513);

        let (ciphertext, signature) = encrypt_and_sign(&message, public, private).unwrap();
        let recovered = decrypt_and_verify(&ciphertext, &signature, public, private).unwrap();

        let (recovered_key, chunk_count) = split_bundle_message(&recovered).unwrap();
        assert_eq!(recovered_key, key);
        assert_eq!(chunk_count, 513);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let (private, public) = test_key_pair();
        let message = bundle_message(&generate_session_key(), 3);
        let (ciphertext, mut signature) = encrypt_and_sign(&message, public, private).unwrap();

        signature[10] ^= 0x01;
        assert!(matches!(
            decrypt_and_verify(&ciphertext, &signature, public, private),
            Err(Error::SignatureMismatch)
        ));
    }

    #[test]
    fn tampered_ciphertext_never_yields_a_key() {
        let (private, public) = test_key_pair();
        let message = bundle_message(&generate_session_key(), 3);
        let (mut ciphertext, signature) = encrypt_and_sign(&message, public, private).unwrap();

        ciphertext[0] ^= 0x01;
        assert!(decrypt_and_verify(&ciphertext, &signature, public, private).is_err());
    }

    #[test]
    fn bundle_message_must_be_exact_length() {
        assert!(matches!(
            split_bundle_message(&[0u8; 33]),
            Err(Error::InvalidKeyBundle)
        ));
        assert!(matches!(
            split_bundle_message(&[0u8; 35]),
            Err(Error::InvalidKeyBundle)
        ));
    }
}
