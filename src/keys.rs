use std::fs;
use std::path::Path;

use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub const KEY_BITS: usize = 4096;

const PRIVATE_KEY_FILE: &str = "id_rsa.pem";
const PUBLIC_KEY_FILE: &str = "id_rsa.pub.pem";

/// An RSA identity, persisted as PEM (PKCS#1) files.
///
/// Once loaded the pair is read-only and may be shared across any number of
/// concurrent transfer sessions.
pub struct KeyPair {
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
}

impl KeyPair {
    pub fn generate(bits: usize) -> Result<KeyPair> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| Error::Key(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair { private, public })
    }

    /// Load the key pair stored under `dir`, generating and persisting a
    /// fresh 4096-bit pair on first use.
    pub fn load_or_generate(dir: &Path) -> Result<KeyPair> {
        let private_path = dir.join(PRIVATE_KEY_FILE);
        if private_path.exists() {
            return KeyPair::load(&private_path);
        }
        fs::create_dir_all(dir)?;
        let pair = KeyPair::generate(KEY_BITS)?;
        pair.save(dir)?;
        Ok(pair)
    }

    pub fn load(private_path: &Path) -> Result<KeyPair> {
        let pem = fs::read_to_string(private_path)?;
        let private =
            RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| Error::Key(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair { private, public })
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let private_pem = self
            .private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| Error::Key(e.to_string()))?;
        fs::write(dir.join(PRIVATE_KEY_FILE), private_pem.as_bytes())?;

        let public_pem = self
            .public
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| Error::Key(e.to_string()))?;
        fs::write(dir.join(PUBLIC_KEY_FILE), public_pem)?;
        Ok(())
    }

    pub fn fingerprint(&self) -> Result<String> {
        fingerprint(&self.public)
    }
}

/// SHA-256 of the PKCS#1 DER encoding of a public key, lowercase hex.
/// This is the contact/address code peers compare out of band.
pub fn fingerprint(public: &RsaPublicKey) -> Result<String> {
    let der = public
        .to_pkcs1_der()
        .map_err(|e| Error::Key(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(der.as_bytes())))
}

/// PKCS#1 DER bytes of a public key, as sent in the key handshake frame.
pub fn encode_public_key(public: &RsaPublicKey) -> Result<Vec<u8>> {
    let der = public
        .to_pkcs1_der()
        .map_err(|e| Error::Key(e.to_string()))?;
    Ok(der.as_bytes().to_vec())
}

pub fn decode_public_key(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_pkcs1_der(der).map_err(|e| Error::Key(e.to_string()))
}
