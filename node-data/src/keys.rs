// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::fmt::{self, Debug};
use std::fs;
use std::path::Path;

use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey,
    LineEnding,
};
use rand::rngs::OsRng;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Modulus size used for newly generated ledger keys.
pub const KEY_BITS: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("key does not match the asserted hash")]
    KeyMismatch,
}

/// Hex-encoded SHA-256 digest of a byte string. Strings hash as UTF-8.
pub fn hash_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Full base58 representation of a byte string.
pub fn to_base58(data: impl AsRef<[u8]>) -> String {
    bs58::encode(data.as_ref()).into_string()
}

pub fn from_base58(s: &str) -> Result<Vec<u8>, KeyError> {
    bs58::decode(s.trim())
        .into_vec()
        .map_err(|e| KeyError::InvalidKey(e.to_string()))
}

/// Fingerprint of a public key: hex SHA-256 of its canonical (SPKI DER)
/// encoding. KeyIds compare as strings and name ledgers on the wire.
#[derive(
    Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn of_der(der: &[u8]) -> Self {
        Self(hash_hex(der))
    }
}

impl From<String> for KeyId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for KeyId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::to_str(&self.0))
    }
}

/// Extends RsaPublicKey with the cached encodings the protocol needs.
///
/// The SPKI DER bytes and the derived [`KeyId`] are computed once on
/// construction; converting on every hash or comparison shows up fast on
/// the heartbeat path.
#[derive(Clone)]
pub struct PublicKey {
    inner: RsaPublicKey,
    der: Vec<u8>,
    id: KeyId,
}

impl PublicKey {
    pub fn new(inner: RsaPublicKey) -> Result<Self, KeyError> {
        let der = inner
            .to_public_key_der()
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?
            .as_bytes()
            .to_vec();
        let id = KeyId::of_der(&der);
        Ok(Self { inner, der, id })
    }

    pub fn from_der(der: &[u8]) -> Result<Self, KeyError> {
        let inner = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Self::new(inner)
    }

    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let inner = RsaPublicKey::from_public_key_pem(pem.trim())
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Self::new(inner)
    }

    /// Decodes a key from its base58 DER transport form.
    pub fn from_base58(s: &str) -> Result<Self, KeyError> {
        Self::from_der(&from_base58(s)?)
    }

    /// Canonical (SPKI DER) encoding. This is the byte string KeyIds hash.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding, as carried in JOIN responses.
    pub fn to_pem(&self) -> Result<String, KeyError> {
        self.inner
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))
    }

    /// Base58 of the DER bytes, as carried inside blocks.
    pub fn to_base58(&self) -> String {
        to_base58(&self.der)
    }

    pub fn key_id(&self) -> &KeyId {
        &self.id
    }

    /// Verifies a PKCS#1 v1.5 / SHA-256 signature over `msg`.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        let Ok(sig) = Signature::try_from(sig) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(self.inner.clone())
            .verify(msg, &sig)
            .is_ok()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for PublicKey {}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey").field("id", &self.id).finish()
    }
}

/// An in-memory RSA key pair. The private half never leaves this struct
/// except through the explicit PEM export below.
#[derive(Clone)]
pub struct KeyPair {
    secret: RsaPrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh 2048-bit pair. Takes a noticeable moment; callers
    /// on the daemon path should do this before going Active.
    pub fn generate() -> Result<Self, KeyError> {
        let secret = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Self::from_secret(secret)
    }

    fn from_secret(secret: RsaPrivateKey) -> Result<Self, KeyError> {
        let public = PublicKey::new(secret.to_public_key())?;
        Ok(Self { secret, public })
    }

    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let secret = RsaPrivateKey::from_pkcs8_pem(pem.trim())
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Self::from_secret(secret)
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn key_id(&self) -> &KeyId {
        self.public.key_id()
    }

    /// Signs `msg` with PKCS#1 v1.5 / SHA-256.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, KeyError> {
        let sig = SigningKey::<Sha256>::new(self.secret.clone())
            .try_sign(msg)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(sig.to_vec())
    }

    /// PKCS#8 PEM export of the private key.
    pub fn to_pem(&self) -> Result<Zeroizing<String>, KeyError> {
        self.secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))
    }

    /// Writes the private key to `path` (owner read/write only) and the
    /// public key next to it with a `.pub` suffix.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeyError> {
        let path = path.as_ref();
        let io_err =
            |e: std::io::Error| KeyError::InvalidKey(format!("{}: {e}", path.display()));

        fs::write(path, self.to_pem()?.as_bytes()).map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }

        let mut pub_path = path.as_os_str().to_owned();
        pub_path.push(".pub");
        fs::write(pub_path, self.public.to_pem()?).map_err(io_err)?;
        Ok(())
    }

    /// Loads a private key from a PKCS#8 PEM file. When a sibling `.pub`
    /// file exists it must agree with the derived public key, so a stale
    /// or swapped key file cannot silently change our identity.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let pem =
            Zeroizing::new(fs::read_to_string(path).map_err(|e| {
                KeyError::InvalidKey(format!("{}: {e}", path.display()))
            })?);
        let pair = Self::from_pem(&pem)?;

        let mut pub_path = path.as_os_str().to_owned();
        pub_path.push(".pub");
        if let Ok(pub_pem) = fs::read_to_string(pub_path) {
            if PublicKey::from_pem(&pub_pem)?.key_id() != pair.key_id() {
                return Err(KeyError::KeyMismatch);
            }
        }

        Ok(pair)
    }
}

impl Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("id", self.key_id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let pair = KeyPair::generate().expect("keygen");
        let sig = pair.sign(b"attest").expect("sign");

        assert!(pair.public().verify(b"attest", &sig));
        assert!(!pair.public().verify(b"attest!", &sig));
        assert!(!pair.public().verify(b"attest", b"garbage"));
    }

    #[test]
    fn verify_rejects_foreign_key() {
        let a = KeyPair::generate().expect("keygen");
        let b = KeyPair::generate().expect("keygen");

        let sig = a.sign(b"msg").expect("sign");
        assert!(!b.public().verify(b"msg", &sig));
    }

    #[test]
    fn key_id_is_stable_across_encodings() {
        let pair = KeyPair::generate().expect("keygen");
        let pk = pair.public();

        let from_pem =
            PublicKey::from_pem(&pk.to_pem().expect("pem")).expect("parse");
        let from_b58 =
            PublicKey::from_base58(&pk.to_base58()).expect("parse");

        assert_eq!(pk.key_id(), from_pem.key_id());
        assert_eq!(pk.key_id(), from_b58.key_id());
        assert_eq!(pk.key_id().as_str(), &hash_hex(pk.der()));
    }

    #[test]
    fn hash_hex_matches_known_vector() {
        // sha256 of the empty string
        assert_eq!(
            hash_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn save_and_load_key_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.key");

        let pair = KeyPair::generate().expect("keygen");
        pair.save(&path).expect("save");

        let restored = KeyPair::load(&path).expect("load");
        assert_eq!(pair.key_id(), restored.key_id());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode =
                fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let pub_pem = fs::read_to_string(dir.path().join("ledger.key.pub"))
            .expect("pub file");
        let pk = PublicKey::from_pem(&pub_pem).expect("parse");
        assert_eq!(pk.key_id(), pair.key_id());
    }

    #[test]
    fn load_rejects_a_stale_pub_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.key");

        KeyPair::generate().expect("keygen").save(&path).expect("save");

        // Swap the sibling .pub for a different key's.
        let other = KeyPair::generate().expect("keygen");
        fs::write(
            dir.path().join("ledger.key.pub"),
            other.public().to_pem().expect("pem"),
        )
        .expect("write");

        assert!(matches!(
            KeyPair::load(&path),
            Err(KeyError::KeyMismatch)
        ));
    }
}
