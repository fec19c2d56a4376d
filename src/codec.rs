//! Two-layer token codec.
//!
//! `seal` runs the inner layer first and the outer layer last; `open`
//! undoes them in reverse:
//!
//! ```text
//! JSON ──Twofish(k1, iv1)──▶ hex ──AES(k0, iv0)──▶ hex = token
//! ```
//!
//! Each layer's output is hex encoded, so the inner ciphertext travels as
//! ASCII through the outer layer and the token is cookie-safe lowercase hex.
//!
//! The codec holds no state of its own. It borrows the manager's
//! `KeyMaterial` for the duration of a call.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::{CipherError, CipherLayer, KeyMaterial};

/// Cipher applied first on seal, last on open
pub const INNER_LAYER: CipherLayer = CipherLayer::Twofish;

/// Cipher applied last on seal, first on open
pub const OUTER_LAYER: CipherLayer = CipherLayer::Aes;

/// Which layer a decode failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Outer,
    Inner,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outer => f.write_str("outer"),
            Self::Inner => f.write_str("inner"),
        }
    }
}

/// Error types for opening a token
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Token is not valid hex at the {0} layer")]
    InvalidHex(Layer),
    #[error("Cipher failure at the {layer} layer: {source}")]
    Cipher {
        layer: Layer,
        #[source]
        source: CipherError,
    },
    #[error("Decrypted token is not valid UTF-8")]
    InvalidUtf8,
    #[error("Decrypted token is not a valid session document: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Seal/open pair over borrowed key material
#[derive(Clone, Copy)]
pub struct TokenCodec<'a> {
    material: &'a KeyMaterial,
}

impl<'a> TokenCodec<'a> {
    #[must_use]
    pub fn new(material: &'a KeyMaterial) -> Self {
        Self { material }
    }

    /// Encrypt a JSON document into a token
    #[must_use]
    pub fn seal_json(&self, json: &str) -> String {
        let (inner_key, inner_iv) = self.material.inner();
        let inner = INNER_LAYER.encode(json.as_bytes(), inner_key, inner_iv);

        let (outer_key, outer_iv) = self.material.outer();
        let outer = OUTER_LAYER.encode(hex::encode(inner).as_bytes(), outer_key, outer_iv);

        hex::encode(outer)
    }

    /// Decrypt a token back into its JSON document
    pub fn open_json(&self, token: &str) -> Result<String, DecodeError> {
        let outer = hex::decode(token).map_err(|_| DecodeError::InvalidHex(Layer::Outer))?;

        let (outer_key, outer_iv) = self.material.outer();
        let inner_hex = OUTER_LAYER
            .decode(&outer, outer_key, outer_iv)
            .map_err(|source| DecodeError::Cipher { layer: Layer::Outer, source })?;

        let inner = hex::decode(inner_hex).map_err(|_| DecodeError::InvalidHex(Layer::Inner))?;

        let (inner_key, inner_iv) = self.material.inner();
        let plaintext = INNER_LAYER
            .decode(&inner, inner_key, inner_iv)
            .map_err(|source| DecodeError::Cipher { layer: Layer::Inner, source })?;

        String::from_utf8(plaintext).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Serialize and seal a value
    pub fn seal<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(value)?;
        Ok(self.seal_json(&json))
    }

    /// Open a token and parse the JSON document
    pub fn open<T: DeserializeOwned>(&self, token: &str) -> Result<T, DecodeError> {
        let json = self.open_json(token)?;
        Ok(serde_json::from_str(&json)?)
    }
}

// ============================================================
// TESTS
// ============================================================
