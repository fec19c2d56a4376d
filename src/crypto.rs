//! Cipher layers for session token sealing.
//!
//! Two independent block ciphers in CBC mode with PKCS#7 padding:
//! - Twofish-256-CBC (inner layer)
//! - AES-256-CBC (outer layer)
//!
//! # Security Properties
//!
//! - **Zeroize on drop**: `LayerKey` and `LayerIv` implement `ZeroizeOnDrop`
//!   so key material is cleared when a manager is dropped
//! - **No authentication**: CBC without a MAC is malleable. Token integrity
//!   comes from the issued-token registry, not from these primitives
//! - **Fresh material**: keys and IVs come from `OsRng` unless the integrator
//!   supplies them

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key size for both layers (256-bit keys)
pub const LAYER_KEY_SIZE: usize = 32;

/// IV size for both layers (both ciphers have a 128-bit block)
pub const LAYER_IV_SIZE: usize = 16;

/// Cipher block size in bytes
pub const BLOCK_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type TwofishCbcEnc = cbc::Encryptor<twofish::Twofish>;
type TwofishCbcDec = cbc::Decryptor<twofish::Twofish>;

/// Error types for cipher operations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("Invalid key length: expected {LAYER_KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("Invalid IV length: expected {LAYER_IV_SIZE} bytes, got {0}")]
    InvalidIvLength(usize),
    #[error("Invalid hex encoding")]
    InvalidHex,
    #[error("Ciphertext length is not a positive multiple of the block size")]
    InvalidLength,
    #[error("Invalid padding")]
    InvalidPadding,
}

/// Symmetric key for one cipher layer (32 bytes)
/// Automatically zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct LayerKey([u8; LAYER_KEY_SIZE]);

impl LayerKey {
    /// Generate a fresh key from the OS CSPRNG
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; LAYER_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Wrap raw key bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; LAYER_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy a key out of a slice, rejecting any length other than 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; LAYER_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    /// Parse a key from 64 hex characters
    pub fn from_hex(encoded: &str) -> Result<Self, CipherError> {
        let mut bytes = hex::decode(encoded).map_err(|_| CipherError::InvalidHex)?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }

    /// Get the key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; LAYER_KEY_SIZE] {
        &self.0
    }
}

impl Clone for LayerKey {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl std::fmt::Debug for LayerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LayerKey(..)")
    }
}

/// Initialization vector for one cipher layer (16 bytes)
/// Automatically zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct LayerIv([u8; LAYER_IV_SIZE]);

impl LayerIv {
    /// Generate a fresh IV from the OS CSPRNG
    #[must_use]
    pub fn generate() -> Self {
        let mut iv = [0u8; LAYER_IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        Self(iv)
    }

    /// Wrap raw IV bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; LAYER_IV_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy an IV out of a slice, rejecting any length other than 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        let iv: [u8; LAYER_IV_SIZE] = bytes
            .try_into()
            .map_err(|_| CipherError::InvalidIvLength(bytes.len()))?;
        Ok(Self(iv))
    }

    /// Parse an IV from 32 hex characters
    pub fn from_hex(encoded: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(encoded).map_err(|_| CipherError::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    /// Get the IV bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; LAYER_IV_SIZE] {
        &self.0
    }
}

impl Clone for LayerIv {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl std::fmt::Debug for LayerIv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LayerIv(..)")
    }
}

/// Key and IV material for both layers.
///
/// Index 0 belongs to the outer layer, index 1 to the inner layer.
#[derive(Clone, Debug)]
pub struct KeyMaterial {
    keys: [LayerKey; 2],
    ivs: [LayerIv; 2],
}

impl KeyMaterial {
    /// Build from explicit keys and IVs
    #[must_use]
    pub fn new(keys: [LayerKey; 2], ivs: [LayerIv; 2]) -> Self {
        Self { keys, ivs }
    }

    /// Fresh random keys and IVs for both layers
    #[must_use]
    pub fn generate() -> Self {
        Self {
            keys: [LayerKey::generate(), LayerKey::generate()],
            ivs: [LayerIv::generate(), LayerIv::generate()],
        }
    }

    #[must_use]
    pub fn outer(&self) -> (&LayerKey, &LayerIv) {
        (&self.keys[0], &self.ivs[0])
    }

    #[must_use]
    pub fn inner(&self) -> (&LayerKey, &LayerIv) {
        (&self.keys[1], &self.ivs[1])
    }
}

/// A keyed, IV-parameterized block cipher in CBC mode.
///
/// Encoding is deterministic for a given key and IV. There is no MAC, so
/// `decode` only detects tampering when it breaks the padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherLayer {
    /// Twofish with a 256-bit key
    Twofish,
    /// AES with a 256-bit key
    Aes,
}

impl CipherLayer {
    /// Encrypt `plaintext` with PKCS#7 padding
    ///
    /// Output length is the next multiple of 16 strictly above the input length.
    #[must_use]
    pub fn encode(self, plaintext: &[u8], key: &LayerKey, iv: &LayerIv) -> Vec<u8> {
        let (key, iv) = (key.as_bytes().into(), iv.as_bytes().into());
        match self {
            Self::Twofish => {
                TwofishCbcEnc::new(key, iv).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
            }
            Self::Aes => Aes256CbcEnc::new(key, iv).encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        }
    }

    /// Decrypt `ciphertext` and strip PKCS#7 padding
    pub fn decode(
        self,
        ciphertext: &[u8],
        key: &LayerKey,
        iv: &LayerIv,
    ) -> Result<Vec<u8>, CipherError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::InvalidLength);
        }

        let (key, iv) = (key.as_bytes().into(), iv.as_bytes().into());
        let decrypted = match self {
            Self::Twofish => {
                TwofishCbcDec::new(key, iv).decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            }
            Self::Aes => Aes256CbcDec::new(key, iv).decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        decrypted.map_err(|_| CipherError::InvalidPadding)
    }

    /// Encrypt with key and IV given as raw slices, validating their lengths
    pub fn encode_with_slices(
        self,
        plaintext: &[u8],
        key: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let key = LayerKey::from_slice(key)?;
        let iv = LayerIv::from_slice(iv)?;
        Ok(self.encode(plaintext, &key, &iv))
    }

    /// Decrypt with key and IV given as raw slices, validating their lengths
    pub fn decode_with_slices(
        self,
        ciphertext: &[u8],
        key: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let key = LayerKey::from_slice(key)?;
        let iv = LayerIv::from_slice(iv)?;
        self.decode(ciphertext, &key, &iv)
    }
}

// ============================================================
// TESTS
// ============================================================
