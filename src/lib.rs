//! Cookie Seal - encrypted, issuance-tracked session cookies
//!
//! This crate turns a JSON-serializable payload into an encrypted token for a
//! client-held cookie and turns a returned token back into session data. It:
//! - Seals tokens with two independently keyed CBC layers (Twofish inside AES)
//! - Trusts a token only if this process issued it (fingerprint registry)
//! - Binds each session to the origin that created it
//! - Zeroizes key material on drop
//!
//! ## Architecture
//!
//! ```text
//! HTTP layer (cookie parsing / signing)
//!     ↓ CookieJar: cookies(), signed_cookies(), set_cookie()
//! SessionManager
//!     ├── SessionConfig (token id, key material, cookie policy, origin lock)
//!     ├── IssuedTokenRegistry (SHA-256 fingerprints, checked before decoding)
//!     └── TokenCodec
//!           ↓ seal / open
//!         CipherLayer::Twofish (inner) → CipherLayer::Aes (outer)
//! ```
//!
//! ## Example
//!
//! ```
//! use cookie_seal::{InMemoryCookieJar, RequestContext, SessionManager};
//! use serde_json::json;
//!
//! let manager = SessionManager::new();
//! let mut jar = InMemoryCookieJar::new();
//! let ctx = RequestContext::from_addr("203.0.113.9".parse().unwrap());
//!
//! manager.write(&ctx, &mut jar, &json!({"user": "alice"})).unwrap();
//! assert_eq!(manager.read(&ctx, &jar).unwrap(), Some(json!({"user": "alice"})));
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod crypto;
pub mod registry;
pub mod session;
pub mod transport;

pub use codec::{DecodeError, Layer, TokenCodec, INNER_LAYER, OUTER_LAYER};
pub use config::{
    generate_token_id, ConfigError, CookiePolicy, OptionsDocument, OriginBinder, OriginLock,
    SameSite, SessionConfig, SessionOptions, DEFAULT_MAX_AGE, TOKEN_ID_BYTES,
};
pub use crypto::{
    CipherError, CipherLayer, KeyMaterial, LayerIv, LayerKey, BLOCK_SIZE, LAYER_IV_SIZE,
    LAYER_KEY_SIZE,
};
pub use registry::{fingerprint, Fingerprint, IssuedTokenRegistry, FINGERPRINT_SIZE};
pub use session::{
    SessionError, SessionManager, SessionRecord, TokenState, WriteOutcome, WriteReceipt,
};
pub use transport::{CookieJar, CookieMap, InMemoryCookieJar, RequestContext, SetCookie};

#[cfg(feature = "wasm")]
mod wasm;

#[cfg(feature = "wasm")]
pub use wasm::*;
