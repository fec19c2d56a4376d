//! Session configuration
//!
//! `SessionOptions` is what an integrator passes in; `SessionConfig` is the
//! resolved, immutable configuration a `SessionManager` owns. Any key, IV or
//! token id left out of the options is generated from the OS CSPRNG.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::{CipherError, KeyMaterial, LayerIv, LayerKey};
use crate::transport::RequestContext;

/// Random bytes behind a generated token id (hex encoded: 500 characters)
pub const TOKEN_ID_BYTES: usize = 250;

/// Default cookie lifetime: 10 days
pub const DEFAULT_MAX_AGE: Duration = Duration::from_millis(10 * 1000 * 3600 * 24);

/// Error types for building a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Token id must be a non-empty cookie name")]
    InvalidTokenId,
    #[error("Invalid key material: {0}")]
    KeyMaterial(#[from] CipherError),
    #[error("Invalid options document: {0}")]
    Document(#[from] serde_json::Error),
}

/// SameSite attribute of the session cookie
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Attributes the transport applies when setting the session cookie
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookiePolicy {
    /// Cookie lifetime, serialized as milliseconds. `None` = browser session
    #[serde(with = "millis")]
    pub max_age: Option<Duration>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    /// Whether the transport must sign the cookie. Also selects which
    /// incoming cookie map the token is read from
    pub signed: bool,
}

impl CookiePolicy {
    /// Production defaults (10 days, httpOnly, secure, strict, signed)
    pub const DEFAULT: Self = Self {
        max_age: Some(DEFAULT_MAX_AGE),
        http_only: true,
        secure: true,
        same_site: SameSite::Strict,
        signed: true,
    };
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Function from a request to the origin a session is bound to
pub type OriginBinder = Arc<dyn Fn(&RequestContext) -> Option<String> + Send + Sync>;

/// How sessions are bound to the requester that created them
#[derive(Clone, Default)]
pub enum OriginLock {
    /// No origin check
    Disabled,
    /// Bind to the remote network address
    #[default]
    RemoteAddress,
    /// Bind to whatever the given function returns
    Custom(OriginBinder),
}

impl OriginLock {
    /// Wrap a custom binder
    pub fn custom<F>(binder: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(binder))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Origin tag for a request (`None` when disabled)
    #[must_use]
    pub fn origin_tag(&self, ctx: &RequestContext) -> Option<String> {
        match self {
            Self::Disabled => None,
            Self::RemoteAddress => ctx.remote_addr.clone(),
            Self::Custom(binder) => binder(ctx),
        }
    }
}

impl fmt::Debug for OriginLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::RemoteAddress => f.write_str("RemoteAddress"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Constructor options for a `SessionManager`
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub cookie: CookiePolicy,
    pub lock: OriginLock,
    /// Layer keys (0 = outer, 1 = inner); random if `None`
    pub keys: Option<[LayerKey; 2]>,
    /// Layer IVs (0 = outer, 1 = inner); random if `None`
    pub ivs: Option<[LayerIv; 2]>,
    /// Cookie name of the token slot; random if `None`
    pub token_id: Option<String>,
    /// Expire registry entries once the cookie's `max_age` has passed
    pub evict_expired: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cookie: CookiePolicy::default(),
            lock: OriginLock::default(),
            keys: None,
            ivs: None,
            token_id: None,
            evict_expired: true,
        }
    }
}

/// JSON form of `SessionOptions` (keys and IVs as hex strings)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptionsDocument {
    pub cookie: Option<CookiePolicy>,
    /// `false` disables the origin lock; absent or `true` binds to the remote address
    pub lock: Option<bool>,
    pub keys: Option<[String; 2]>,
    pub ivs: Option<[String; 2]>,
    pub token_id: Option<String>,
    pub evict_expired: Option<bool>,
}

impl OptionsDocument {
    /// Parse an options document from JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolve into `SessionOptions`, decoding hex key material
    pub fn into_options(self) -> Result<SessionOptions, ConfigError> {
        let keys = match self.keys {
            Some([k0, k1]) => Some([LayerKey::from_hex(&k0)?, LayerKey::from_hex(&k1)?]),
            None => None,
        };
        let ivs = match self.ivs {
            Some([iv0, iv1]) => Some([LayerIv::from_hex(&iv0)?, LayerIv::from_hex(&iv1)?]),
            None => None,
        };
        let lock = match self.lock {
            Some(false) => OriginLock::Disabled,
            _ => OriginLock::RemoteAddress,
        };

        Ok(SessionOptions {
            cookie: self.cookie.unwrap_or_default(),
            lock,
            keys,
            ivs,
            token_id: self.token_id,
            evict_expired: self.evict_expired.unwrap_or(true),
        })
    }
}

/// Resolved configuration, immutable for the manager's lifetime
#[derive(Debug)]
pub struct SessionConfig {
    token_id: String,
    material: KeyMaterial,
    cookie: CookiePolicy,
    lock: OriginLock,
    evict_expired: bool,
}

impl SessionConfig {
    /// Resolve options, generating any missing key material
    pub fn from_options(options: SessionOptions) -> Result<Self, ConfigError> {
        let token_id = match options.token_id {
            Some(id) if is_cookie_name(&id) => id,
            Some(_) => return Err(ConfigError::InvalidTokenId),
            None => generate_token_id(),
        };

        let generated = KeyMaterial::generate();
        let [outer_key, inner_key] = options
            .keys
            .unwrap_or_else(|| [generated.outer().0.clone(), generated.inner().0.clone()]);
        let [outer_iv, inner_iv] = options
            .ivs
            .unwrap_or_else(|| [generated.outer().1.clone(), generated.inner().1.clone()]);

        Ok(Self {
            token_id,
            material: KeyMaterial::new([outer_key, inner_key], [outer_iv, inner_iv]),
            cookie: options.cookie,
            lock: options.lock,
            evict_expired: options.evict_expired,
        })
    }

    /// Cookie name of the token slot
    #[must_use]
    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    #[must_use]
    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    #[must_use]
    pub fn cookie(&self) -> &CookiePolicy {
        &self.cookie
    }

    #[must_use]
    pub fn lock(&self) -> &OriginLock {
        &self.lock
    }

    /// Registry TTL implied by the cookie policy, if eviction is on
    #[must_use]
    pub fn registry_ttl(&self) -> Option<Duration> {
        if self.evict_expired {
            self.cookie.max_age
        } else {
            None
        }
    }
}

impl Default for SessionConfig {
    /// Fresh random token id and key material with default policy
    fn default() -> Self {
        let SessionOptions { cookie, lock, evict_expired, .. } = SessionOptions::default();
        Self {
            token_id: generate_token_id(),
            material: KeyMaterial::generate(),
            cookie,
            lock,
            evict_expired,
        }
    }
}

/// Random hex token id of `TOKEN_ID_BYTES` bytes
#[must_use]
pub fn generate_token_id() -> String {
    let mut bytes = [0u8; TOKEN_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// RFC 6265 cookie-name check (token characters only)
fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}
