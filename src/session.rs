//! Session read/write protocol.
//!
//! Ties the token codec and the issued-token registry together:
//! - Write: seal a record, register its fingerprint, set the cookie
//! - Reissue: open the current record, replace its payload, re-seal and
//!   supersede the old fingerprint in one step
//! - Read: check registry membership, then open, then check the origin lock
//!
//! # Security Properties
//!
//! - **Registry before cipher**: a token is never decoded unless its
//!   fingerprint is in the registry. Forged tokens are rejected without
//!   running the cipher on attacker-chosen input
//! - **Uniform absence**: a missing, forged, superseded, tampered or foreign
//!   session all read as `None`
//! - **Loud on output**: a missing cookie parser or an unserializable payload
//!   is the caller's bug and is returned as an error

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::codec::{DecodeError, TokenCodec};
use crate::config::{ConfigError, SessionConfig, SessionOptions};
use crate::registry::IssuedTokenRegistry;
use crate::transport::{CookieJar, RequestContext};

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No cookie parser on the transport; install one before using sessions")]
    Configuration,
    #[error("Session payload is not JSON-serializable: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// The document sealed into a token
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Caller payload
    #[serde(rename = "data")]
    pub payload: Value,
    #[serde(rename = "created")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updated")]
    pub updated_at: DateTime<Utc>,
    /// Origin the session was bound to at creation
    #[serde(rename = "lock")]
    pub origin_tag: Option<String>,
}

impl SessionRecord {
    /// Fresh record stamped with the current time
    #[must_use]
    pub fn new(payload: Value, origin_tag: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            payload,
            created_at: now,
            updated_at: now,
            origin_tag,
        }
    }
}

/// How a write produced its token
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No trusted token was present; a new session was issued
    Created,
    /// The trusted current token was reissued with the new payload
    Updated,
    /// A trusted token was present but could not be reissued; a new
    /// session was issued in its place
    FellBackToFresh,
}

/// Result of a successful write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteReceipt {
    pub outcome: WriteOutcome,
    /// Token handed to the transport
    pub token: String,
}

/// What the token slot of a request holds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    /// No token in the slot
    Absent,
    /// A token this manager issued and has not superseded
    Issued,
    /// A token this manager does not recognize
    Unrecognized,
}

#[derive(Debug, thiserror::Error)]
enum ReissueError {
    #[error("could not open current session: {0}")]
    Open(#[from] DecodeError),
    #[error("could not seal updated session: {0}")]
    Seal(#[from] serde_json::Error),
}

/// Owns the configuration and the issued-token registry
///
/// `SessionManager` is `Send + Sync`; share one instance (e.g. behind an
/// `Arc`) across all request handlers of a process.
#[derive(Debug)]
pub struct SessionManager {
    config: SessionConfig,
    registry: IssuedTokenRegistry,
}

impl SessionManager {
    /// Manager with random keys, random token id and default policy
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(SessionConfig::default())
    }

    /// Manager from constructor options
    pub fn with_options(options: SessionOptions) -> Result<Self, SessionError> {
        Ok(Self::from_config(SessionConfig::from_options(options)?))
    }

    /// Manager from a resolved configuration
    #[must_use]
    pub fn from_config(config: SessionConfig) -> Self {
        let registry = IssuedTokenRegistry::with_ttl(config.registry_ttl());
        Self { config, registry }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Cookie name of the token slot
    #[must_use]
    pub fn token_id(&self) -> &str {
        self.config.token_id()
    }

    #[must_use]
    pub fn registry(&self) -> &IssuedTokenRegistry {
        &self.registry
    }

    fn codec(&self) -> TokenCodec<'_> {
        TokenCodec::new(self.config.material())
    }

    /// Token in this manager's slot, from the configured cookie source
    fn current_token<'j, J: CookieJar + ?Sized>(&self, jar: &'j J) -> Option<&'j str> {
        jar.cookie(self.token_id(), self.config.cookie().signed)
    }

    /// Classify the token slot of a request
    pub fn token_state<J: CookieJar + ?Sized>(&self, jar: &J) -> Result<TokenState, SessionError> {
        if !jar.has_cookie_support() {
            return Err(SessionError::Configuration);
        }
        Ok(match self.current_token(jar) {
            None => TokenState::Absent,
            Some(token) if self.registry.is_trusted(token) => TokenState::Issued,
            Some(_) => TokenState::Unrecognized,
        })
    }

    /// Store `payload` in the session
    ///
    /// Reissues the current session if the request carries a trusted token,
    /// otherwise issues a new one bound to the requester's origin. Exactly one
    /// registry mutation and one `set_cookie` happen per successful call.
    pub fn write<J, T>(
        &self,
        ctx: &RequestContext,
        jar: &mut J,
        payload: &T,
    ) -> Result<WriteReceipt, SessionError>
    where
        J: CookieJar + ?Sized,
        T: Serialize + ?Sized,
    {
        if !jar.has_cookie_support() {
            return Err(SessionError::Configuration);
        }
        let payload = serde_json::to_value(payload).map_err(SessionError::Payload)?;

        let mut outcome = WriteOutcome::Created;
        let current = self.current_token(jar).map(str::to_owned);

        if let Some(current) = current.filter(|token| self.registry.is_trusted(token)) {
            match self.reissue(&current, payload.clone()) {
                Ok(token) => {
                    self.registry.supersede(&current, &token);
                    jar.set_cookie(self.token_id(), &token, self.config.cookie());
                    return Ok(WriteReceipt { outcome: WriteOutcome::Updated, token });
                }
                Err(err) => {
                    warn!(error = %err, "error while updating session, issuing a fresh one");
                    outcome = WriteOutcome::FellBackToFresh;
                }
            }
        }

        let record = SessionRecord::new(payload, self.config.lock().origin_tag(ctx));
        let token = self.codec().seal(&record).map_err(SessionError::Payload)?;
        self.registry.register(&token);
        jar.set_cookie(self.token_id(), &token, self.config.cookie());

        Ok(WriteReceipt { outcome, token })
    }

    fn reissue(&self, current: &str, payload: Value) -> Result<String, ReissueError> {
        let codec = self.codec();
        let mut record: SessionRecord = codec.open(current)?;
        record.payload = payload;
        record.updated_at = Utc::now();
        Ok(codec.seal(&record)?)
    }

    /// Full session record for this request, if valid
    ///
    /// Only a missing cookie parser is an error. Every other failure
    /// (no token, unknown token, undecodable token, origin mismatch) reads
    /// as `None`. With the origin lock enabled, a request the binder yields
    /// no origin for never matches, not even a session issued without one.
    pub fn read_record<J: CookieJar + ?Sized>(
        &self,
        ctx: &RequestContext,
        jar: &J,
    ) -> Result<Option<SessionRecord>, SessionError> {
        if !jar.has_cookie_support() {
            return Err(SessionError::Configuration);
        }

        let Some(token) = self.current_token(jar) else {
            return Ok(None);
        };

        if !self.registry.is_trusted(token) {
            debug!("rejected session token that was not issued here");
            return Ok(None);
        }

        let record: SessionRecord = match self.codec().open(token) {
            Ok(record) => record,
            Err(err) => {
                debug!(error = %err, "rejected undecodable session token");
                return Ok(None);
            }
        };

        let lock = self.config.lock();
        if lock.is_enabled() {
            let Some(origin) = lock.origin_tag(ctx) else {
                debug!("rejected session token on a request without an origin");
                return Ok(None);
            };
            if record.origin_tag.as_deref() != Some(origin.as_str()) {
                debug!("rejected session token presented from a different origin");
                return Ok(None);
            }
        }

        Ok(Some(record))
    }

    /// Session payload for this request, if valid
    pub fn read<J: CookieJar + ?Sized>(
        &self,
        ctx: &RequestContext,
        jar: &J,
    ) -> Result<Option<Value>, SessionError> {
        Ok(self.read_record(ctx, jar)?.map(|record| record.payload))
    }

    /// Session payload deserialized as `T`; a payload of another shape reads as `None`
    pub fn read_as<T, J>(&self, ctx: &RequestContext, jar: &J) -> Result<Option<T>, SessionError>
    where
        T: DeserializeOwned,
        J: CookieJar + ?Sized,
    {
        Ok(self
            .read(ctx, jar)?
            .and_then(|payload| serde_json::from_value(payload).ok()))
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// TESTS
// ============================================================
