//! Cookie transport contract.
//!
//! The session core never parses or signs cookies itself. The HTTP layer
//! implements `CookieJar` to hand over the request's parsed cookies and to
//! receive the outgoing `Set-Cookie` instruction:
//! - Express-style middleware (via the `wasm` bindings)
//! - Native HTTP frameworks
//! - In-memory (for testing and the demo harness)
//!
//! # Security Notes
//!
//! - Signature checking of signed cookies is the transport's job. A value in
//!   `signed_cookies()` is assumed to have passed it
//! - `InMemoryCookieJar` performs no signing; it only keeps the signed and
//!   unsigned maps apart

use std::collections::HashMap;
use std::net::IpAddr;

use crate::config::CookiePolicy;

/// Parsed cookies: name -> value
pub type CookieMap = HashMap<String, String>;

/// Request/response cookie access provided by the HTTP layer
pub trait CookieJar {
    /// Unsigned cookies, or `None` if no cookie parser ran for this request
    fn cookies(&self) -> Option<&CookieMap>;

    /// Cookies whose signature the transport verified, or `None` if the
    /// transport does not sign cookies
    fn signed_cookies(&self) -> Option<&CookieMap>;

    /// Queue a cookie on the response
    fn set_cookie(&mut self, name: &str, value: &str, policy: &CookiePolicy);

    /// Whether the transport supplied cookie parsing support at all
    fn has_cookie_support(&self) -> bool {
        self.cookies().is_some() || self.signed_cookies().is_some()
    }

    /// Look up `name` in the signed or unsigned map
    fn cookie(&self, name: &str, signed: bool) -> Option<&str> {
        let map = if signed { self.signed_cookies() } else { self.cookies() };
        map?.get(name).map(String::as_str)
    }
}

/// Per-request attributes available to origin binders
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Remote address of the client exactly as the socket layer reported it
    /// (IPv6 zone ids and non-IP socket labels are kept verbatim)
    pub remote_addr: Option<String>,
    /// Extra request attributes (header values, client hints, ...)
    pub attributes: HashMap<String, String>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a request from `addr`
    #[must_use]
    pub fn from_addr(addr: IpAddr) -> Self {
        Self::from_remote(addr.to_string())
    }

    /// Context for a request whose remote address is an opaque socket label
    ///
    /// An empty label is treated as no address.
    #[must_use]
    pub fn from_remote(remote: impl Into<String>) -> Self {
        let remote = remote.into();
        Self {
            remote_addr: (!remote.is_empty()).then_some(remote),
            attributes: HashMap::new(),
        }
    }

    /// Add an attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A cookie written through `set_cookie`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub policy: CookiePolicy,
}

/// In-memory cookie jar for testing
///
/// Behaves like a browser and a cookie parser in one: cookies set on the
/// response are stored in the signed or unsigned map according to the policy
/// and show up on the next request that uses the same jar.
#[derive(Clone, Debug)]
pub struct InMemoryCookieJar {
    cookies: Option<CookieMap>,
    signed_cookies: Option<CookieMap>,
    /// Every cookie written, oldest first (for testing write counts)
    set_log: Vec<SetCookie>,
}

impl InMemoryCookieJar {
    /// Jar with both cookie maps available and empty
    #[must_use]
    pub fn new() -> Self {
        Self {
            cookies: Some(CookieMap::new()),
            signed_cookies: Some(CookieMap::new()),
            set_log: Vec::new(),
        }
    }

    /// Jar that only parses unsigned cookies
    #[must_use]
    pub fn unsigned_only() -> Self {
        Self {
            signed_cookies: None,
            ..Self::new()
        }
    }

    /// Jar with no cookie parsing support at all
    #[must_use]
    pub fn without_parser() -> Self {
        Self {
            cookies: None,
            signed_cookies: None,
            set_log: Vec::new(),
        }
    }

    /// Place a cookie on the incoming side, as if the client sent it
    pub fn insert(&mut self, name: &str, value: &str, signed: bool) {
        let map = if signed { &mut self.signed_cookies } else { &mut self.cookies };
        map.get_or_insert_with(CookieMap::new)
            .insert(name.to_string(), value.to_string());
    }

    /// Remove a cookie from both incoming maps
    pub fn remove(&mut self, name: &str) {
        for map in [&mut self.cookies, &mut self.signed_cookies].into_iter().flatten() {
            map.remove(name);
        }
    }

    /// Get a cookie value from either incoming map (signed first)
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookie(name, true).or_else(|| self.cookie(name, false))
    }

    /// Most recent cookie written through `set_cookie`
    #[must_use]
    pub fn last_set(&self) -> Option<&SetCookie> {
        self.set_log.last()
    }

    /// Number of `set_cookie` calls (for testing)
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.set_log.len()
    }
}

impl Default for InMemoryCookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieJar for InMemoryCookieJar {
    fn cookies(&self) -> Option<&CookieMap> {
        self.cookies.as_ref()
    }

    fn signed_cookies(&self) -> Option<&CookieMap> {
        self.signed_cookies.as_ref()
    }

    fn set_cookie(&mut self, name: &str, value: &str, policy: &CookiePolicy) {
        self.insert(name, value, policy.signed);
        self.set_log.push(SetCookie {
            name: name.to_string(),
            value: value.to_string(),
            policy: policy.clone(),
        });
    }
}
