//! WASM bindings for JavaScript HTTP servers
//!
//! This module provides:
//! - A `SessionManager` handle exposed to JavaScript
//! - A `CookieJar` over the request's parsed cookies, passed in as JSON
//! - Set-cookie instructions handed back to JavaScript as JSON
//!
//! The host (e.g. Express middleware with a cookie parser) serializes
//! `{ remoteAddress, cookies, signedCookies }` for each request and applies
//! the returned `{ name, value, options, outcome }` with its own `res.cookie`.
//! `remoteAddress` is taken verbatim from the socket (`req.socket.remoteAddress`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use crate::config::{CookiePolicy, OptionsDocument};
use crate::session::{SessionManager, WriteOutcome};
use crate::transport::{CookieJar, CookieMap, RequestContext};

// ============================================================
// CONSOLE
// ============================================================

#[wasm_bindgen]
extern "C" {
    /// Log to console (for debugging)
    #[wasm_bindgen(js_namespace = console, js_name = "log")]
    fn js_log(s: &str);
}

// ============================================================
// REQUEST JAR (JSON in, JSON out)
// ============================================================

/// Request as serialized by the JavaScript host
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JsRequest {
    remote_address: Option<String>,
    cookies: Option<CookieMap>,
    signed_cookies: Option<CookieMap>,
    attributes: HashMap<String, String>,
}

impl JsRequest {
    fn parse(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("Invalid request: {e}"))
    }

    fn context(&self) -> RequestContext {
        let mut ctx = match &self.remote_address {
            Some(remote) => RequestContext::from_remote(remote.as_str()),
            None => RequestContext::new(),
        };
        ctx.attributes = self.attributes.clone();
        ctx
    }
}

/// Set-cookie instruction returned to the host
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsSetCookie {
    name: String,
    value: String,
    options: CookiePolicy,
    outcome: &'static str,
}

struct JsJar {
    request: JsRequest,
    set: Option<(String, String, CookiePolicy)>,
}

impl JsJar {
    fn new(request: JsRequest) -> Self {
        Self { request, set: None }
    }
}

impl CookieJar for JsJar {
    fn cookies(&self) -> Option<&CookieMap> {
        self.request.cookies.as_ref()
    }

    fn signed_cookies(&self) -> Option<&CookieMap> {
        self.request.signed_cookies.as_ref()
    }

    fn set_cookie(&mut self, name: &str, value: &str, policy: &CookiePolicy) {
        self.set = Some((name.to_string(), value.to_string(), policy.clone()));
    }
}

fn outcome_label(outcome: WriteOutcome) -> &'static str {
    match outcome {
        WriteOutcome::Created => "created",
        WriteOutcome::Updated => "updated",
        WriteOutcome::FellBackToFresh => "fellBackToFresh",
    }
}

fn write_instruction(
    manager: &SessionManager,
    request_json: &str,
    payload_json: &str,
) -> Result<JsSetCookie, String> {
    let payload: serde_json::Value =
        serde_json::from_str(payload_json).map_err(|e| format!("Invalid session data: {e}"))?;
    let request = JsRequest::parse(request_json)?;
    let ctx = request.context();
    let mut jar = JsJar::new(request);

    let receipt = manager.write(&ctx, &mut jar, &payload).map_err(|e| e.to_string())?;

    let (name, value, options) = jar
        .set
        .ok_or_else(|| "Session write produced no cookie".to_string())?;
    Ok(JsSetCookie {
        name,
        value,
        options,
        outcome: outcome_label(receipt.outcome),
    })
}

fn read_payload(manager: &SessionManager, request_json: &str) -> Result<Option<String>, String> {
    let request = JsRequest::parse(request_json)?;
    let ctx = request.context();
    let jar = JsJar::new(request);

    let payload = manager.read(&ctx, &jar).map_err(|e| e.to_string())?;
    Ok(payload.map(|value| value.to_string()))
}

// ============================================================
// WASM EXPORTS - SESSION API
// ============================================================

/// Initialize panic hook for better error messages
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

/// Session manager handle owned by the JavaScript host
#[wasm_bindgen(js_name = "SessionManager")]
pub struct SessionManagerJs {
    inner: SessionManager,
}

#[wasm_bindgen(js_class = "SessionManager")]
impl SessionManagerJs {
    /// Create a manager; `options_json` follows `OptionsDocument`
    #[wasm_bindgen(constructor)]
    pub fn new(options_json: Option<String>) -> Result<SessionManagerJs, JsValue> {
        let inner = match options_json {
            Some(json) => {
                let options = OptionsDocument::from_json(&json)
                    .and_then(OptionsDocument::into_options)
                    .map_err(|e| JsValue::from_str(&e.to_string()))?;
                SessionManager::with_options(options)
                    .map_err(|e| JsValue::from_str(&e.to_string()))?
            }
            None => SessionManager::new(),
        };
        Ok(Self { inner })
    }

    /// Cookie name of the token slot
    #[wasm_bindgen(js_name = "tokenId")]
    pub fn token_id(&self) -> String {
        self.inner.token_id().to_string()
    }

    /// Store a JSON payload; returns the set-cookie instruction as JSON
    pub fn write(&self, request_json: &str, payload_json: &str) -> Result<String, JsValue> {
        let instruction = write_instruction(&self.inner, request_json, payload_json)
            .map_err(|e| JsValue::from_str(&e))?;
        if instruction.outcome == outcome_label(WriteOutcome::FellBackToFresh) {
            js_log("[WASM] Session update failed, issued a fresh session");
        }
        serde_json::to_string(&instruction).map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Session payload as JSON, or `undefined` if there is no valid session
    pub fn read(&self, request_json: &str) -> Result<Option<String>, JsValue> {
        read_payload(&self.inner, request_json).map_err(|e| JsValue::from_str(&e))
    }

    /// Number of live issued tokens (for monitoring)
    #[wasm_bindgen(js_name = "issuedCount")]
    pub fn issued_count(&self) -> usize {
        self.inner.registry().len()
    }
}

/// Get WASM module version (for verification)
#[wasm_bindgen(js_name = "getWasmVersion")]
pub fn get_wasm_version() -> String {
    format!("cookie-seal-v{}", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// TESTS
// ============================================================
