//! Cookie Seal demo
//!
//! Walks through a login flow against an in-memory cookie jar:
//! `GET /` (no session), `GET /login` (issue), `GET /` (read back),
//! `GET /login` again (reissue), then replays the stale token and the
//! current token from a different address.
//!
//! Usage: `cargo run --features demo --bin cookie-seal-demo -- [options.json]`
//! Set `RUST_LOG=cookie_seal=debug` to see why requests are rejected.

use std::env;
use std::error::Error;
use std::fs;
use std::net::IpAddr;

use cookie_seal::{
    InMemoryCookieJar, OptionsDocument, RequestContext, SessionManager, SessionOptions,
};
use rand::RngCore;
use serde_json::json;
use tracing::info;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cookie_seal_demo=info".parse()?),
        )
        .init();

    let options = match env::args().nth(1) {
        Some(path) => OptionsDocument::from_json(&fs::read_to_string(path)?)?.into_options()?,
        None => SessionOptions::default(),
    };
    let manager = SessionManager::with_options(options)?;
    info!(token_id_len = manager.token_id().len(), "session manager ready");

    let client = RequestContext::from_addr("127.0.0.1".parse::<IpAddr>()?);
    let stranger = RequestContext::from_addr("198.51.100.23".parse::<IpAddr>()?);
    let mut jar = InMemoryCookieJar::new();

    info!(session = %show(manager.read(&client, &jar)?), "GET /");

    let first = manager.write(&client, &mut jar, &json!({ "Hello": random_hex() }))?;
    info!(outcome = ?first.outcome, token_len = first.token.len(), "GET /login");
    info!(session = %show(manager.read(&client, &jar)?), "GET /");

    let second = manager.write(&client, &mut jar, &json!({ "Hello": random_hex() }))?;
    info!(outcome = ?second.outcome, "GET /login");
    info!(session = %show(manager.read(&client, &jar)?), "GET /");

    let mut stale = InMemoryCookieJar::new();
    stale.insert(manager.token_id(), &first.token, manager.config().cookie().signed);
    info!(session = %show(manager.read(&client, &stale)?), "GET / with superseded token");

    info!(session = %show(manager.read(&stranger, &jar)?), "GET / from another address");
    info!(issued = manager.registry().len(), "done");

    Ok(())
}

fn random_hex() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn show(payload: Option<serde_json::Value>) -> String {
    payload.map_or_else(|| "null".to_string(), |value| value.to_string())
}
