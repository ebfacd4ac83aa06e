//! Authorization headers for ledger gateways: API-key bearer tokens or
//! HTTP basic credentials.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerAuth {
    None,
    Bearer(String),
    Basic { user: String, password: String },
}

pub(crate) fn build_auth_headers(auth: &LedgerAuth) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let value = match auth {
        LedgerAuth::None => return Ok(headers),
        LedgerAuth::Bearer(token) => format!("Bearer {token}"),
        LedgerAuth::Basic { user, password } => {
            let encoded = BASE64_STANDARD.encode(format!("{user}:{password}"));
            format!("Basic {encoded}")
        }
    };
    let mut value =
        HeaderValue::from_str(&value).context("failed to build Authorization header")?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}
