//! Off-chain metadata referenced by token data URIs.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UriSource {
    Arweave,
    Ipfs,
    Unknown,
}

pub fn classify_uri(uri: &str) -> UriSource {
    let lower = uri.to_ascii_lowercase();
    if uri.contains("arweave.net/") {
        UriSource::Arweave
    } else if lower.starts_with("ipfs://") || lower.contains("ipfs/") {
        UriSource::Ipfs
    } else {
        UriSource::Unknown
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub external_url: Option<String>,
    pub animation_url: Option<String>,
    pub attributes: Value,
}

pub trait MetadataFetcher: Send + Sync {
    /// Metadata behind `uri`, or `None` when it cannot be retrieved or understood.
    fn fetch<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Option<TokenMetadata>>;
}

/// Interprets a response body according to its content type.
pub fn decode_metadata(content_type: Option<&str>, uri: &str, body: &[u8]) -> Option<TokenMetadata> {
    let mime = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())?;

    if mime == "application/json" || mime.ends_with("+json") {
        return serde_json::from_slice(body).ok();
    }
    if mime.starts_with("image/") {
        return Some(TokenMetadata {
            image: Some(uri.to_string()),
            ..TokenMetadata::default()
        });
    }
    None
}

pub struct HttpMetadataFetcher {
    client: reqwest::Client,
    ipfs_gateway: String,
}

impl HttpMetadataFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build metadata HTTP client")?;
        Ok(Self {
            client,
            ipfs_gateway: DEFAULT_IPFS_GATEWAY.to_string(),
        })
    }

    pub fn with_ipfs_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.ipfs_gateway = gateway.into().trim_end_matches('/').to_string();
        self
    }

    /// Rewrites `ipfs://` URIs onto the configured gateway.
    pub fn resolve(&self, uri: &str) -> String {
        match uri.strip_prefix("ipfs://") {
            Some(path) => {
                let path = path.strip_prefix("ipfs/").unwrap_or(path);
                format!("{}/ipfs/{path}", self.ipfs_gateway)
            }
            None => uri.to_string(),
        }
    }

    async fn fetch_inner(&self, uri: &str) -> Result<Option<TokenMetadata>> {
        let url = self.resolve(uri);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {url}"))?;

        Ok(decode_metadata(content_type.as_deref(), &url, &body))
    }
}

impl MetadataFetcher for HttpMetadataFetcher {
    fn fetch<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Option<TokenMetadata>> {
        Box::pin(async move {
            match self.fetch_inner(uri).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::warn!(uri, error = %format!("{err:#}"), "token metadata fetch failed");
                    None
                }
            }
        })
    }
}
