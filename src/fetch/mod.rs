//! HTTP plumbing shared by every provider.

pub mod auth;
mod basic;
mod client;
pub mod fallback;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;

/// GETs `url` and returns the body, treating any non-2xx status as an error.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    }
    Ok(resp.bytes().await?.to_vec())
}

pub async fn fetch_json<T, C>(client: &C, url: &str) -> Result<T>
where
    T: DeserializeOwned,
    C: HttpClient + ?Sized,
{
    let bytes = fetch_bytes(client, url).await?;
    serde_json::from_slice(&bytes).with_context(|| format!("malformed JSON from {url}"))
}

/// Loads a local file path or fetches it over HTTP.
#[tracing::instrument(skip(client), fields(source = %source))]
pub async fn load_source<C: HttpClient + ?Sized>(client: &C, source: &str) -> Result<Vec<u8>> {
    let bytes = if source.starts_with("http") {
        fetch_bytes(client, source).await?
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("failed to read {source}"))?
    };
    Ok(bytes)
}
