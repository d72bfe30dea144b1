//! Shared HTTP request helpers for CLI commands.

use anyhow::{Context, Result};
use serde::Deserialize;

use super::Target;

pub fn base_url(target: &Target) -> String {
    format!("http://{}:{}", target.host, target.http_port)
}

pub async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to musterd at {url}, is it running?"))?
        .json::<T>()
        .await
        .context("failed to parse response")
}

pub async fn get_text(url: &str) -> Result<String> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to musterd at {url}, is it running?"))?
        .text()
        .await
        .context("failed to read response")
}
