//! HTTP connectors for the legacy source, the target API and the blob
//! store.
//!
//! All three share [`ApiClient`]: one pooled `reqwest` client per API with
//! an optional bearer token and a per-request timeout.

mod blobs;
mod source;
mod target;

pub use blobs::HttpBlobs;
pub use source::HttpSource;
pub use target::HttpTarget;

use anyhow::{Context, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde_json::Value;
use std::time::Duration;

use crate::config::Endpoint;

/// Keys that wrap list responses.
const LIST_WRAPPERS: &[&str] = &["data", "items", "results"];

/// Thin request builder over one API base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    /// Builds a client whose idle pool holds `max_idle` connections.
    pub fn new(endpoint: &Endpoint, timeout: Duration, max_idle: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(max_idle)
            .user_agent(concat!("eventsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: endpoint.base_url.clone(),
            token: endpoint.token.clone(),
        })
    }

    /// Base URL with `segments` appended, each percent-encoded.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// `Retry-After` in seconds, if the response carries one.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Items of a list response: a bare array or one wrapped in
/// `data`/`items`/`results`.
fn list_items(body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => LIST_WRAPPERS
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            }),
        _ => None,
    }
}

/// Single-entity responses are sometimes wrapped in `data`.
fn unwrap_entity(body: Value) -> Value {
    match body {
        Value::Object(mut map) if !map.contains_key("id") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Identifier rendered as a string; APIs mix numeric and string ids.
fn id_string(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn name_string(value: &Value) -> Option<String> {
    value
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
}
