// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Caching weather proxy.
//!
//! Devices poll weather aggressively; responses are cached in the `weather`
//! table so the upstream sees at most one fetch per location per TTL. A
//! stale cache entry is still served when the upstream is down.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::store::Store;
use crate::types::epoch_ms;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WeatherService {
    client: Client,
    upstream: String,
    ttl_ms: i64,
    store: Arc<Store>,
}

/// Pull `postal_code` and `country` out of a raw query string; locations
/// without both fall back to the whole query as the cache key.
fn cache_key(query: &str) -> (String, String) {
    let mut postal_code = None;
    let mut country = None;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("postal_code=") {
            postal_code = Some(value.to_owned());
        } else if let Some(value) = pair.strip_prefix("country=") {
            country = Some(value.to_owned());
        }
    }
    match (postal_code, country) {
        (Some(p), Some(c)) => (p, c),
        (Some(p), None) => (p, String::new()),
        _ => (query.to_owned(), String::new()),
    }
}

impl WeatherService {
    pub fn new(upstream: String, ttl_ms: i64, store: Arc<Store>) -> Self {
        let client = Client::builder().timeout(UPSTREAM_TIMEOUT).build().unwrap_or_default();
        Self { client, upstream: upstream.trim_end_matches('/').to_owned(), ttl_ms, store }
    }

    /// Weather for a raw device query string, cached or fresh.
    pub async fn get(&self, query: &str) -> anyhow::Result<serde_json::Value> {
        let (postal_code, country) = cache_key(query);

        let cached = self.store.get_weather(&postal_code, &country).await.ok().flatten();
        if let Some((fetched_at, ref data)) = cached {
            if epoch_ms() - fetched_at < self.ttl_ms {
                return Ok(data.clone());
            }
        }

        let url = format!("{}/weather/v1?{query}", self.upstream);
        match self.fetch(&url).await {
            Ok(data) => {
                if let Err(e) = self.store.put_weather(&postal_code, &country, &data).await {
                    tracing::warn!(err = %e, "failed to cache weather payload");
                }
                Ok(data)
            }
            Err(e) => {
                // Serve stale data over nothing.
                if let Some((_, data)) = cached {
                    tracing::warn!(err = %e, "weather upstream failed, serving stale cache");
                    return Ok(data);
                }
                Err(e)
            }
        }
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<serde_json::Value> {
        let resp = self.client.get(url).send().await?;
        let value = resp.error_for_status()?.json().await?;
        Ok(value)
    }
}

#[cfg(test)]
#[path = "weather_tests.rs"]
mod tests;
