use std::net::IpAddr;

use axum::http::HeaderMap;
use serde::Deserialize;
use tracing::warn;

// key: pricing-geolocation -> keyless IP to country lookup
#[derive(Clone)]
pub struct GeoLocator {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct GeoResponse {
    #[serde(default)]
    country_code: Option<String>,
}

impl GeoLocator {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Two-letter country code for `ip`. Lookup failures are logged and yield `None`.
    pub async fn country_for_ip(&self, ip: IpAddr) -> Option<String> {
        if is_local(&ip) {
            return None;
        }
        let response = match self
            .client
            .get(format!("{}/{ip}/json/", self.base_url))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), %ip, "geolocation lookup rejected");
                return None;
            }
            Err(err) => {
                warn!(?err, %ip, "geolocation lookup failed");
                return None;
            }
        };
        match response.json::<GeoResponse>().await {
            Ok(body) => body
                .country_code
                .map(|code| code.trim().to_ascii_uppercase())
                .filter(|code| code.len() == 2),
            Err(err) => {
                warn!(?err, %ip, "geolocation response unreadable");
                None
            }
        }
    }
}

fn is_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// First hop of `X-Forwarded-For`, falling back to `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next());
    let real = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok());
    forwarded
        .or(real)
        .and_then(|raw| raw.trim().parse::<IpAddr>().ok())
}
