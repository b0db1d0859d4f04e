use std::net::IpAddr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use shared::{EventType, StoreContext};
use tracing::{debug, warn};

pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Human-verification check run before any order work.
#[async_trait]
pub trait AbuseVerifier: Send + Sync {
    async fn verify(&self, token: Option<&str>, remote_ip: Option<IpAddr>) -> Result<(), String>;
}

/// Used when no verification secret is configured (local development).
pub struct SkipAbuseCheck;

#[async_trait]
impl AbuseVerifier for SkipAbuseCheck {
    async fn verify(&self, _token: Option<&str>, _remote_ip: Option<IpAddr>) -> Result<(), String> {
        Ok(())
    }
}

/// Cloudflare Turnstile `siteverify`. Fails closed: an unreachable verifier
/// rejects the order.
pub struct TurnstileVerifier {
    client: reqwest::Client,
    secret: String,
    verify_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl TurnstileVerifier {
    pub fn new(client: reqwest::Client, secret: String, verify_url: String, timeout: Duration) -> Self {
        Self {
            client,
            secret,
            verify_url,
            timeout,
        }
    }
}

#[async_trait]
impl AbuseVerifier for TurnstileVerifier {
    async fn verify(&self, token: Option<&str>, remote_ip: Option<IpAddr>) -> Result<(), String> {
        let token = match token {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Err("missing verification token".to_string()),
        };

        let mut form = vec![("secret", self.secret.clone()), ("response", token.to_string())];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip.to_string()));
        }

        let response = self
            .client
            .post(&self.verify_url)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                warn!("Verification service unreachable: {}", e);
                "verification service unavailable".to_string()
            })?;

        let body: SiteVerifyResponse = response.json().await.map_err(|e| {
            warn!("Verification service returned an unreadable response: {}", e);
            "verification service unavailable".to_string()
        })?;

        if body.success {
            Ok(())
        } else {
            debug!("Verification rejected: {:?}", body.error_codes);
            Err("token rejected".to_string())
        }
    }
}

/// Best-effort IP → country lookup. Never fails the caller.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn country(&self, ip: IpAddr) -> Option<String>;
}

pub struct NoGeolocation;

#[async_trait]
impl GeoLocator for NoGeolocation {
    async fn country(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}

/// ip-api.com style lookup: `GET {base_url}/{ip}?fields=status,country`.
pub struct IpApiLocator {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl IpApiLocator {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn country(&self, ip: IpAddr) -> Option<String> {
        if !is_public(ip) {
            return None;
        }
        let url = format!("{}/{}?fields=status,country", self.base_url, ip);
        let result = async {
            let body: IpApiResponse = self
                .client
                .get(&url)
                .timeout(self.timeout)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok::<_, reqwest::Error>(body)
        }
        .await;

        match result {
            Ok(body) if body.status.as_deref() != Some("fail") => body.country.filter(|c| !c.is_empty()),
            Ok(_) => None,
            Err(e) => {
                debug!("Geolocation lookup for {} failed: {}", ip, e);
                None
            }
        }
    }
}

fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !(v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()),
        IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
    }
}

/// Input for notification phrasing.
pub struct ComposeRequest<'a> {
    pub event_type: EventType,
    pub store: &'a StoreContext,
    pub payload: &'a serde_json::Value,
}

/// External text generation. Callers fall back to their own templates when
/// this fails.
#[async_trait]
pub trait MessageComposer: Send + Sync {
    async fn compose(&self, request: ComposeRequest<'_>) -> anyhow::Result<String>;
}

pub struct TemplateOnly;

#[async_trait]
impl MessageComposer for TemplateOnly {
    async fn compose(&self, _request: ComposeRequest<'_>) -> anyhow::Result<String> {
        Err(anyhow!("no composer configured"))
    }
}

/// Posts `{event_type, language, store_name, payload}` and expects `{text}`.
pub struct HttpComposer {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ComposeResponse {
    text: String,
}

impl HttpComposer {
    pub fn new(client: reqwest::Client, url: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            url,
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl MessageComposer for HttpComposer {
    async fn compose(&self, request: ComposeRequest<'_>) -> anyhow::Result<String> {
        let mut builder = self.client.post(&self.url).timeout(self.timeout).json(&json!({
            "event_type": request.event_type,
            "language": request.store.language,
            "store_name": request.store.name,
            "payload": request.payload,
        }));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let body: ComposeResponse = builder
            .send()
            .await
            .context("composer request failed")?
            .error_for_status()
            .context("composer returned an error status")?
            .json()
            .await
            .context("composer response was not understood")?;

        let text = body.text.trim();
        if text.is_empty() {
            return Err(anyhow!("composer returned empty text"));
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn turnstile_rejects_missing_token_without_calling_out() {
        let verifier = TurnstileVerifier::new(
            reqwest::Client::new(),
            "secret".to_string(),
            "http://127.0.0.1:9/unused".to_string(),
            Duration::from_millis(100),
        );
        assert!(verifier.verify(None, None).await.is_err());
        assert!(verifier.verify(Some("  "), None).await.is_err());
    }

    #[tokio::test]
    async fn turnstile_fails_closed_when_unreachable() {
        let verifier = TurnstileVerifier::new(
            reqwest::Client::new(),
            "secret".to_string(),
            "http://127.0.0.1:9/siteverify".to_string(),
            Duration::from_millis(200),
        );
        let err = verifier.verify(Some("token"), None).await.unwrap_err();
        assert_eq!(err, "verification service unavailable");
    }

    #[tokio::test]
    async fn private_addresses_are_not_looked_up() {
        let locator = IpApiLocator::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9".to_string(),
            Duration::from_millis(100),
        );
        assert_eq!(locator.country("10.1.2.3".parse().unwrap()).await, None);
        assert_eq!(locator.country("127.0.0.1".parse().unwrap()).await, None);
    }
}
