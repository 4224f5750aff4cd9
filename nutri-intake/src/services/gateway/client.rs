//! HTTP client for the workflow engine's message endpoint
//!
//! POST `{base_url}/v1.0/messages/{message_name}?execute=true` with the
//! nomination as JSON body.

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nutri_common::config::BpmConfig;
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

use super::{EligibilityEngine, EngineReply, GatewayError};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct SpiffEngine {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
    rate_limiter: Option<DirectLimiter>,
}

impl SpiffEngine {
    pub fn new(config: &BpmConfig, token: Option<String>) -> Result<Self, GatewayError> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .user_agent(concat!("nutri-intake/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let base = config.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(GatewayError::Config("BPM base URL is empty".to_string()));
        }
        let endpoint = format!(
            "{}/v1.0/messages/{}?execute=true",
            base,
            config.message_name.trim()
        );

        let rate_limiter =
            NonZeroU32::new(config.requests_per_second).map(|n| RateLimiter::direct(Quota::per_second(n)));

        Ok(Self {
            client,
            endpoint,
            token: token.filter(|t| !t.trim().is_empty()),
            timeout,
            rate_limiter,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EligibilityEngine for SpiffEngine {
    async fn submit(&self, payload: &Value) -> Result<EngineReply, GatewayError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let mut request = self.client.post(&self.endpoint).json(payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(self.timeout)
            } else {
                GatewayError::Transport(e.to_string())
            }
        })?;

        let http_status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        debug!(http_status, bytes = text.len(), "Engine replied");

        parse_reply(http_status, &text)
    }
}

/// A non-JSON reply is reported by size only; its text may carry anything.
fn parse_reply(http_status: u16, text: &str) -> Result<EngineReply, GatewayError> {
    let body: Value = serde_json::from_str(text).map_err(|_| GatewayError::Protocol {
        status: http_status,
        message: format!("non-JSON body of {} bytes", text.len()),
    })?;
    Ok(EngineReply { http_status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_and_message() {
        let config = BpmConfig {
            base_url: "https://bpm.example.test/api/".to_string(),
            requests_per_second: 0,
            ..BpmConfig::default()
        };
        let engine = SpiffEngine::new(&config, None).unwrap();
        assert_eq!(
            engine.endpoint(),
            "https://bpm.example.test/api/v1.0/messages/registrar_nutricion?execute=true"
        );
        assert!(engine.rate_limiter.is_none());
    }

    #[test]
    fn non_json_reply_omits_body_text() {
        let err = parse_reply(502, "<html>Bearer secret-token rejected</html>").unwrap_err();
        match &err {
            GatewayError::Protocol { status, message } => {
                assert_eq!(*status, 502);
                assert_eq!(message, "non-JSON body of 41 bytes");
            }
            other => panic!("expected Protocol, got {other:?}"),
        }
        assert!(!err.to_string().contains("secret-token"));

        let reply = parse_reply(200, r#"{"ok": true}"#).unwrap();
        assert_eq!(reply.http_status, 200);
        assert_eq!(reply.body["ok"], true);
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let config = BpmConfig {
            base_url: "  ".to_string(),
            ..BpmConfig::default()
        };
        assert!(matches!(SpiffEngine::new(&config, None), Err(GatewayError::Config(_))));
    }

    #[test]
    fn blank_token_is_dropped() {
        let engine = SpiffEngine::new(&BpmConfig::default(), Some("  ".into())).unwrap();
        assert!(engine.token.is_none());
    }
}
