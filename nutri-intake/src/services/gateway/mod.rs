//! Eligibility Gateway
//!
//! Builds the engine request for a staging row, submits it through an
//! [`EligibilityEngine`], and normalizes the reply into a [`Decision`].
//! The engine call is the only network suspension point of reconciliation
//! and always runs under a timeout.

pub mod client;
pub mod payload;
pub mod redact;
pub mod response;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::{Decision, StagingFields};

pub use client::SpiffEngine;
pub use redact::redact;

/// Technical failures talking to the engine. All of them leave the row
/// retryable.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Eligibility engine unreachable: {0}")]
    Transport(String),

    #[error("Eligibility engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("Eligibility engine returned an unreadable response (HTTP {status}): {message}")]
    Protocol { status: u16, message: String },

    #[error("Eligibility engine client misconfigured: {0}")]
    Config(String),
}

/// Raw engine reply
#[derive(Debug, Clone)]
pub struct EngineReply {
    pub http_status: u16,
    pub body: Value,
}

/// Something that can evaluate a nomination payload
#[async_trait]
pub trait EligibilityEngine: Send + Sync {
    async fn submit(&self, payload: &Value) -> Result<EngineReply, GatewayError>;
}

#[derive(Clone)]
pub struct EligibilityGateway {
    engine: Arc<dyn EligibilityEngine>,
    timeout: Duration,
}

impl EligibilityGateway {
    pub fn new(engine: Arc<dyn EligibilityEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Request body for one row
    pub fn build_request(&self, fields: &StagingFields, batch_year: i32, batch_month: Option<u32>) -> Value {
        payload::build_payload(fields, batch_year, batch_month)
    }

    /// Submit a request and normalize the reply.
    pub async fn evaluate(&self, request: &Value) -> Result<Decision, GatewayError> {
        let reply = tokio::time::timeout(self.timeout, self.engine.submit(request))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))??;

        let decision = response::normalize(reply.http_status, reply.body);
        debug!(
            http_status = reply.http_status,
            permit = decision.permit,
            reason = decision.reason.as_str(),
            instance_id = decision.instance_id.as_deref().unwrap_or("-"),
            "Eligibility decision"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DecisionReason;
    use serde_json::json;

    struct SlowEngine;

    #[async_trait]
    impl EligibilityEngine for SlowEngine {
        async fn submit(&self, _payload: &Value) -> Result<EngineReply, GatewayError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(EngineReply {
                http_status: 200,
                body: json!({}),
            })
        }
    }

    struct FixedEngine(Value);

    #[async_trait]
    impl EligibilityEngine for FixedEngine {
        async fn submit(&self, _payload: &Value) -> Result<EngineReply, GatewayError> {
            Ok(EngineReply {
                http_status: 200,
                body: self.0.clone(),
            })
        }
    }

    #[tokio::test]
    async fn slow_engine_times_out() {
        let gateway = EligibilityGateway::new(Arc::new(SlowEngine), Duration::from_millis(20));
        let result = gateway.evaluate(&json!({})).await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn reply_is_normalized() {
        let engine = FixedEngine(json!({
            "task_data": {"procesamiento_exitoso": true},
            "process_instance": {"id": 3, "status": "complete"}
        }));
        let gateway = EligibilityGateway::new(Arc::new(engine), Duration::from_secs(1));
        let decision = gateway.evaluate(&json!({})).await.unwrap();
        assert!(decision.permit);
        assert_eq!(decision.reason, DecisionReason::Completed);
    }
}
