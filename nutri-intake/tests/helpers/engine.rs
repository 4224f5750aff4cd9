//! Scripted eligibility engine

use async_trait::async_trait;
use nutri_intake::services::{
    EligibilityEngine, EligibilityGateway, EngineReply, GatewayError, Reconciler, ReconcilerSettings,
    SqliteCatalogLookup,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Script = dyn Fn(&Value) -> Result<EngineReply, GatewayError> + Send + Sync;

/// Engine double that answers from a closure and records every payload
pub struct ScriptedEngine {
    script: Box<Script>,
    delay: Duration,
    calls: AtomicUsize,
    payloads: Mutex<Vec<Value>>,
}

/// Message reply for a nomination accepted by the process
pub fn approved_body(instance_id: i64) -> Value {
    json!({
        "task_data": { "procesamiento_exitoso": true },
        "process_instance": {
            "id": instance_id,
            "status": "user_input_required",
            "last_milestone_bpmn_name": "Nominacion recibida"
        }
    })
}

impl ScriptedEngine {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&Value) -> Result<EngineReply, GatewayError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn approving() -> Self {
        Self::new(|_| {
            Ok(EngineReply {
                http_status: 200,
                body: approved_body(4242),
            })
        })
    }

    pub fn replying(http_status: u16, body: Value) -> Self {
        Self::new(move |_| {
            Ok(EngineReply {
                http_status,
                body: body.clone(),
            })
        })
    }

    pub fn unreachable() -> Self {
        Self::new(|_| Err(GatewayError::Transport("connection refused".to_string())))
    }

    /// Hold every reply for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl EligibilityEngine for ScriptedEngine {
    async fn submit(&self, payload: &Value) -> Result<EngineReply, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.script)(payload)
    }
}

pub fn build_reconciler(pool: &SqlitePool, engine: Arc<dyn EligibilityEngine>) -> Reconciler {
    build_reconciler_with(pool, engine, ReconcilerSettings::default())
}

pub fn build_reconciler_with(
    pool: &SqlitePool,
    engine: Arc<dyn EligibilityEngine>,
    settings: ReconcilerSettings,
) -> Reconciler {
    let gateway = EligibilityGateway::new(engine, Duration::from_secs(5));
    Reconciler::new(
        pool.clone(),
        gateway,
        Arc::new(SqliteCatalogLookup::new(pool.clone())),
        settings,
    )
}
