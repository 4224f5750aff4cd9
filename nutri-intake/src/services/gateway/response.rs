//! Engine response normalization
//!
//! Engine versions disagree on key names and wrapper nesting. A response is
//! first classified into one of a few known shapes, reading each field from
//! a short list of alternate keys, then the shape is mapped to a
//! [`Decision`].

use nutri_common::text::fold_diacritics;
use serde_json::{Map, Value};

use crate::models::{Decision, DecisionReason};

const STATUS_CODE_KEYS: &[&str] = &["status", "status_code", "statusCode", "http_status"];
const ERROR_CODE_KEYS: &[&str] = &["error_code", "errorCode"];
const ERROR_TYPE_KEYS: &[&str] = &["error_type", "errorType"];
const TITLE_KEYS: &[&str] = &["title"];
const DETAIL_KEYS: &[&str] = &["detail", "details"];
const MESSAGE_KEYS: &[&str] = &["message", "error_message", "msg"];
const TASK_DATA_KEYS: &[&str] = &["task_data", "taskData", "data"];
const SUCCESS_KEYS: &[&str] = &[
    "procesamiento_exitoso",
    "processing_succeeded",
    "processingSucceeded",
    "success",
    "exito",
];
const INSTANCE_KEYS: &[&str] = &["process_instance", "processInstance", "instance"];
const INSTANCE_STATUS_KEYS: &[&str] = &["status", "process_status"];
const MILESTONE_KEYS: &[&str] = &[
    "last_milestone_bpmn_name",
    "lastMilestoneBpmnName",
    "last_milestone",
    "milestone",
];
const INSTANCE_ID_KEYS: &[&str] = &["id", "process_instance_id"];
const WRAPPER_KEYS: &[&str] = &["data", "result", "body", "response"];

const UNEXPECTED_WORKFLOW_TITLE: &str = "unexpected workflow exception";
const AWAITING_STATUSES: &[&str] = &["user_input_required", "waiting"];
const COMPLETE_STATUSES: &[&str] = &["complete", "completed"];

/// Error fields of a fault response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultEnvelope {
    pub http_status: u16,
    pub status: Option<i64>,
    pub error_code: Option<String>,
    pub error_type: Option<String>,
    pub title: Option<String>,
    pub detail: Option<String>,
    pub message: Option<String>,
    /// Service error embedded as JSON inside `detail` or `message`
    pub embedded: Option<Value>,
}

impl FaultEnvelope {
    fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("http_status".into(), Value::from(self.http_status));
        let optional = [
            ("status", self.status.map(Value::from)),
            ("error_code", self.error_code.clone().map(Value::String)),
            ("error_type", self.error_type.clone().map(Value::String)),
            ("title", self.title.clone().map(Value::String)),
            ("detail", self.detail.clone().map(Value::String)),
            ("message", self.message.clone().map(Value::String)),
            ("embedded_error", self.embedded.clone()),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                out.insert(key.into(), value);
            }
        }
        Value::Object(out)
    }
}

/// Process instance fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceInfo {
    pub id: Option<String>,
    pub status: Option<String>,
    pub milestone: Option<String>,
}

impl InstanceInfo {
    fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            id: first_scalar(obj, INSTANCE_ID_KEYS),
            status: first_string(obj, INSTANCE_STATUS_KEYS),
            milestone: first_string(obj, MILESTONE_KEYS),
        }
    }

    fn is_empty(&self) -> bool {
        self.id.is_none() && self.status.is_none() && self.milestone.is_none()
    }
}

/// Known response shapes
#[derive(Debug, Clone, PartialEq)]
pub enum EngineResponse {
    /// Top-level error envelope
    Fault(FaultEnvelope),
    /// Message reply carrying task data and a nested process instance
    MessageReply {
        processing_succeeded: Option<bool>,
        instance: InstanceInfo,
    },
    /// Process instance fields at the top level
    FlatInstance {
        processing_succeeded: Option<bool>,
        instance: InstanceInfo,
    },
    Unknown,
}

impl EngineResponse {
    pub fn classify(http_status: u16, body: &Value) -> Self {
        let Some(top) = body.as_object() else {
            return if http_status >= 400 {
                EngineResponse::Fault(FaultEnvelope {
                    http_status,
                    ..FaultEnvelope::default()
                })
            } else {
                EngineResponse::Unknown
            };
        };

        if let Some(fault) = detect_fault(http_status, top) {
            return EngineResponse::Fault(fault);
        }

        let envelope = unwrap_envelope(top);

        let task_data = TASK_DATA_KEYS
            .iter()
            .find_map(|k| envelope.get(*k).and_then(Value::as_object));
        let processing_succeeded = task_data
            .and_then(|td| first_bool(td, SUCCESS_KEYS))
            .or_else(|| first_bool(envelope, SUCCESS_KEYS));

        let nested_instance = INSTANCE_KEYS
            .iter()
            .find_map(|k| envelope.get(*k).and_then(Value::as_object));

        if let Some(instance) = nested_instance {
            return EngineResponse::MessageReply {
                processing_succeeded,
                instance: InstanceInfo::from_object(instance),
            };
        }
        if task_data.is_some() && processing_succeeded.is_some() {
            return EngineResponse::MessageReply {
                processing_succeeded,
                instance: InstanceInfo::default(),
            };
        }

        let flat = InstanceInfo::from_object(envelope);
        if flat.status.is_some() || flat.milestone.is_some() {
            return EngineResponse::FlatInstance {
                processing_succeeded,
                instance: flat,
            };
        }

        EngineResponse::Unknown
    }
}

/// Classify a reply and map it to a decision.
pub fn normalize(http_status: u16, body: Value) -> Decision {
    let classified = EngineResponse::classify(http_status, &body);

    match classified {
        EngineResponse::Fault(fault) => Decision {
            permit: false,
            reason: DecisionReason::ErrorEnBpm,
            status: fault.status.map(|s| s.to_string()).or(Some(http_status.to_string())),
            milestone: None,
            instance_id: None,
            fault: Some(fault.to_json()),
            raw_response: body,
        },
        EngineResponse::MessageReply {
            processing_succeeded,
            instance,
        }
        | EngineResponse::FlatInstance {
            processing_succeeded,
            instance,
        } => {
            let reason = decide(processing_succeeded, &instance);
            Decision {
                permit: matches!(reason, DecisionReason::AwaitingInput | DecisionReason::Completed),
                reason,
                status: instance.status,
                milestone: instance.milestone,
                instance_id: instance.id,
                fault: None,
                raw_response: body,
            }
        }
        EngineResponse::Unknown => Decision {
            permit: false,
            reason: DecisionReason::Pending,
            status: None,
            milestone: None,
            instance_id: None,
            fault: None,
            raw_response: body,
        },
    }
}

fn decide(processing_succeeded: Option<bool>, instance: &InstanceInfo) -> DecisionReason {
    if processing_succeeded != Some(true) || instance.is_empty() {
        return DecisionReason::Pending;
    }
    if instance.milestone.as_deref().is_some_and(is_rejection_milestone) {
        return DecisionReason::Rejected;
    }

    let status = instance
        .status
        .as_deref()
        .map(|s| s.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if AWAITING_STATUSES.contains(&status.as_str()) {
        DecisionReason::AwaitingInput
    } else if COMPLETE_STATUSES.contains(&status.as_str()) {
        DecisionReason::Completed
    } else {
        DecisionReason::Pending
    }
}

fn is_rejection_milestone(milestone: &str) -> bool {
    let folded = fold_diacritics(milestone);
    folded.contains("RECHAZ") || folded.contains("REJECT")
}

fn detect_fault(http_status: u16, obj: &Map<String, Value>) -> Option<FaultEnvelope> {
    let status = STATUS_CODE_KEYS.iter().find_map(|k| obj.get(*k).and_then(numeric_status));
    let error_code = first_scalar(obj, ERROR_CODE_KEYS);
    let error_type = first_string(obj, ERROR_TYPE_KEYS);
    let title = first_string(obj, TITLE_KEYS);
    let detail = first_string(obj, DETAIL_KEYS);
    let message = first_string(obj, MESSAGE_KEYS);

    let unexpected_title = title
        .as_deref()
        .is_some_and(|t| t.to_ascii_lowercase().contains(UNEXPECTED_WORKFLOW_TITLE));

    let is_fault = http_status >= 400
        || status.is_some_and(|s| s >= 400)
        || error_code.is_some()
        || error_type.is_some()
        || unexpected_title;
    if !is_fault {
        return None;
    }

    let embedded = detail
        .as_deref()
        .and_then(extract_embedded_json)
        .or_else(|| message.as_deref().and_then(extract_embedded_json));

    Some(FaultEnvelope {
        http_status,
        status,
        error_code,
        error_type,
        title,
        detail,
        message,
        embedded,
    })
}

/// Recover a JSON object embedded in free text: the span from the first `{`
/// to the last `}`, if it parses as an object.
pub fn extract_embedded_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Descend through single-purpose wrappers (`data`, `result`, ...) until an
/// object carries something recognisable.
fn unwrap_envelope(obj: &Map<String, Value>) -> &Map<String, Value> {
    let mut current = obj;
    for _ in 0..3 {
        if recognisable(current) {
            break;
        }
        match WRAPPER_KEYS
            .iter()
            .find_map(|k| current.get(*k).and_then(Value::as_object))
        {
            Some(inner) => current = inner,
            None => break,
        }
    }
    current
}

fn recognisable(obj: &Map<String, Value>) -> bool {
    INSTANCE_KEYS.iter().any(|k| obj.get(*k).is_some_and(Value::is_object))
        || SUCCESS_KEYS.iter().any(|k| obj.contains_key(*k))
        || MILESTONE_KEYS.iter().any(|k| obj.contains_key(*k))
        || ["task_data", "taskData"].iter().any(|k| obj.contains_key(*k))
        || first_string(obj, INSTANCE_STATUS_KEYS).is_some()
}

fn numeric_status(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.parse::<i64>().is_err())
        .map(str::to_string)
}

fn first_scalar(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn first_bool(obj: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| match obj.get(*k) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "si" | "sí" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_status_400_is_fault() {
        let d = normalize(200, json!({"status": 400, "detail": "payload invalido"}));
        assert!(!d.permit);
        assert_eq!(d.reason, DecisionReason::ErrorEnBpm);
        let fault = d.fault.unwrap();
        assert_eq!(fault["status"], 400);
        assert_eq!(fault["detail"], "payload invalido");
    }

    #[test]
    fn error_code_alone_is_fault() {
        let d = normalize(200, json!({"errorCode": "message_not_accepted"}));
        assert_eq!(d.reason, DecisionReason::ErrorEnBpm);
        assert_eq!(d.fault.unwrap()["error_code"], "message_not_accepted");
    }

    #[test]
    fn unexpected_workflow_title_is_fault_with_embedded_error() {
        let body = json!({
            "title": "Unexpected Workflow Exception",
            "message": "Service task failed: {\"error\": \"RENAP timeout\", \"code\": 504} while running"
        });
        let d = normalize(200, body);
        assert_eq!(d.reason, DecisionReason::ErrorEnBpm);
        let fault = d.fault.unwrap();
        assert_eq!(fault["embedded_error"]["error"], "RENAP timeout");
        assert_eq!(fault["embedded_error"]["code"], 504);
    }

    #[test]
    fn http_error_with_json_body_is_fault() {
        let d = normalize(500, json!({"detail": "boom"}));
        assert_eq!(d.reason, DecisionReason::ErrorEnBpm);
        assert_eq!(d.fault.unwrap()["http_status"], 500);
    }

    #[test]
    fn awaiting_input_permits_creation() {
        let body = json!({
            "task_data": {"procesamiento_exitoso": true},
            "process_instance": {"id": 981, "status": "user_input_required", "last_milestone_bpmn_name": "Validado"}
        });
        let d = normalize(200, body);
        assert!(d.permit);
        assert_eq!(d.reason, DecisionReason::AwaitingInput);
        assert_eq!(d.instance_id.as_deref(), Some("981"));
        assert_eq!(d.milestone.as_deref(), Some("Validado"));
    }

    #[test]
    fn completed_permits_creation_with_camel_case_keys() {
        let body = json!({
            "taskData": {"processingSucceeded": true},
            "processInstance": {"id": "abc", "status": "complete", "lastMilestoneBpmnName": "Fin"}
        });
        let d = normalize(200, body);
        assert!(d.permit);
        assert_eq!(d.reason, DecisionReason::Completed);
    }

    #[test]
    fn rejection_milestone_wins_over_success() {
        let body = json!({
            "task_data": {"procesamiento_exitoso": true},
            "process_instance": {"status": "complete", "last_milestone_bpmn_name": "DPI Rechazado"}
        });
        let d = normalize(200, body);
        assert!(!d.permit);
        assert_eq!(d.reason, DecisionReason::Rejected);
    }

    #[test]
    fn unsuccessful_processing_is_pending() {
        let body = json!({
            "task_data": {"procesamiento_exitoso": false},
            "process_instance": {"status": "complete"}
        });
        let d = normalize(200, body);
        assert!(!d.permit);
        assert_eq!(d.reason, DecisionReason::Pending);
    }

    #[test]
    fn rejection_milestone_without_success_is_pending() {
        let body = json!({
            "task_data": {"procesamiento_exitoso": false},
            "process_instance": {"status": "complete", "last_milestone_bpmn_name": "DPI Rechazado"}
        });
        let d = normalize(200, body);
        assert!(!d.permit);
        assert_eq!(d.reason, DecisionReason::Pending);
        assert_eq!(d.milestone.as_deref(), Some("DPI Rechazado"));

        let flat = json!({"id": 5, "status": "complete", "last_milestone_bpmn_name": "Rechazado"});
        assert_eq!(normalize(200, flat).reason, DecisionReason::Pending);
    }

    #[test]
    fn wrapped_reply_is_unwrapped() {
        let body = json!({
            "result": {
                "data": {"success": "true"},
                "instance": {"process_instance_id": 7, "process_status": "waiting"}
            }
        });
        let d = normalize(200, body);
        assert_eq!(d.reason, DecisionReason::AwaitingInput);
        assert_eq!(d.instance_id.as_deref(), Some("7"));
    }

    #[test]
    fn flat_instance_is_read_from_top_level() {
        let body = json!({"id": 12, "status": "complete", "success": true});
        match EngineResponse::classify(200, &body) {
            EngineResponse::FlatInstance { instance, processing_succeeded } => {
                assert_eq!(instance.status.as_deref(), Some("complete"));
                assert_eq!(processing_succeeded, Some(true));
            }
            other => panic!("expected FlatInstance, got {other:?}"),
        }
        assert_eq!(normalize(200, body).reason, DecisionReason::Completed);
    }

    #[test]
    fn unknown_shape_is_pending() {
        let d = normalize(200, json!({"hello": "world"}));
        assert!(!d.permit);
        assert_eq!(d.reason, DecisionReason::Pending);
        assert_eq!(EngineResponse::classify(200, &json!([1, 2])), EngineResponse::Unknown);
    }

    #[test]
    fn embedded_json_requires_an_object() {
        assert_eq!(extract_embedded_json("no braces here"), None);
        assert_eq!(extract_embedded_json("} backwards {"), None);
        assert_eq!(extract_embedded_json("x {not json} y"), None);
        assert!(extract_embedded_json("x {\"a\": 1} y").is_some());
    }
}
