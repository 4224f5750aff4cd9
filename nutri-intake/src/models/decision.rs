//! Normalized eligibility decision

use serde::Serialize;
use serde_json::Value;

use super::staging_row::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    /// Process accepted the nomination and waits for further input
    AwaitingInput,
    /// Process completed without a rejection milestone
    Completed,
    /// Process reached a rejection milestone
    Rejected,
    /// Processing did not succeed and no rejection was reported
    Pending,
    /// Engine reported a fault
    ErrorEnBpm,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::AwaitingInput => "AWAITING_INPUT",
            DecisionReason::Completed => "COMPLETED",
            DecisionReason::Rejected => "REJECTED",
            DecisionReason::Pending => "PENDING",
            DecisionReason::ErrorEnBpm => "ERROR_EN_BPM",
        }
    }

    /// Code stored on the row when this reason blocks creation
    pub fn row_error_code(&self) -> Option<ErrorCode> {
        match self {
            DecisionReason::AwaitingInput | DecisionReason::Completed => None,
            DecisionReason::Rejected => Some(ErrorCode::DpiNoEncontrado),
            DecisionReason::Pending => Some(ErrorCode::BpmPendiente),
            DecisionReason::ErrorEnBpm => Some(ErrorCode::ErrorEnBpm),
        }
    }
}

/// Outcome of one eligibility evaluation
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    /// Whether a case record may be created
    pub permit: bool,
    pub reason: DecisionReason,
    /// Process status as reported (`user_input_required`, `complete`, ...)
    pub status: Option<String>,
    /// Last milestone name as reported
    pub milestone: Option<String>,
    pub instance_id: Option<String>,
    /// Error fields copied verbatim from a fault response
    pub fault: Option<Value>,
    /// Upstream response body
    pub raw_response: Value,
}

impl Decision {
    /// Human-readable status stored on the row
    pub fn status_label(&self) -> String {
        match (&self.status, &self.milestone) {
            (Some(status), Some(milestone)) => format!("{status} ({milestone})"),
            (Some(status), None) => status.clone(),
            (None, Some(milestone)) => milestone.clone(),
            (None, None) => self.reason.as_str().to_string(),
        }
    }

    /// Message stored on the row when creation is not permitted
    pub fn rejection_message(&self) -> String {
        match self.reason {
            DecisionReason::ErrorEnBpm => {
                let detail = self
                    .fault
                    .as_ref()
                    .and_then(|f| {
                        ["detail", "message", "title", "error_code"]
                            .iter()
                            .find_map(|k| f.get(*k).and_then(Value::as_str))
                    })
                    .unwrap_or("engine reported an error");
                format!("Eligibility engine error: {detail}")
            }
            DecisionReason::Rejected => format!(
                "Nomination rejected by eligibility process ({})",
                self.status_label()
            ),
            _ => format!(
                "Eligibility process did not confirm the nomination ({})",
                self.status_label()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decision(reason: DecisionReason) -> Decision {
        Decision {
            permit: false,
            reason,
            status: Some("complete".into()),
            milestone: Some("Rechazado".into()),
            instance_id: None,
            fault: None,
            raw_response: json!({}),
        }
    }

    #[test]
    fn blocking_reasons_map_to_row_codes() {
        assert_eq!(DecisionReason::Rejected.row_error_code(), Some(ErrorCode::DpiNoEncontrado));
        assert_eq!(DecisionReason::ErrorEnBpm.row_error_code(), Some(ErrorCode::ErrorEnBpm));
        assert_eq!(DecisionReason::Pending.row_error_code(), Some(ErrorCode::BpmPendiente));
        assert_eq!(DecisionReason::Completed.row_error_code(), None);
    }

    #[test]
    fn fault_message_uses_detail() {
        let mut d = decision(DecisionReason::ErrorEnBpm);
        d.fault = Some(json!({"status": 400, "detail": "cui invalido"}));
        assert_eq!(d.rejection_message(), "Eligibility engine error: cui invalido");
    }

    #[test]
    fn status_label_combines_status_and_milestone() {
        assert_eq!(decision(DecisionReason::Rejected).status_label(), "complete (Rechazado)");
    }
}
