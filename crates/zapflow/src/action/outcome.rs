use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of dispatching one step to its handler.
///
/// Dispatch never returns an error: handler errors, panics, timeouts and
/// unknown kinds all become [`Outcome::Failure`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The handler completed; `data` is whatever it chose to report.
    Success { data: Value },
    /// The action did not happen (or its result is unknown).
    Failure { reason: String },
}

impl Outcome {
    pub fn success(data: Value) -> Self {
        Outcome::Success { data }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// The `{ success, message?, data? }` shape integrations report in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<Outcome> for ActionResult {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success { data } => ActionResult {
                success: true,
                message: None,
                data: Some(data),
            },
            Outcome::Failure { reason } => ActionResult {
                success: false,
                message: Some(reason),
                data: None,
            },
        }
    }
}

impl From<&Outcome> for ActionResult {
    fn from(outcome: &Outcome) -> Self {
        ActionResult::from(outcome.clone())
    }
}

/// Renders the result as compact JSON.
impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl From<ActionResult> for Outcome {
    fn from(result: ActionResult) -> Self {
        if result.success {
            Outcome::Success {
                data: result.data.unwrap_or(Value::Null),
            }
        } else {
            Outcome::Failure {
                reason: result
                    .message
                    .unwrap_or_else(|| "action reported failure".to_owned()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn failure_serializes_without_data() {
        let result = ActionResult::from(Outcome::failure("smtp rejected"));
        assert_eq!(
            serde_json::to_value(result).unwrap(),
            json!({ "success": false, "message": "smtp rejected" })
        );
    }

    #[test]
    fn unsuccessful_result_without_message_gets_a_reason() {
        let outcome = Outcome::from(ActionResult {
            success: false,
            message: None,
            data: None,
        });
        assert_eq!(outcome, Outcome::failure("action reported failure"));
    }
}
