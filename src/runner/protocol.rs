//! Runner wire protocol
//!
//! The envelope for the uniform request/reply exchange every runner
//! implements: `Action`, `Assert`, and `Healthcheck`. Action and assert
//! params travel as JSON-encoded strings inside the envelope so runners in
//! any language can implement the contract without sharing the engine's
//! type system. The engine never branches on an action or assert `type`;
//! only the runner maps verbs to behavior.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::workflow::{ActionDef, AssertDef};

use super::RunnerError;

pub const METHOD_ACTION: &str = "Action";
pub const METHOD_ASSERT: &str = "Assert";
pub const METHOD_HEALTHCHECK: &str = "Healthcheck";

/// Request envelope sent to a runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub method: String,
    pub payload: Value,
}

/// Reply envelope returned by a runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireReply {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<WireError>,
}

/// Application-level error reported by a runner; never retried
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: i32,
    pub message: String,
}

/// Decoded reply of an assert call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertResult {
    pub passed: bool,
    pub actual: Value,
    pub expected: Value,
    pub description: String,
}

/// Encode a params value as the portable JSON-string payload form
pub fn encode_params(params: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(params)
}

/// Decode a JSON-string payload back into a structured value.
///
/// Runners reply with `null` or omit fields they have nothing to say about.
pub fn decode_payload(payload: &Value) -> Result<Value, serde_json::Error> {
    match payload {
        Value::String(s) if !s.is_empty() => serde_json::from_str(s),
        _ => Ok(Value::Null),
    }
}

pub fn action_request(action: &ActionDef) -> Result<WireRequest, serde_json::Error> {
    Ok(WireRequest {
        method: METHOD_ACTION.to_string(),
        payload: json!({
            "type": action.action_type,
            "params": encode_params(&action.params)?,
        }),
    })
}

pub fn assert_request(assert: &AssertDef) -> Result<WireRequest, serde_json::Error> {
    Ok(WireRequest {
        method: METHOD_ASSERT.to_string(),
        payload: json!({
            "type": assert.assert_type,
            "params": encode_params(&assert.params)?,
        }),
    })
}

pub fn healthcheck_request() -> WireRequest {
    WireRequest {
        method: METHOD_HEALTHCHECK.to_string(),
        payload: Value::Null,
    }
}

/// Decode the `outputs` of an action reply
pub fn parse_action_outputs(result: &Value) -> Result<Value, RunnerError> {
    let outputs = result.get("outputs").unwrap_or(&Value::Null);
    Ok(decode_payload(outputs)?)
}

/// Decode an assert reply into an `AssertResult`
pub fn parse_assert_result(result: &Value) -> Result<AssertResult, RunnerError> {
    let passed = result
        .get("passed")
        .and_then(Value::as_bool)
        .ok_or_else(|| RunnerError::Application("assert reply missing 'passed'".to_string()))?;

    Ok(AssertResult {
        passed,
        actual: decode_payload(result.get("actual").unwrap_or(&Value::Null))?,
        expected: decode_payload(result.get("expected").unwrap_or(&Value::Null))?,
        description: result
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Decode the `ready` flag of a healthcheck reply
pub fn parse_ready(result: &Value) -> bool {
    result.get("ready").and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_round_trip_is_lossless() {
        let params = json!({
            "nested": {"list": [1, 2.5, "three", null, true]},
            "empty": {},
            "unicode": "héllo",
        });

        let encoded = encode_params(&params).unwrap();
        let decoded = decode_payload(&Value::String(encoded)).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_action_request_shape() {
        let action = ActionDef {
            name: Some("put0".to_string()),
            action_type: "put".to_string(),
            params: json!({"key": "abc", "value": 1}),
        };

        let request = action_request(&action).unwrap();
        assert_eq!(request.method, METHOD_ACTION);
        assert_eq!(request.payload["type"], json!("put"));

        // Params travel as an encoded string, not native JSON
        let params = request.payload["params"].as_str().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(params).unwrap(),
            json!({"key": "abc", "value": 1})
        );
    }

    #[test]
    fn test_parse_action_outputs() {
        let result = json!({"outputs": "{\"id\": 42}"});
        assert_eq!(parse_action_outputs(&result).unwrap(), json!({"id": 42}));

        // Missing or empty outputs decode to null
        assert_eq!(parse_action_outputs(&json!({})).unwrap(), Value::Null);
        assert_eq!(
            parse_action_outputs(&json!({"outputs": ""})).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_parse_assert_result() {
        let result = json!({
            "passed": false,
            "actual": "{\"status\": 404}",
            "expected": "{\"status\": 200}",
            "description": "status mismatch",
        });

        let parsed = parse_assert_result(&result).unwrap();
        assert!(!parsed.passed);
        assert_eq!(parsed.actual, json!({"status": 404}));
        assert_eq!(parsed.expected, json!({"status": 200}));
        assert_eq!(parsed.description, "status mismatch");
    }

    #[test]
    fn test_parse_assert_result_missing_passed() {
        let result = json!({"description": "broken runner"});
        assert!(matches!(
            parse_assert_result(&result),
            Err(RunnerError::Application(_))
        ));
    }

    #[test]
    fn test_parse_ready() {
        assert!(parse_ready(&json!({"ready": true})));
        assert!(!parse_ready(&json!({"ready": false})));
        assert!(!parse_ready(&json!({})));
    }
}
