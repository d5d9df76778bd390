use serde_json::json;

/// Success envelope: `{id, ok: true, result}`.
pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

/// Failure envelope: `{id, ok: false, error: {code, message[, details]}}`.
/// Codes are stable snake_case strings the UI switches on.
pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = serde_json::Map::new();
    error.insert("code".to_string(), json!(code));
    error.insert("message".to_string(), json!(message.into()));
    if let Some(d) = details {
        error.insert("details".to_string(), d);
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Map an engine error straight onto the failure envelope.
pub fn calc_err(id: &str, e: crate::grading::CalcError) -> serde_json::Value {
    err(id, &e.code, e.message, e.details)
}
