//! The uniform error shape:
//! `{"error":{"code","message","trace_id","retry_after"?}}`.
//!
//! Responses never carry stack traces or internals; `internal` errors
//! are sanitized down to their class name.

use sv_domain::error::ErrorClass;
use sv_domain::Error;

/// HTTP status for an error, via its class.
pub fn status_for(e: &Error) -> u16 {
    e.class().http_status()
}

/// Build the uniform JSON error body.
pub fn error_body(e: &Error, trace_id: Option<uuid::Uuid>) -> serde_json::Value {
    let class = e.class();
    let message = if class == ErrorClass::Internal {
        // Sanitized: internal details stay in the logs.
        "ett internt fel inträffade".to_string()
    } else {
        e.to_string()
    };

    let mut error = serde_json::json!({
        "code": class.as_str(),
        "message": message,
        "trace_id": trace_id.unwrap_or_else(uuid::Uuid::new_v4),
    });
    if let Some(retry_after) = e.retry_after() {
        error["retry_after"] = serde_json::json!(retry_after);
    }
    serde_json::json!({ "error": error })
}
