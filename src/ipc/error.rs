use serde_json::json;

use crate::error::Error;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// The single place where handler errors become protocol responses.
pub fn respond(id: &str, result: Result<serde_json::Value, Error>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => {
            match &e {
                Error::Storage(_) | Error::Io(_) | Error::Internal(_) => {
                    tracing::error!(id, error = %e, "request failed")
                }
                _ => tracing::debug!(id, code = e.code(), error = %e, "request rejected"),
            }
            err(id, e.code(), e.to_string(), e.details())
        }
    }
}
