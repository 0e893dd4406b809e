use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::ipc::types::Request;

/// Required, trimmed, non-empty string parameter.
pub fn str_param(req: &Request, key: &str) -> Result<String> {
    opt_str_param(req, key).ok_or_else(|| Error::validation(format!("missing params.{}", key)))
}

pub fn opt_str_param(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn path_param(req: &Request, key: &str) -> Result<PathBuf> {
    str_param(req, key).map(PathBuf::from)
}

/// Integer parameter; numeric strings are accepted.
pub fn i64_param(req: &Request, key: &str) -> Result<i64> {
    opt_i64_param(req, key)?.ok_or_else(|| Error::validation(format!("missing params.{}", key)))
}

pub fn opt_i64_param(req: &Request, key: &str) -> Result<Option<i64>> {
    let Some(v) = req.params.get(key).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    v.as_i64()
        .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .map(Some)
        .ok_or_else(|| Error::validation(format!("params.{} must be an integer", key)))
}

pub fn opt_usize_param(req: &Request, key: &str) -> Result<Option<usize>> {
    match opt_i64_param(req, key)? {
        Some(n) if n < 0 => Err(Error::validation(format!("params.{} must not be negative", key))),
        Some(n) => Ok(Some(n as usize)),
        None => Ok(None),
    }
}
