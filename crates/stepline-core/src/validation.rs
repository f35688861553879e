//! Input validation for trigger and status requests.
//!
//! Pure functions over raw bytes / `serde_json::Value`. Each produces either
//! a typed, sanitized payload or a `ValidationError`. Field-level problems
//! are reported as an ordered list of `FieldError { path, message }` where
//! `path` is dotted (`metadata.source`), empty for the document root.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use stepline_types::workflow::{StatusQuery, TriggerRequest};

/// Local part of `[A-Za-z0-9_'+\-.]`, last char not `.`/`'`, then
/// dot-separated domain labels and a TLD of two or more letters.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[A-Z0-9_'+\-.]*[A-Z0-9_+\-]@([A-Z0-9][A-Z0-9\-]*\.)+[A-Z]{2,}$")
        .unwrap_or_else(|e| panic!("email pattern must compile: {e}"))
});

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// One failed constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Why a request was rejected before any instance was created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Content-Type must be application/json")]
    UnsupportedContentType,

    #[error("Request body is required")]
    EmptyBody,

    #[error("Invalid JSON in request body")]
    MalformedBody,

    #[error("Validation error")]
    Fields(Vec<FieldError>),
}

impl ValidationError {
    /// Field errors, empty for body-level errors.
    pub fn details(&self) -> &[FieldError] {
        match self {
            ValidationError::Fields(errors) => errors,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Body parsing
// ---------------------------------------------------------------------------

/// Check the declared content type and parse a JSON request body.
///
/// The content type is checked before the body is looked at.
pub fn parse_json_body(content_type: Option<&str>, body: &[u8]) -> Result<Value, ValidationError> {
    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Err(ValidationError::UnsupportedContentType);
    }

    let text = std::str::from_utf8(body).map_err(|_| ValidationError::MalformedBody)?;
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyBody);
    }

    serde_json::from_str(text).map_err(|_| ValidationError::MalformedBody)
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

/// Validate a trigger payload `{ email, metadata? }`.
///
/// Unknown keys are dropped; `metadata` defaults to an empty map.
pub fn validate_trigger(value: &Value) -> Result<TriggerRequest, ValidationError> {
    let object = root_object(value)?;
    let mut errors = Vec::new();

    let email = match object.get("email") {
        None => {
            errors.push(FieldError::new("email", "Required"));
            None
        }
        Some(Value::String(email)) => {
            if is_valid_email(email) {
                Some(email.clone())
            } else {
                errors.push(FieldError::new("email", "Invalid email format"));
                None
            }
        }
        Some(other) => {
            errors.push(expected("email", "string", other));
            None
        }
    };

    let metadata = match object.get("metadata") {
        None => HashMap::new(),
        Some(Value::Object(entries)) => {
            let mut metadata = HashMap::with_capacity(entries.len());
            for (key, entry) in entries {
                match entry {
                    Value::String(s) => {
                        metadata.insert(key.clone(), s.clone());
                    }
                    other => errors.push(expected(&format!("metadata.{key}"), "string", other)),
                }
            }
            metadata
        }
        Some(other) => {
            errors.push(expected("metadata", "object", other));
            HashMap::new()
        }
    };

    match email {
        Some(email) if errors.is_empty() => Ok(TriggerRequest { email, metadata }),
        _ => Err(ValidationError::Fields(errors)),
    }
}

/// Validate a status query `{ instanceId }`.
///
/// A missing, null or empty `instanceId` is reported as
/// "instanceId is required".
pub fn validate_status_query(value: &Value) -> Result<StatusQuery, ValidationError> {
    let object = root_object(value)?;

    match object.get("instanceId") {
        Some(Value::String(id)) if !id.is_empty() => Ok(StatusQuery {
            instance_id: id.clone(),
        }),
        None | Some(Value::Null) | Some(Value::String(_)) => Err(ValidationError::Fields(vec![
            FieldError::new("instanceId", "instanceId is required"),
        ])),
        Some(other) => Err(ValidationError::Fields(vec![expected(
            "instanceId",
            "string",
            other,
        )])),
    }
}

/// Syntactic email check.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, _)) = email.rsplit_once('@') else {
        return false;
    };
    !local.starts_with('.') && !local.contains("..") && EMAIL_RE.is_match(email)
}

fn root_object(value: &Value) -> Result<&Map<String, Value>, ValidationError> {
    value
        .as_object()
        .ok_or_else(|| ValidationError::Fields(vec![expected("", "object", value)]))
}

fn expected(path: &str, expected: &str, received: &Value) -> FieldError {
    FieldError::new(
        path,
        format!("Expected {expected}, received {}", type_name(received)),
    )
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
