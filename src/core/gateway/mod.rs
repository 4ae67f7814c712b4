//! Remote Gateway
//!
//! Boundary between wizard actions and the Precliniset backend. A gateway turns a
//! [`RemoteRequest`] into exactly one network call and always answers with a
//! [`RemoteResponse`]; transport errors, non-2xx statuses and unparseable bodies
//! are folded into [`RemoteResponse::Failure`] so callers never see an error type.

mod http;

pub use http::{GatewayError, HttpGateway};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Messages;
use crate::core::wizard::{FieldErrors, Payload};

// ============================================================================
// Requests
// ============================================================================

/// A file attached to a wizard session, sent as one multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    /// Form field the file is posted under.
    pub field: String,
    pub file_name: String,
    pub mime: Option<String>,
    pub content: Bytes,
}

impl FileAttachment {
    pub fn new(
        field: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            field: field.into(),
            file_name: file_name.into(),
            mime: None,
            content: content.into(),
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

/// Request body encodings understood by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart {
        fields: Payload,
        files: Vec<FileAttachment>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    pub url: String,
    pub body: RequestBody,
    /// Anti-forgery token for this request. Falls back to the gateway's token.
    pub csrf_token: Option<String>,
}

impl RemoteRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: RequestBody::Empty,
            csrf_token: None,
        }
    }

    /// Build a POST from a payload: multipart when files are attached, JSON otherwise.
    /// A file replaces the payload entry of the same name.
    pub fn post(url: impl Into<String>, mut payload: Payload, files: Vec<FileAttachment>) -> Self {
        let body = if files.is_empty() {
            RequestBody::Json(Value::Object(payload))
        } else {
            payload.retain(|name, _| files.iter().all(|f| &f.field != name));
            RequestBody::Multipart {
                fields: payload,
                files,
            }
        };

        Self {
            method: Method::POST,
            url: url.into(),
            body,
            csrf_token: None,
        }
    }

    pub fn with_csrf_token(mut self, token: Option<String>) -> Self {
        self.csrf_token = token;
        self
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, RequestBody::Multipart { .. })
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Normalized backend answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemoteResponse {
    Success {
        data: Value,
    },
    Failure {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        errors: Option<FieldErrors>,
    },
}

impl RemoteResponse {
    pub fn success(data: Value) -> Self {
        RemoteResponse::Success { data }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        RemoteResponse::Failure {
            message: message.into(),
            errors: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RemoteResponse::Success { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            RemoteResponse::Success { data } => Some(data),
            RemoteResponse::Failure { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            RemoteResponse::Success { data } => data.get("message").and_then(Value::as_str),
            RemoteResponse::Failure { message, .. } => Some(message),
        }
    }

    /// Where the host should navigate after a successful submission, if the
    /// backend said so.
    pub fn redirect_url(&self) -> Option<&str> {
        let data = self.data()?;
        data.get("redirect_url")
            .or_else(|| data.get("redirect"))
            .and_then(Value::as_str)
    }

    /// Normalize a raw HTTP answer.
    ///
    /// Bodies of the form `{success, data?, message?, errors?}` are honoured on
    /// 2xx; a 2xx JSON body without `success` is taken as the data itself. Any
    /// other status is a failure, with the body's message when it has one.
    pub fn from_http(status: u16, body: &[u8], messages: &Messages) -> Self {
        let ok = (200..300).contains(&status);

        if body.iter().all(u8::is_ascii_whitespace) {
            return if ok {
                RemoteResponse::success(Value::Null)
            } else {
                RemoteResponse::failure(format!("Request failed with status {}", status))
            };
        }

        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(_) if ok => return RemoteResponse::failure(messages.invalid_response.clone()),
            Err(_) => {
                return RemoteResponse::failure(format!("Request failed with status {}", status))
            }
        };

        let flag = value.get("success").and_then(Value::as_bool);
        match (ok, flag) {
            (true, Some(true)) | (true, None) => {
                let data = match value.get("data") {
                    Some(data) if flag.is_some() => data.clone(),
                    _ => value,
                };
                RemoteResponse::success(data)
            }
            (_, _) => {
                let message = value
                    .get("message")
                    .or_else(|| value.get("error"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        if ok {
                            messages.invalid_response.clone()
                        } else {
                            format!("Request failed with status {}", status)
                        }
                    });
                RemoteResponse::Failure {
                    message,
                    errors: value.get("errors").and_then(field_errors),
                }
            }
        }
    }
}

/// Accept `{field: "msg"}` and `{field: ["msg", ...]}` error maps.
fn field_errors(value: &Value) -> Option<FieldErrors> {
    let map = value.as_object()?;
    let errors: FieldErrors = map
        .iter()
        .filter_map(|(field, message)| {
            let text = match message {
                Value::String(s) => s.clone(),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; "),
                _ => return None,
            };
            Some((field.clone(), text))
        })
        .collect();

    (!errors.is_empty()).then_some(errors)
}

// ============================================================================
// Gateway Trait
// ============================================================================

/// Sends one request and returns a normalized response. Implementations never
/// retry, cache or deduplicate.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn send(&self, request: RemoteRequest) -> RemoteResponse;
}
