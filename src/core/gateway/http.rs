//! HTTP gateway backed by `reqwest`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::multipart;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{GatewaySettings, Messages};

use super::{FileAttachment, RemoteGateway, RemoteRequest, RemoteResponse, RequestBody};

/// Errors raised while building a gateway. Sending never fails with these.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Sends wizard requests to the Precliniset backend.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    http_client: reqwest::Client,
    base_url: Url,
    csrf_header: HeaderName,
    csrf_token: Option<String>,
    messages: Messages,
}

impl HttpGateway {
    pub fn new(settings: &GatewaySettings) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&settings.base_url).map_err(|e| GatewayError::InvalidBaseUrl {
            url: settings.base_url.clone(),
            reason: e.to_string(),
        })?;

        let csrf_header = HeaderName::from_bytes(settings.csrf_header.as_bytes())
            .map_err(|e| GatewayError::InvalidHeader(format!("{}: {}", settings.csrf_header, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            csrf_header,
            csrf_token: None,
            messages: Messages::default(),
        })
    }

    /// Token used when a request carries none of its own.
    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn with_messages(mut self, messages: Messages) -> Self {
        self.messages = messages;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve an endpoint against the base URL. Absolute URLs pass through.
    pub fn resolve(&self, url: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(url)
    }

    fn build(&self, request: RemoteRequest) -> Result<reqwest::RequestBuilder, String> {
        let url = self
            .resolve(&request.url)
            .map_err(|e| format!("Invalid request URL '{}': {}", request.url, e))?;

        let mut builder = self.http_client.request(request.method, url);

        if let Some(token) = request.csrf_token.or_else(|| self.csrf_token.clone()) {
            let value = HeaderValue::from_str(&token)
                .map_err(|e| format!("Invalid anti-forgery token: {}", e))?;
            builder = builder.header(self.csrf_header.clone(), value);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart { fields, files } => {
                let mut form = multipart::Form::new();
                for (name, value) in fields {
                    form = append_field(form, name, value);
                }
                for file in files {
                    form = form.part(file.field.clone(), file_part(file)?);
                }
                builder.multipart(form)
            }
        };

        Ok(builder)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: RemoteRequest) -> RemoteResponse {
        let builder = match self.build(request) {
            Ok(builder) => builder,
            Err(message) => {
                warn!(%message, "Request could not be built");
                return RemoteResponse::failure(message);
            }
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Request failed in transport");
                return RemoteResponse::failure(self.messages.transport_error.clone());
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, %status, "Failed to read response body");
                return RemoteResponse::failure(self.messages.transport_error.clone());
            }
        };

        debug!(%status, bytes = body.len(), "Response received");
        let normalized = RemoteResponse::from_http(status.as_u16(), &body, &self.messages);
        if let RemoteResponse::Failure { message, .. } = &normalized {
            warn!(%status, %message, "Backend rejected request");
        }
        normalized
    }
}

/// Lists become repeated fields, other non-strings are JSON encoded.
fn append_field(form: multipart::Form, name: String, value: Value) -> multipart::Form {
    match value {
        Value::String(s) => form.text(name, s),
        Value::Null => form.text(name, String::new()),
        Value::Array(items) if items.iter().all(|i| !i.is_array() && !i.is_object()) => {
            items.into_iter().fold(form, |form, item| {
                let text = match item {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                form.text(name.clone(), text)
            })
        }
        other => form.text(name, other.to_string()),
    }
}

fn file_part(file: FileAttachment) -> Result<multipart::Part, String> {
    let part = multipart::Part::bytes(file.content.to_vec()).file_name(file.file_name);
    match file.mime {
        Some(mime) => part
            .mime_str(&mime)
            .map_err(|e| format!("Invalid MIME type '{}': {}", mime, e)),
        None => Ok(part),
    }
}
