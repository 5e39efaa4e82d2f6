//! Visitor API access
//!
//! Every call goes through [`VisitorApi`] so the engine can be driven by the
//! real HTTP client or by an in-memory double. Responses arrive wrapped in a
//! `{status, data, message}` envelope; a call only succeeds when both the
//! HTTP status and the envelope status say so.

use crate::config::ClientConfig;
use crate::schema::{CompanyInfo, FieldDefinition};
use crate::status::VisitorStatus;
use crate::submit::{PartBody, VisitorPayload};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Envelope status code that marks success.
pub const STATUS_OK: i64 = 200;

/// API error types
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server returned HTTP {status}")]
    Http { status: u16, message: Option<String> },
    #[error("request rejected ({status}): {message}")]
    Rejected { status: i64, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// True when the server answered 2xx with a non-200 envelope status.
    /// Non-2xx responses count as failed requests, like transport errors.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ApiError::Rejected { .. })
    }

    /// Server supplied message, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Rejected { message, .. } => Some(message),
            ApiError::Http { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub status: i64,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Wire operations the registration engine depends on.
#[async_trait]
pub trait VisitorApi: Send + Sync {
    /// Custom field definitions for a company's public form.
    async fn visitor_fields(&self, company_id: &str) -> Result<Vec<FieldDefinition>, ApiError>;

    /// Company display metadata.
    async fn company_info(&self, company_id: &str) -> Result<Option<CompanyInfo>, ApiError>;

    /// Whether `number` currently identifies a checked-in visitor.
    async fn visitor_status(
        &self,
        company_id: &str,
        label: &str,
        number: &str,
    ) -> Result<Option<VisitorStatus>, ApiError>;

    /// Dispatch (or re-dispatch) an OTP to `mobile`.
    async fn send_otp(&self, company_id: &str, mobile: &str) -> Result<(), ApiError>;

    /// Confirm `otp` for `mobile`.
    async fn verify_otp(&self, company_id: &str, mobile: &str, otp: &str) -> Result<(), ApiError>;

    /// Create a visitor entry, returning the new visitor id when the server reports one.
    async fn create_visitor(
        &self,
        company_id: &str,
        payload: VisitorPayload,
    ) -> Result<Option<String>, ApiError>;

    /// Record the exit of the visitor identified by `label` = `mobile`.
    async fn record_exit(&self, company_id: &str, label: &str, mobile: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Serialize)]
struct SendOtpRequest<'a> {
    mobile: &'a str,
    #[serde(rename = "companyId")]
    company_id: &'a str,
}

#[derive(Debug, Serialize)]
struct VerifyOtpRequest<'a> {
    mobile: &'a str,
    otp: &'a str,
    #[serde(rename = "companyId")]
    company_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ExitRequest<'a> {
    mobile: &'a str,
    label: &'a str,
}

/// reqwest backed [`VisitorApi`].
#[derive(Clone)]
pub struct HttpVisitorApi {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpVisitorApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidRequest(format!("{} cannot be a base URL", base_url)));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self { base_url, client })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(&config.api_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Build `{base}/{segments...}`, percent-encoding each segment.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidRequest("base URL cannot take a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Option<T>, ApiError> {
        let url = self.endpoint(segments)?;
        tracing::debug!(path = url.path(), "GET");
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        read_envelope(resp).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<Option<T>, ApiError> {
        let url = self.endpoint(segments)?;
        tracing::debug!(path = url.path(), "POST");
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        read_envelope(resp).await
    }
}

/// Unwrap an envelope, turning non-2xx responses and non-200 envelope
/// statuses into errors.
pub(crate) async fn read_envelope<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<Option<T>, ApiError> {
    let http_status = resp.status();
    if !http_status.is_success() {
        let message = resp
            .json::<Envelope<serde_json::Value>>()
            .await
            .ok()
            .and_then(|e| e.message);
        return Err(ApiError::Http {
            status: http_status.as_u16(),
            message,
        });
    }

    // Check the envelope status before committing to the payload shape;
    // rejections often carry a `data` that does not match `T`.
    let envelope: Envelope<serde_json::Value> = resp
        .json()
        .await
        .map_err(|e| ApiError::Parse(e.to_string()))?;

    if envelope.status != STATUS_OK {
        return Err(ApiError::Rejected {
            status: envelope.status,
            message: envelope.message.unwrap_or_default(),
        });
    }

    match envelope.data {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(data) => serde_json::from_value(data)
            .map(Some)
            .map_err(|e| ApiError::Parse(e.to_string())),
    }
}

fn multipart(payload: VisitorPayload) -> Result<reqwest::multipart::Form, ApiError> {
    // Labels go out verbatim as part names.
    let mut form = reqwest::multipart::Form::new().percent_encode_noop();
    for part in payload.parts {
        form = match part.body {
            PartBody::Text(text) => form.text(part.name, text),
            PartBody::File(file) => {
                let body = reqwest::multipart::Part::bytes(file.bytes.to_vec())
                    .file_name(file.file_name.clone())
                    .mime_str(&file.mime)
                    .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
                form.part(part.name, body)
            }
        };
    }
    Ok(form)
}

/// The create endpoint answers with either the bare id or the created document.
fn created_id(data: Option<serde_json::Value>) -> Option<String> {
    match data? {
        serde_json::Value::String(id) => Some(id),
        serde_json::Value::Object(map) => map
            .get("_id")
            .or_else(|| map.get("id"))
            .and_then(|v| v.as_str())
            .map(String::from),
        _ => None,
    }
}

#[async_trait]
impl VisitorApi for HttpVisitorApi {
    async fn visitor_fields(&self, company_id: &str) -> Result<Vec<FieldDefinition>, ApiError> {
        let fields: Option<Vec<FieldDefinition>> = self
            .get(&["visitor", "visitor-fields", "form", company_id], &[])
            .await?;
        Ok(fields.unwrap_or_default())
    }

    async fn company_info(&self, company_id: &str) -> Result<Option<CompanyInfo>, ApiError> {
        self.get(&["company", "company-info", company_id], &[]).await
    }

    async fn visitor_status(
        &self,
        company_id: &str,
        label: &str,
        number: &str,
    ) -> Result<Option<VisitorStatus>, ApiError> {
        self.get(
            &["visitor", "info"],
            &[("companyId", company_id), ("label", label), ("number", number)],
        )
        .await
    }

    async fn send_otp(&self, company_id: &str, mobile: &str) -> Result<(), ApiError> {
        let body = SendOtpRequest { mobile, company_id };
        self.post_json::<serde_json::Value, _>(&["visitor", "otp", "send"], &body)
            .await?;
        Ok(())
    }

    async fn verify_otp(&self, company_id: &str, mobile: &str, otp: &str) -> Result<(), ApiError> {
        let body = VerifyOtpRequest { mobile, otp, company_id };
        self.post_json::<serde_json::Value, _>(&["visitor", "otp", "verify"], &body)
            .await?;
        Ok(())
    }

    async fn create_visitor(
        &self,
        company_id: &str,
        payload: VisitorPayload,
    ) -> Result<Option<String>, ApiError> {
        let url = self.endpoint(&["visitor", "create", company_id])?;
        tracing::debug!(path = url.path(), parts = payload.parts.len(), "POST multipart");
        let resp = self
            .client
            .post(url)
            .multipart(multipart(payload)?)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let data: Option<serde_json::Value> = read_envelope(resp).await?;
        Ok(created_id(data))
    }

    async fn record_exit(&self, company_id: &str, label: &str, mobile: &str) -> Result<(), ApiError> {
        let body = ExitRequest { mobile, label };
        self.post_json::<serde_json::Value, _>(&["visitor", "exit", company_id], &body)
            .await?;
        Ok(())
    }
}
