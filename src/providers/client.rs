//! The client type registered by the provider adapters

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::ProviderIdentifier;
use crate::pool::{Client, ClientKind};

#[derive(Deserialize, Debug, Clone)]
pub struct ApiErrorPayload {
    pub message: String,
    #[serde(rename = "type", default)]
    pub typ: Option<String>,
}

/// OpenAI nests a structured payload under `error`, Ollama sends a bare
/// string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ApiErrorResponse {
    Structured { error: ApiErrorPayload },
    Plain { error: String },
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// Some issue with the request, such as a failed connection or a
    /// timeout
    #[error("request failed")]
    RequestFailed(
        #[from]
        #[source]
        reqwest::Error,
    ),

    /// The request was malformed or missing some required parameters
    #[error("{}", .0.message)]
    BadRequest(ApiErrorPayload),

    /// The api key is missing or invalid
    #[error("{}", .0.message)]
    Authentication(ApiErrorPayload),

    /// The key does not have access to the requested resource
    #[error("{}", .0.message)]
    PermissionDenied(ApiErrorPayload),

    /// The requested resource, usually the model, does not exist
    #[error("{}", .0.message)]
    NotFound(ApiErrorPayload),

    /// The resource was updated by another request
    #[error("{}", .0.message)]
    Conflict(ApiErrorPayload),

    /// The request was well-formed but could not be processed
    #[error("{}", .0.message)]
    UnprocessableEntity(ApiErrorPayload),

    /// A rate limit or quota was exceeded
    #[error("{}", .0.message)]
    RateLimit(ApiErrorPayload),

    /// The server encountered an error
    #[error("{}", .0.message)]
    InternalError(ApiErrorPayload),

    /// The service is overloaded, retrying later may succeed
    #[error("{}", .0.message)]
    ApiOverloaded(ApiErrorPayload),

    /// Any other non-success status
    #[error("unexpected status {}: {}", .0, .1.message)]
    UnknownStatus(u16, ApiErrorPayload),
}

impl ApiError {
    fn from_status(status: StatusCode, payload: ApiErrorPayload) -> ApiError {
        match status.as_u16() {
            400 => ApiError::BadRequest(payload),
            401 => ApiError::Authentication(payload),
            403 => ApiError::PermissionDenied(payload),
            404 => ApiError::NotFound(payload),
            409 => ApiError::Conflict(payload),
            422 => ApiError::UnprocessableEntity(payload),
            429 => ApiError::RateLimit(payload),
            500 => ApiError::InternalError(payload),
            503 => ApiError::ApiOverloaded(payload),
            code => ApiError::UnknownStatus(code, payload),
        }
    }

    fn from_body(status: StatusCode, body: &str) -> ApiError {
        let payload = match serde_json::from_str::<ApiErrorResponse>(body) {
            Ok(ApiErrorResponse::Structured { error }) => error,
            Ok(ApiErrorResponse::Plain { error }) => ApiErrorPayload {
                message: error,
                typ: None,
            },
            Err(_) => ApiErrorPayload {
                message: status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string(),
                typ: None,
            },
        };

        ApiError::from_status(status, payload)
    }

    /// Whether the failure is transient
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::RequestFailed(err) => err.is_timeout() || err.is_connect(),
            ApiError::RateLimit(_) | ApiError::ApiOverloaded(_) | ApiError::InternalError(_) => {
                true
            }
            _ => false,
        }
    }
}

/// An authenticated HTTP client bound to one model and one API route.
///
/// The underlying `reqwest::Client` may be shared with other clients
/// through the transport cache.
pub struct ModelClient {
    provider: ProviderIdentifier,
    kind: ClientKind,
    model_id: String,
    url: Url,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl ModelClient {
    pub(crate) fn new(
        provider: ProviderIdentifier,
        kind: ClientKind,
        model_id: &str,
        url: Url,
        api_key: Option<String>,
        http: reqwest::Client,
    ) -> ModelClient {
        ModelClient {
            provider,
            kind,
            model_id: model_id.to_string(),
            url,
            api_key,
            http,
        }
    }

    pub fn provider(&self) -> ProviderIdentifier {
        self.provider
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// The full URL of the route this client posts to
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Posts `body` as JSON to the client's route and decodes the JSON
    /// response. The body must name the model itself where the API expects
    /// it.
    pub async fn post_json<B, R>(&self, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.http.post(self.url.clone()).json(body);

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let res = request.send().await?;

        let status = res.status();

        if status.is_success() {
            Ok(res.json().await?)
        } else {
            let body = res.text().await?;

            Err(ApiError::from_body(status, &body))
        }
    }
}

#[async_trait]
impl Client for ModelClient {
    async fn close(&self) {
        debug!(
            provider = %self.provider,
            model = %self.model_id,
            "closing model client"
        );
    }
}
