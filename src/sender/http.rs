use super::batch::Batch;
use super::error::TransportError;
use super::Transport;
use flate2::{Compression, write::GzEncoder};
use reqwest::header::{
    AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER,
};
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub user_agent: String,
    pub enable_compression: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1/series".to_string(),
            auth_token: None,
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            user_agent: format!("series-forwarder/{}", env!("CARGO_PKG_VERSION")),
            enable_compression: false,
        }
    }
}

/// Posts batches as JSON to a time-series ingestion endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
    url: Url,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let url: Url = config
            .endpoint
            .parse()
            .map_err(|e| TransportError::Other(format!("Invalid endpoint URL: {e}")))?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            url,
        })
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    pub fn prepare_payload(&self, batch: &Batch) -> Result<Vec<u8>, TransportError> {
        let json = serde_json::to_vec(batch)?;
        if !self.config.enable_compression {
            return Ok(json);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    pub fn build_headers(&self, batch: &Batch) -> Result<HeaderMap, TransportError> {
        let invalid = |e: reqwest::header::InvalidHeaderValue| {
            TransportError::Other(format!("Invalid header value: {e}"))
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if self.config.enable_compression {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let batch_id = HeaderValue::from_str(&batch.id.to_string()).map_err(invalid)?;
        headers.insert(HeaderName::from_static("x-batch-id"), batch_id.clone());
        headers.insert(HeaderName::from_static("idempotency-key"), batch_id);
        headers.insert(
            HeaderName::from_static("x-batch-trigger"),
            HeaderValue::from_static(batch.trigger.as_str()),
        );
        headers.insert(
            HeaderName::from_static("x-forwarder-version"),
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        );

        if let Some(token) = &self.config.auth_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(invalid)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    async fn error_for_response(response: Response) -> TransportError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let message = response.text().await.unwrap_or_default();
        let message: String = message.chars().take(200).collect();

        status_error(status, retry_after, message)
    }
}

/// Map a non-success HTTP status to a typed transport error.
pub fn status_error(
    status: StatusCode,
    retry_after: Option<Duration>,
    message: String,
) -> TransportError {
    let code = status.as_u16();
    match status {
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Unauthorized {
            status: code,
            message,
        },
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => TransportError::InvalidRequest {
            status: code,
            message,
        },
        s if s.is_server_error() => TransportError::Server {
            status: code,
            message,
        },
        _ => TransportError::Other(format!("HTTP {code}: {message}")),
    }
}

impl Transport for HttpTransport {
    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        let payload = self.prepare_payload(batch)?;
        let headers = self.build_headers(batch)?;
        let bytes = payload.len();

        debug!(
            batch_id = %batch.id,
            points = batch.data_points(),
            bytes,
            "Sending batch"
        );

        let response = self
            .client
            .post(self.url.clone())
            .headers(headers)
            .body(payload)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }

        let error = Self::error_for_response(response).await;
        warn!(batch_id = %batch.id, error = %error, "Endpoint rejected batch");
        Err(error)
    }

    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}
