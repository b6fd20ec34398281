//! HTTP client for uploading measurement batches.

use std::time::Duration;

use async_trait::async_trait;
use http::{header::CONTENT_TYPE, StatusCode};
use reqwest::{Client, Response};
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

use crate::{config::ReporterConfiguration, payload::Batch};

const JSON_CONTENT_TYPE: &str = "application/json";

/// A client error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ClientError {
    /// The underlying HTTP client could not be built.
    #[snafu(display("Failed to build HTTP client: {}", source))]
    Build {
        /// Error source.
        source: reqwest::Error,
    },

    /// The batch could not be encoded.
    #[snafu(display("Failed to encode measurement batch: {}", source))]
    Encode {
        /// Error source.
        source: serde_json::Error,
    },

    /// The request could not be sent, or no response was received.
    #[snafu(display("Failed to send measurement batch: {}", source))]
    Request {
        /// Error source.
        source: reqwest::Error,
    },

    /// The response body could not be read.
    #[snafu(display("Failed to read response body: {}", source))]
    ReadBody {
        /// Error source.
        source: reqwest::Error,
    },

    /// The endpoint responded with a status code other than `200 OK`.
    #[snafu(display("Received unexpected status code {} from endpoint: {}", status, body))]
    UnexpectedStatus {
        /// Status code of the response.
        status: StatusCode,

        /// Body of the response.
        body: String,
    },
}

impl ClientError {
    /// Returns the status code of the response, if the error was caused by one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Destination for measurement batches.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Uploads a batch.
    ///
    /// # Errors
    ///
    /// If the batch could not be uploaded, an error is returned.
    async fn post(&self, batch: &Batch) -> Result<(), ClientError>;
}

/// Client for the measurements endpoint.
///
/// Batches are sent as JSON, authenticated with HTTP basic authentication using the API token as the username and an
/// empty password.
#[derive(Clone, Debug)]
pub struct MeasurementsClient {
    inner: Client,
    token: String,
    endpoint: String,
}

impl MeasurementsClient {
    /// Creates a new `MeasurementsClient`.
    ///
    /// # Errors
    ///
    /// If the underlying HTTP client cannot be built, an error is returned.
    pub fn new<T, E>(token: T, endpoint: E, timeout: Duration) -> Result<Self, ClientError>
    where
        T: Into<String>,
        E: Into<String>,
    {
        let inner = Client::builder().timeout(timeout).build().context(Build)?;

        Ok(Self {
            inner,
            token: token.into(),
            endpoint: endpoint.into(),
        })
    }

    /// Creates a new `MeasurementsClient` from the given reporter configuration.
    ///
    /// # Errors
    ///
    /// If the underlying HTTP client cannot be built, an error is returned.
    pub fn from_configuration(config: &ReporterConfiguration) -> Result<Self, ClientError> {
        Self::new(config.api_token.clone(), config.endpoint(), config.request_timeout())
    }

    /// Returns the endpoint batches are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for MeasurementsClient {
    async fn post(&self, batch: &Batch) -> Result<(), ClientError> {
        if batch.is_empty() {
            debug!("Skipping upload of empty batch.");
            return Ok(());
        }

        let body = serde_json::to_vec(batch).context(Encode)?;
        let response = self
            .inner
            .post(&self.endpoint)
            .basic_auth(&self.token, Some(""))
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .context(Request)?;

        process_response(response).await?;

        debug!(measurements = batch.len(), time = batch.time, "Uploaded measurement batch.");
        Ok(())
    }
}

async fn process_response(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }

    let body = match response.text().await.context(ReadBody) {
        Ok(body) => body,
        Err(e) => format!("<{}>", e),
    };

    Err(ClientError::UnexpectedStatus { status, body })
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    use axum::{body::Bytes, extract::State, http::HeaderMap, routing::post, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::{payload::Measurement, tags::Tags};

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
    }

    impl Captured {
        fn take(&self) -> Vec<(HeaderMap, Bytes)> {
            std::mem::take(&mut *self.requests.lock().unwrap())
        }
    }

    async fn spawn_server(status: StatusCode, response_body: &'static str) -> (SocketAddr, Captured) {
        let captured = Captured::default();

        let app = Router::new()
            .route(
                "/v1/measurements",
                post(move |State(captured): State<Captured>, headers: HeaderMap, body: Bytes| async move {
                    captured.requests.lock().unwrap().push((headers, body));
                    (status, response_body)
                }),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (addr, captured)
    }

    fn client_for(addr: SocketAddr) -> MeasurementsClient {
        MeasurementsClient::new(
            "secret",
            format!("http://{}/v1/measurements", addr),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn batch() -> Batch {
        Batch {
            time: 120,
            tags: Tags::new(),
            measurements: vec![Measurement::value("jobs", 3.0, 60, Tags::new())],
        }
    }

    #[tokio::test]
    async fn uploads_batch() {
        let (addr, captured) = spawn_server(StatusCode::OK, "").await;
        let client = client_for(addr);

        client.post(&batch()).await.unwrap();

        let requests = captured.take();
        assert_eq!(requests.len(), 1);

        let (headers, body) = &requests[0];
        // "secret:" in base64.
        assert_eq!(headers.get("authorization").unwrap(), "Basic c2VjcmV0Og==");
        assert_eq!(headers.get("content-type").unwrap(), "application/json");

        let body: Value = serde_json::from_slice(body).unwrap();
        similar_asserts::assert_eq!(
            body,
            json!({
                "time": 120,
                "tags": {},
                "measurements": [{ "name": "jobs", "value": 3.0, "period": 60 }],
            })
        );
    }

    #[tokio::test]
    async fn only_ok_status_is_accepted() {
        let (addr, _) = spawn_server(StatusCode::ACCEPTED, "queued").await;

        let error = client_for(addr).post(&batch()).await.unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::ACCEPTED));
        match error {
            ClientError::UnexpectedStatus { body, .. } => assert_eq!(body, "queued"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let (addr, _) = spawn_server(StatusCode::INTERNAL_SERVER_ERROR, "backend unavailable").await;

        let error = client_for(addr).post(&batch()).await.unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        match error {
            ClientError::UnexpectedStatus { body, .. } => assert_eq!(body, "backend unavailable"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn empty_batch_is_not_sent() {
        let (addr, captured) = spawn_server(StatusCode::OK, "").await;
        client_for(addr).post(&Batch::default()).await.unwrap();
        assert!(captured.take().is_empty());

        // Nothing listens here, so any attempt to connect would fail.
        let client = MeasurementsClient::new("secret", "http://127.0.0.1:1/v1/measurements", Duration::from_secs(1)).unwrap();
        client.post(&Batch::default()).await.unwrap();
    }

    #[tokio::test]
    async fn connection_failure() {
        let client = MeasurementsClient::new("secret", "http://127.0.0.1:1/v1/measurements", Duration::from_secs(1)).unwrap();
        let error = client.post(&batch()).await.unwrap_err();
        assert!(matches!(error, ClientError::Request { .. }));
        assert_eq!(error.status(), None);
    }
}
