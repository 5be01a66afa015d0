//! Request routing to the computation service.
//!
//! `ServiceClient` speaks the loopback HTTP protocol and classifies every
//! answer. `RequestRouter` adds the readiness gate: the port is read from the
//! lifecycle state at the moment of the call and no request leaves the
//! process unless the service is ready.

use mf_protocol::calc_models::{CalculationRequest, CalculationResponse, Operation};
use mf_protocol::ipc::ErrorKind;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::state::LifecycleState;

/// Longest body excerpt quoted in a `MalformedResponse`.
const BODY_EXCERPT_LEN: usize = 200;

/// Failure of a single calculation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalculationError {
    #[error("computation service is not ready")]
    BackendNotReady,

    #[error("computation service answered with HTTP {status}")]
    ServiceError { status: u16 },

    #[error("{0}")]
    ComputationError(String),

    #[error("computation service is unreachable: {0}")]
    TransportError(String),

    #[error("malformed response from computation service: {0}")]
    MalformedResponse(String),
}

impl CalculationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalculationError::BackendNotReady => ErrorKind::BackendNotReady,
            CalculationError::ServiceError { .. } => ErrorKind::ServiceError,
            CalculationError::ComputationError(_) => ErrorKind::ComputationError,
            CalculationError::TransportError(_) => ErrorKind::TransportError,
            CalculationError::MalformedResponse(_) => ErrorKind::MalformedResponse,
        }
    }
}

/// HTTP client for the computation service.
///
/// Every request is bounded by the configured request timeout.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: Client,
}

impl ServiceClient {
    /// # Errors
    ///
    /// Returns the underlying `reqwest::Error` if the HTTP client cannot be
    /// initialised.
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(request_timeout)
            .no_proxy()
            .build()?;
        Ok(Self { http })
    }

    /// POST `request` to the service on `port` and classify the answer.
    ///
    /// Never retries.
    pub async fn post(
        &self,
        port: u16,
        request: &CalculationRequest,
    ) -> Result<String, CalculationError> {
        let url = format!("http://127.0.0.1:{port}/");
        let transport = |e: reqwest::Error| CalculationError::TransportError(e.to_string());

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport)?;

        interpret(status, &body)
    }
}

/// Classify a service answer.
///
/// A body carrying `error` wins over the HTTP status; a non-success status
/// wins over `result`.
fn interpret(status: u16, body: &[u8]) -> Result<String, CalculationError> {
    let parsed = serde_json::from_slice::<CalculationResponse>(body).ok();

    if let Some(message) = parsed.as_ref().and_then(|r| r.error.clone()) {
        return Err(CalculationError::ComputationError(message));
    }
    if !(200..300).contains(&status) {
        return Err(CalculationError::ServiceError { status });
    }
    match parsed.and_then(|r| r.result) {
        Some(result) => Ok(result),
        None => Err(CalculationError::MalformedResponse(excerpt(body))),
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= BODY_EXCERPT_LEN {
        return text.into_owned();
    }
    let mut cut: String = text.chars().take(BODY_EXCERPT_LEN).collect();
    cut.push_str("...");
    cut
}

/// Routes UI calculations to the ready service.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    client: ServiceClient,
}

impl RequestRouter {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ServiceClient {
        &self.client
    }

    /// Run one calculation.
    ///
    /// Operands are forwarded verbatim; the service does the parsing.
    ///
    /// # Errors
    ///
    /// `BackendNotReady` without any network traffic if the service is not
    /// ready; otherwise the classification from [`ServiceClient::post`].
    pub async fn calculate(
        &self,
        state: &LifecycleState,
        operation: Operation,
        a: &str,
        b: &str,
    ) -> Result<String, CalculationError> {
        let Some(port) = state.ready_port() else {
            return Err(CalculationError::BackendNotReady);
        };

        let request = CalculationRequest::new(operation, a, b);
        tracing::debug!(port, %operation, "forwarding calculation");
        self.client.post(port, &request).await
    }
}
