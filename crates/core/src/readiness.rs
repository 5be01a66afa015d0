//! Readiness verification.
//!
//! A port announcement only says the service bound a socket. The service is
//! usable once it has answered the canary calculation with a well-formed
//! result.

use mf_protocol::calc_models::CalculationRequest;
use std::time::Duration;

use crate::process::{ExitReport, ExitWatch};
use crate::router::ServiceClient;

/// How verification ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The canary was answered.
    Ready,
    /// The owning process exited first; verification is abandoned.
    ProcessExited(ExitReport),
}

/// Poll the canary on `port` every `interval` until it succeeds or the
/// owning process exits.
///
/// There is no overall deadline; callers that need one wrap this future in a
/// timeout. Dropping the future cancels the polling.
pub async fn verify(
    client: &ServiceClient,
    port: u16,
    mut exit: ExitWatch,
    interval: Duration,
) -> Verification {
    let canary = CalculationRequest::canary();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        tokio::select! {
            biased;
            report = exit.wait() => return Verification::ProcessExited(report),
            outcome = client.post(port, &canary) => match outcome {
                Ok(_) => {
                    tracing::info!(port, attempt, "canary answered");
                    return Verification::Ready;
                }
                Err(err) => {
                    tracing::debug!(port, attempt, error = %err, "canary not answered yet");
                }
            },
        }

        tokio::select! {
            biased;
            report = exit.wait() => return Verification::ProcessExited(report),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client() -> ServiceClient {
        ServiceClient::new(Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn test_ready_only_after_first_success() {
        let server = MockServer::start_async().await;
        let unavailable = server
            .mock_async(|when, then| {
                when.method(POST).path("/");
                then.status(503);
            })
            .await;
        let (_exit_tx, exit) = ExitWatch::channel();
        let port = server.port();

        let handle = tokio::spawn(async move {
            verify(&client(), port, exit, Duration::from_millis(20)).await
        });

        while unavailable.hits_async().await < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!handle.is_finished());

        unavailable.delete_async().await;
        let available = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/")
                    .json_body(json!({"operation": "add", "a": "0", "b": "0"}));
                then.status(200).json_body(json!({"result": "0"}));
            })
            .await;

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("verification should finish")
            .unwrap();

        assert_eq!(outcome, Verification::Ready);
        assert_eq!(available.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_error_body_is_not_readiness() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/");
                then.status(200).json_body(json!({"error": "model loading"}));
            })
            .await;
        let (exit_tx, exit) = ExitWatch::channel();
        let port = server.port();

        let handle = tokio::spawn(async move {
            verify(&client(), port, exit, Duration::from_millis(10)).await
        });
        while mock.hits_async().await < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        exit_tx.send_replace(Some(ExitReport { code: Some(1) }));

        let outcome = handle.await.unwrap();
        assert_eq!(
            outcome,
            Verification::ProcessExited(ExitReport { code: Some(1) })
        );
    }

    #[tokio::test]
    async fn test_exit_before_any_answer_abandons_verification() {
        // Nothing listens on this port.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let (exit_tx, exit) = ExitWatch::channel();

        let handle = tokio::spawn(async move {
            verify(&client(), port, exit, Duration::from_millis(50)).await
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        exit_tx.send_replace(Some(ExitReport { code: None }));

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("verification should stop on exit")
            .unwrap();
        assert_eq!(outcome, Verification::ProcessExited(ExitReport { code: None }));
    }

    #[tokio::test]
    async fn test_already_exited_process_is_not_polled() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/");
                then.status(200).json_body(json!({"result": "0"}));
            })
            .await;
        let (exit_tx, exit) = ExitWatch::channel();
        exit_tx.send_replace(Some(ExitReport { code: Some(0) }));

        let outcome = verify(&client(), server.port(), exit, Duration::from_millis(10)).await;

        assert!(matches!(outcome, Verification::ProcessExited(_)));
        assert_eq!(mock.hits_async().await, 0);
    }
}
