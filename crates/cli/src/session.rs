//! JSON-lines bridge between a UI shell and the supervisor.
//!
//! Each stdin line is a [`Request`]; requests are dispatched concurrently so
//! a long `install` never blocks `checkReady`. Stdout receives one
//! [`Response`] per request plus every [`Event`] wrapped in an
//! [`EventEnvelope`]. End of input shuts the supervisor down.

use color_eyre::eyre::Result;
use mf_core::config::AppConfig;
use mf_core::Supervisor;
use mf_protocol::ipc::{Event, EventEnvelope, Request, Response};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

pub async fn run(config: AppConfig) -> Result<()> {
    let grace = config.shutdown_grace();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Event>();
    let supervisor = Supervisor::new(config, events_tx)?;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(mut line) = out_rx.recv().await {
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let event_out = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            send_line(&event_out, &EventEnvelope { event });
        }
    });

    tracing::info!("session started");
    let mut bridge = Bridge::new(supervisor.clone(), out_tx);
    let served = bridge
        .serve(BufReader::new(tokio::io::stdin()))
        .await;

    tracing::info!("input closed, shutting down");
    supervisor.shutdown().await;
    bridge.finish(grace).await;

    forwarder.abort();
    let _ = forwarder.await;
    let _ = writer.await;
    served?;
    Ok(())
}

/// Dispatches requests and keeps their handler tasks.
struct Bridge {
    supervisor: Supervisor,
    out: mpsc::UnboundedSender<String>,
    handlers: JoinSet<()>,
}

impl Bridge {
    fn new(supervisor: Supervisor, out: mpsc::UnboundedSender<String>) -> Self {
        Self {
            supervisor,
            out,
            handlers: JoinSet::new(),
        }
    }

    /// Read requests until end of input. Finished handlers are reaped as
    /// they complete.
    async fn serve<R: AsyncBufRead + Unpin>(&mut self, input: R) -> std::io::Result<()> {
        let mut lines = input.lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => self.submit(&line),
                    None => return Ok(()),
                },
                Some(joined) = self.handlers.join_next(), if !self.handlers.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "request handler failed");
                    }
                }
            }
        }
    }

    fn submit(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed request");
                return;
            }
        };

        tracing::debug!(id = request.id, op = ?request.op, "request received");
        let supervisor = self.supervisor.clone();
        let out = self.out.clone();
        self.handlers.spawn(async move {
            let reply = supervisor.dispatch(request.op).await;
            send_line(&out, &Response { id: request.id, reply });
        });
    }

    /// Answer requests still in flight if they settle within `grace`, then
    /// abandon the rest.
    async fn finish(mut self, grace: Duration) {
        let drain = async { while self.handlers.join_next().await.is_some() {} };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!("abandoning unanswered requests");
        }
        self.handlers.shutdown().await;
    }
}

fn send_line<T: Serialize>(out: &mpsc::UnboundedSender<String>, message: &T) {
    match serde_json::to_string(message) {
        Ok(line) => {
            let _ = out.send(line);
        }
        Err(e) => tracing::error!(error = %e, "failed to encode message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_protocol::ipc::Reply;
    use tempfile::tempdir;

    fn bridge(home: &std::path::Path) -> (Bridge, mpsc::UnboundedReceiver<String>) {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(AppConfig::with_defaults(home), events_tx)
            .expect("Failed to create supervisor");
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (Bridge::new(supervisor, out_tx), out_rx)
    }

    #[tokio::test]
    async fn test_answered_requests_do_not_accumulate() {
        let home = tempdir().expect("Failed to create temp dir");
        let (mut bridge, mut out) = bridge(home.path());
        let (mut client, server) = tokio::io::duplex(4096);

        let client_side = async {
            for id in 0..20 {
                let line = format!("{{\"id\":{id},\"op\":{{\"type\":\"checkReady\"}}}}\n");
                client.write_all(line.as_bytes()).await.expect("Failed to write request");
            }
            for _ in 0..20 {
                let line = out.recv().await.expect("Missing response");
                let response: Response = serde_json::from_str(&line).expect("Invalid response");
                assert_eq!(response.reply, Reply::Ready { ready: false });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            client
                .write_all(b"{\"id\":99,\"op\":{\"type\":\"getStatus\"}}\n")
                .await
                .expect("Failed to write request");
            drop(client);
        };

        let (served, ()) = tokio::join!(bridge.serve(BufReader::new(server)), client_side);
        served.expect("Serving should succeed");
        assert!(bridge.handlers.len() <= 1, "{} handlers kept", bridge.handlers.len());

        bridge.finish(Duration::from_secs(1)).await;
        let last: Response =
            serde_json::from_str(&out.recv().await.expect("Missing response")).expect("Invalid response");
        assert_eq!(last.id, 99);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let home = tempdir().expect("Failed to create temp dir");
        let (mut bridge, mut out) = bridge(home.path());
        let input: &[u8] = b"not json\n\n{\"id\":3,\"op\":{\"type\":\"checkInstalled\"}}\n";

        bridge.serve(input).await.expect("Serving should succeed");
        bridge.finish(Duration::from_secs(1)).await;

        let response: Response =
            serde_json::from_str(&out.recv().await.expect("Missing response")).expect("Invalid response");
        assert_eq!(response.id, 3);
        assert_eq!(response.reply, Reply::Installed { installed: false });
        assert!(out.try_recv().is_err());
    }
}
