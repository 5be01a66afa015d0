//! Test fixtures for supervisor configurations and homes.

use mf_core::config::AppConfig;
use mf_protocol::config_models::SupervisorSettings;
use mf_protocol::ipc::Event;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// Configuration with fast polling whose `uv` resolves to `sh`, so
/// `which` succeeds while the scripted launcher does the actual work.
pub fn test_config(home: &Path) -> AppConfig {
    let settings = SupervisorSettings {
        uv: "sh".to_string(),
        poll_interval_ms: 20,
        request_timeout_ms: 1000,
        startup_timeout_ms: 5000,
        shutdown_grace_ms: 2000,
        ..SupervisorSettings::default()
    };
    AppConfig::new(home, settings)
}

/// Lay out a home that looks like a finished installation.
#[allow(dead_code)]
pub fn mark_installed(config: &AppConfig) -> std::io::Result<()> {
    let python = config.env_python();
    if let Some(bin) = python.parent() {
        std::fs::create_dir_all(bin)?;
    }
    std::fs::write(&python, "")?;
    std::fs::write(config.install_marker(), "installed\n")
}

/// A loopback port nothing listens on.
#[allow(dead_code)]
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Shell script that announces `port` and stays alive until `stop_file`
/// exists.
#[allow(dead_code)]
pub fn service_until(port: u16, stop_file: &Path) -> String {
    format!(
        "echo 'Loading MathFormer'; echo PORT:{port}; while [ ! -f '{}' ]; do sleep 0.05; done",
        stop_file.display()
    )
}

/// Drain every event that is already queued.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Receive events until `predicate` matches one or `timeout` passes.
#[allow(dead_code)]
pub async fn wait_for_event(
    rx: &mut mpsc::UnboundedReceiver<Event>,
    timeout: Duration,
    predicate: impl Fn(&Event) -> bool,
) -> Option<Event> {
    tokio::time::timeout(timeout, async {
        while let Some(event) = rx.recv().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}
