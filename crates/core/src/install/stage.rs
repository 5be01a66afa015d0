//! One installer process, observed as a stream.

use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::wrappers::SplitStream;
use tokio_stream::{Stream, StreamExt};

use crate::process::{ExitReport, LaunchSpec, Launcher, SpawnError};

/// Output of a running stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    /// One line from stdout or stderr, in arrival order.
    Line(String),
    /// The process exited. Always the last item.
    Exited(ExitReport),
}

type LineStream = Pin<Box<dyn Stream<Item = std::io::Result<Vec<u8>>> + Send>>;

fn lines_of<R>(reader: Option<R>) -> LineStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    match reader {
        Some(reader) => Box::pin(SplitStream::new(BufReader::new(reader).split(b'\n'))),
        None => Box::pin(tokio_stream::empty()),
    }
}

/// Launch `spec` and stream its combined output followed by its exit.
///
/// A launch failure yields a single `Err` and ends the stream. Dropping the
/// stream terminates the process.
///
/// # Example
///
/// ```no_run
/// use mf_core::install::{run_stage, StageOutput};
/// use mf_core::process::{LaunchSpec, ProcessSpawner};
/// use std::sync::Arc;
/// use tokio_stream::StreamExt;
///
/// #[tokio::main]
/// async fn main() {
///     let mut stage = run_stage(Arc::new(ProcessSpawner), LaunchSpec::new("uv").args(["--version"]));
///     while let Some(Ok(output)) = stage.next().await {
///         if let StageOutput::Line(line) = output {
///             println!("{line}");
///         }
///     }
/// }
/// ```
pub fn run_stage(
    launcher: Arc<dyn Launcher>,
    spec: LaunchSpec,
) -> Pin<Box<dyn Stream<Item = Result<StageOutput, SpawnError>> + Send>> {
    let stream = async_stream::stream! {
        let mut process = match launcher.launch(&spec).await {
            Ok(process) => process,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        let mut output = lines_of(process.take_stdout()).merge(lines_of(process.take_stderr()));
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(raw) => {
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.strip_suffix('\r').unwrap_or(&*line);
                    yield Ok(StageOutput::Line(line.to_string()));
                }
                Err(e) => {
                    tracing::debug!(command = %spec, error = %e, "stage output closed early");
                    break;
                }
            }
        }

        let report = process.wait().await;
        yield Ok(StageOutput::Exited(report));
    };

    Box::pin(stream)
}
