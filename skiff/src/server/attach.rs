//! `attach`: bridge a client to an existing container.
//!
//! The session ends when either direction closes, whether or not the
//! container accepts stdin. The container's stdin is never closed and the
//! process is never signaled, so a client can come and go any number of times.

use crate::runtime::Runtime;
use crate::server::bridge::{self, CopyEnd};
use crate::server::commands::{ClientInput, ClientOutput};
use crate::util::{Closeable, close_all};
use skiff_shared::errors::{SkiffError, SkiffResult};

pub(crate) async fn attach(
    runtime: &Runtime,
    target: &str,
    input: ClientInput,
    output: ClientOutput,
) -> SkiffResult<i32> {
    let container = runtime.get(target)?;
    if container.state().status.is_exited() {
        return Err(SkiffError::InvalidState(format!(
            "container {} has exited",
            container.short_id()
        )));
    }

    let outputs = vec![container.stdout_pipe(), container.stderr_pipe()];
    let closers: Vec<_> = outputs.iter().map(|p| p.closer()).collect();
    let mut output_task = tokio::spawn(bridge::pump_outputs(outputs, output));

    tracing::debug!(container_id = %container.short_id(), "client attached");

    let output_end = if container.config().open_stdin {
        let mut stdin = container.stdin_pipe()?;
        let mut input_task = tokio::spawn(async move { bridge::pump(input, &mut stdin).await });
        tokio::select! {
            end = &mut input_task => {
                tracing::debug!(container_id = %container.short_id(), end = ?end.ok(), "client input ended");
                output_task.abort();
                None
            }
            end = &mut output_task => {
                input_task.abort();
                end.ok()
            }
        }
    } else {
        // Input is discarded, but its end still marks the client leaving
        let mut input_task = tokio::spawn(async move {
            let mut input = input;
            bridge::pump(&mut input, &mut tokio::io::sink()).await
        });
        tokio::select! {
            _ = &mut input_task => {
                tracing::debug!(container_id = %container.short_id(), "client input ended");
                output_task.abort();
                None
            }
            end = &mut output_task => {
                input_task.abort();
                end.ok()
            }
        }
    };

    let resources: Vec<&dyn Closeable> = closers.iter().map(|c| c as &dyn Closeable).collect();
    close_all(&resources).await?;
    tracing::debug!(container_id = %container.short_id(), output_end = ?output_end, "client detached");

    // Output reaches EOF only once the process is gone
    if output_end == Some(CopyEnd::SourceClosed) {
        return Ok(container.wait().await?.exit_code);
    }
    Ok(0)
}
