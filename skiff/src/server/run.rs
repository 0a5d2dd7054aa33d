//! `run`: create a container, start it and bridge the client to it.
//!
//! Disconnect policy: when stdin is attached, the client going away closes
//! the container's stdin. Without attached stdin a disconnect never touches
//! the container.

use crate::container::{Container, OutputPipe};
use crate::runtime::Runtime;
use crate::server::bridge::{self, CopyEnd};
use crate::server::commands::{ClientInput, ClientOutput, RunArgs};
use crate::util::{Closeable, close_all};
use skiff_shared::errors::{SkiffError, SkiffResult};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

pub(crate) async fn run(
    runtime: &Runtime,
    args: RunArgs,
    input: ClientInput,
    output: ClientOutput,
) -> SkiffResult<i32> {
    let config = args.to_config()?;
    let container = runtime.create(config).await?;

    match bridge_streams(&container, &args, input, output).await {
        Ok(exited) => finish(runtime, &container, exited, args.rm).await,
        Err(e) => {
            if args.rm {
                remove_after_error(runtime, &container).await;
            }
            Err(e)
        }
    }
}

/// Start the container and copy between it and the client.
///
/// Returns whether the process exit was observed.
async fn bridge_streams(
    container: &Arc<Container>,
    args: &RunArgs,
    input: ClientInput,
    mut output: ClientOutput,
) -> SkiffResult<bool> {
    let attach = args.attach_set();

    // Acquire before start so no early output is lost
    let stdin = if attach.stdin {
        Some(container.stdin_pipe()?)
    } else {
        None
    };
    let mut outputs = Vec::new();
    if attach.stdout {
        outputs.push(container.stdout_pipe());
    }
    if attach.stderr {
        outputs.push(container.stderr_pipe());
    }
    let closers: Vec<_> = outputs.iter().map(OutputPipe::closer).collect();

    container.start().await?;

    let output_task = if outputs.is_empty() {
        let id_line = format!("{}\n", container.short_id());
        let written = async {
            output.write_all(id_line.as_bytes()).await?;
            output.shutdown().await
        }
        .await;
        if let Err(e) = written {
            tracing::debug!(container_id = %container.short_id(), error = %e, "client gone before id was written");
        }
        drop(output);
        None
    } else {
        Some(tokio::spawn(bridge::pump_outputs(outputs, output)))
    };

    let input_task = stdin.clone().map(|mut pipe| {
        tokio::spawn(async move { bridge::pump(input, &mut pipe).await })
    });

    let mut exited = false;
    if let Some(mut input_task) = input_task {
        tokio::select! {
            end = &mut input_task => {
                tracing::debug!(
                    container_id = %container.short_id(),
                    end = ?end.ok(),
                    "client input ended, closing container stdin"
                );
                if let Some(stdin) = &stdin {
                    stdin.close_now();
                }
            }
            _ = container.wait() => {
                input_task.abort();
                exited = true;
            }
        }
    }

    if let Some(output_task) = output_task {
        match output_task.await {
            // Output reaches EOF only once the process is gone
            Ok(CopyEnd::SourceClosed) => {
                container.wait().await?;
                exited = true;
            }
            Ok(CopyEnd::SinkClosed) => {
                tracing::debug!(container_id = %container.short_id(), "client stopped reading output");
                if let Some(stdin) = &stdin {
                    stdin.close_now();
                }
            }
            Err(e) => {
                return Err(SkiffError::Internal(format!("output copy task failed: {}", e)));
            }
        }
    }

    let resources: Vec<&dyn Closeable> = closers.iter().map(|c| c as &dyn Closeable).collect();
    close_all(&resources).await?;
    Ok(exited)
}

/// `--rm` cleanup for a run that failed after the container was created.
///
/// A container that never started is removed now; a running one is removed
/// once it exits.
async fn remove_after_error(runtime: &Runtime, container: &Arc<Container>) {
    if container.is_running() {
        schedule_removal(runtime, container);
        return;
    }
    if let Err(e) = runtime.destroy(container).await {
        tracing::warn!(container_id = %container.short_id(), error = %e, "failed to remove container");
    }
}

fn schedule_removal(runtime: &Runtime, container: &Arc<Container>) {
    let runtime = runtime.clone();
    let container = Arc::clone(container);
    tokio::spawn(async move {
        if container.wait().await.is_ok()
            && let Err(e) = runtime.destroy(&container).await
        {
            tracing::warn!(container_id = %container.short_id(), error = %e, "failed to remove container");
        }
    });
}

/// Exit code of an observed exit, 0 when the client detached early.
async fn finish(
    runtime: &Runtime,
    container: &Arc<Container>,
    exited: bool,
    remove: bool,
) -> SkiffResult<i32> {
    if !exited {
        if remove {
            schedule_removal(runtime, container);
        }
        return Ok(0);
    }

    let exit_code = container.state().exit_code;
    if remove {
        runtime.destroy(container).await?;
    }
    Ok(exit_code)
}
