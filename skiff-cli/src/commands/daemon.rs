use crate::cli::{DaemonArgs, GlobalFlags};
use anyhow::Context;
use skiff::Runtime;
use skiff::server::Daemon;
use skiff_shared::Transport;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

pub async fn execute(args: DaemonArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let options = global.runtime_options();
    let runtime = Runtime::open(options)
        .await
        .context("failed to open runtime")?;

    let transport = match &args.listen {
        Some(uri) => Transport::from_uri(uri).map_err(anyhow::Error::msg)?,
        None => Transport::unix(runtime.layout().socket_path()),
    };

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received interrupt"),
            _ = terminate.recv() => tracing::info!("Received SIGTERM"),
        }
        token.cancel();
    });

    Daemon::new(runtime, transport)
        .serve(shutdown)
        .await
        .context("daemon failed")
}
