//! skiff - container engine CLI.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, forwarded_args};
use skiff::runtime::layout::FilesystemLayout;
use skiff::server::Command;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    // Client stdin is read on a blocking thread that would hold up a graceful shutdown
    runtime.shutdown_background();
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Daemon(args) => {
            let level = if cli.global.debug { "debug" } else { "info" };
            let logs_dir = FilesystemLayout::new(cli.global.runtime_options().home_dir).logs_dir();
            let _guard = skiff::util::init_daemon_logging(&logs_dir, level)?;
            commands::daemon::execute(args, &cli.global).await?;
            Ok(0)
        }
        Commands::Engine(command) => {
            init_client_logging(cli.global.debug);
            let tty = matches!(&command, Command::Run(run) if run.tty);
            let raw: Vec<String> = std::env::args().skip(1).collect();
            commands::client::execute(forwarded_args(&raw), tty, &cli.global).await
        }
    }
}

fn init_client_logging(debug: bool) {
    let filter = if debug { "skiff=debug,skiff_cli=debug" } else { "error" };
    tracing_subscriber::registry()
        .with(skiff::util::env_filter(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}
