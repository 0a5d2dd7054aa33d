//! Engine commands: a closed set of typed operations and their handlers.
//!
//! Every command receives the client's input and output streams. Only `run`
//! and `attach` bridge them to a container; the others write a short report.

use crate::container::{Container, ContainerConfig, ContainerStatus, parse_memory};
use crate::logs::LogStream;
use crate::runtime::Runtime;
use crate::server::{attach, run};
use chrono::{DateTime, Utc};
use clap::error::ErrorKind;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use skiff_shared::errors::{SkiffError, SkiffResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Client stdin as seen by a command handler.
pub type ClientInput = Box<dyn AsyncRead + Send + Unpin>;
/// Client stdout as seen by a command handler.
pub type ClientOutput = Box<dyn AsyncWrite + Send + Unpin>;

/// One engine request, parsed from argv without a binary name.
#[derive(Parser, Debug)]
#[command(
    name = "skiff",
    no_binary_name = true,
    disable_help_subcommand = true,
    disable_version_flag = true
)]
pub struct Request {
    #[command(subcommand)]
    pub command: Command,
}

impl Request {
    pub fn from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and start a container
    // `-h` is the hostname, so help is only reachable as `--help`
    #[command(disable_help_flag = true)]
    Run(RunArgs),
    /// Attach to a container's standard streams
    Attach(AttachArgs),
    /// Start created containers
    Start(TargetsArgs),
    /// Kill running containers
    Kill(TargetsArgs),
    /// Block until containers exit, then print their exit codes
    Wait(TargetsArgs),
    /// List containers
    Ps(PsArgs),
    /// Remove containers
    Rm(RmArgs),
    /// Print what a container wrote to stdout or stderr
    Logs(LogsArgs),
}

/// A standard stream `run -a` can attach to.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

/// Streams a `run` connects to the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachSet {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Keep stdin open and attach it
    #[arg(short = 'i', long)]
    pub interactive: bool,

    /// Allocate a pseudo-terminal
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Run in the background and print the container id
    #[arg(short = 'd', long)]
    pub detach: bool,

    /// Remove the container once it exits
    #[arg(long)]
    pub rm: bool,

    /// Attach to STDIN, STDOUT or STDERR
    #[arg(short = 'a', long = "attach", value_enum, value_name = "STREAM")]
    pub attach: Vec<StdStream>,

    /// Container hostname
    #[arg(short = 'h', long)]
    pub hostname: Option<String>,

    /// Memory limit (e.g. 512m, 1g)
    #[arg(short = 'm', long, value_parser = parse_memory_arg)]
    pub memory: Option<u64>,

    /// Set environment variables
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Working directory inside the container
    #[arg(short = 'w', long = "workdir")]
    pub workdir: Option<PathBuf>,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Image to run
    pub image: String,

    /// Command and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Streams to connect: none when detached, the explicit `-a` list if
    /// any, otherwise stdout and stderr plus stdin with `-i`.
    pub fn attach_set(&self) -> AttachSet {
        if self.detach {
            return AttachSet::default();
        }
        if self.attach.is_empty() {
            return AttachSet {
                stdin: self.interactive,
                stdout: true,
                stderr: true,
            };
        }
        AttachSet {
            stdin: self.attach.contains(&StdStream::Stdin),
            stdout: self.attach.contains(&StdStream::Stdout),
            stderr: self.attach.contains(&StdStream::Stderr),
        }
    }

    /// Reject flag combinations that cannot be honored, before anything is created.
    pub fn validate(&self) -> SkiffResult<()> {
        if self.attach.contains(&StdStream::Stdin) && !self.interactive {
            return Err(SkiffError::InvalidArgument(
                "attaching stdin requires -i, the container's stdin is closed otherwise".into(),
            ));
        }
        Ok(())
    }

    pub fn to_config(&self) -> SkiffResult<ContainerConfig> {
        self.validate()?;
        let mut env = BTreeMap::new();
        for pair in &self.env {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                SkiffError::InvalidArgument(format!("invalid env '{}', expected KEY=VALUE", pair))
            })?;
            env.insert(key.to_string(), value.to_string());
        }

        let mut config = ContainerConfig::new(self.image.clone(), self.command.clone())
            .open_stdin(self.interactive)
            .tty(self.tty);
        config.env = env;
        config.hostname = self.hostname.clone();
        config.working_dir = self.workdir.clone();
        config.memory = self.memory;
        Ok(config)
    }
}

fn parse_memory_arg(value: &str) -> Result<u64, String> {
    parse_memory(value).map_err(|e| e.to_string())
}

#[derive(Args, Debug, Clone)]
pub struct AttachArgs {
    /// Container id or unique id prefix
    pub container: String,
}

#[derive(Args, Debug, Clone)]
pub struct TargetsArgs {
    /// Container ids or unique id prefixes
    #[arg(required = true, num_args = 1..)]
    pub containers: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PsArgs {
    /// Show all containers (default shows just running)
    #[arg(short, long)]
    pub all: bool,

    /// Only display container ids
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RmArgs {
    /// Kill the container first if it is running
    #[arg(short, long)]
    pub force: bool,

    /// Container ids or unique id prefixes
    #[arg(required = true, num_args = 1..)]
    pub containers: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct LogsArgs {
    /// Print stderr instead of stdout
    #[arg(long)]
    pub stderr: bool,

    /// Container id or unique id prefix
    pub container: String,
}

/// Parse `args` and execute the command.
///
/// Help requests are answered on `output` with exit code 0; other parse
/// failures are `InvalidArgument`.
pub async fn dispatch(
    runtime: &Runtime,
    args: &[String],
    input: ClientInput,
    mut output: ClientOutput,
) -> SkiffResult<i32> {
    let request = match Request::from_args(args) {
        Ok(request) => request,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            output.write_all(e.render().to_string().as_bytes()).await?;
            output.shutdown().await?;
            return Ok(0);
        }
        Err(e) => return Err(SkiffError::InvalidArgument(e.render().to_string())),
    };
    execute(runtime, request.command, input, output).await
}

/// Execute one command. The result is the exit code the client should use.
pub async fn execute(
    runtime: &Runtime,
    command: Command,
    input: ClientInput,
    mut output: ClientOutput,
) -> SkiffResult<i32> {
    tracing::debug!(?command, "executing command");
    let code = match command {
        Command::Run(args) => return run::run(runtime, args, input, output).await,
        Command::Attach(args) => return attach::attach(runtime, &args.container, input, output).await,
        Command::Start(args) => start(runtime, &args.containers, &mut output).await?,
        Command::Kill(args) => kill(runtime, &args.containers, &mut output).await?,
        Command::Wait(args) => wait(runtime, &args.containers, &mut output).await?,
        Command::Ps(args) => ps(runtime, &args, &mut output).await?,
        Command::Rm(args) => rm(runtime, &args, &mut output).await?,
        Command::Logs(args) => logs(runtime, &args, &mut output).await?,
    };
    output.shutdown().await?;
    Ok(code)
}

async fn start(runtime: &Runtime, targets: &[String], output: &mut ClientOutput) -> SkiffResult<i32> {
    for target in targets {
        let container = runtime.get(target)?;
        container.start().await?;
        write_line(output, container.short_id()).await?;
    }
    Ok(0)
}

async fn kill(runtime: &Runtime, targets: &[String], output: &mut ClientOutput) -> SkiffResult<i32> {
    for target in targets {
        let container = runtime.get(target)?;
        container.kill()?;
        write_line(output, container.short_id()).await?;
    }
    Ok(0)
}

async fn wait(runtime: &Runtime, targets: &[String], output: &mut ClientOutput) -> SkiffResult<i32> {
    let mut last = 0;
    for target in targets {
        let container = runtime.get(target)?;
        let state = container.wait().await?;
        last = state.exit_code;
        write_line(output, &state.exit_code.to_string()).await?;
    }
    Ok(last)
}

async fn rm(runtime: &Runtime, args: &RmArgs, output: &mut ClientOutput) -> SkiffResult<i32> {
    let mut errors = Vec::new();
    for target in &args.containers {
        let result = match runtime.get(target) {
            Ok(container) if container.is_running() && !args.force => {
                Err(SkiffError::InvalidState(format!(
                    "container {} is running, stop it or use --force",
                    container.short_id()
                )))
            }
            Ok(container) => runtime
                .destroy(&container)
                .await
                .map(|()| container.short_id().to_string()),
            Err(e) => Err(e),
        };
        match result {
            Ok(id) => write_line(output, &id).await?,
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "failed to remove container");
                errors.push(e);
            }
        }
    }
    SkiffError::aggregate(errors)?;
    Ok(0)
}

async fn logs(runtime: &Runtime, args: &LogsArgs, output: &mut ClientOutput) -> SkiffResult<i32> {
    let container = runtime.get(&args.container)?;
    let stream = if args.stderr {
        LogStream::Stderr
    } else {
        LogStream::Stdout
    };
    let mut reader = container.read_log(stream).await?;
    tokio::io::copy(&mut reader, output).await?;
    output.flush().await?;
    Ok(0)
}

#[derive(Tabled)]
struct PsRow {
    #[tabled(rename = "CONTAINER ID")]
    id: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "COMMAND")]
    command: String,
    #[tabled(rename = "CREATED")]
    created: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

impl PsRow {
    fn from_container(container: &Arc<Container>, now: DateTime<Utc>) -> Self {
        let state = container.state();
        let status = match state.status {
            ContainerStatus::Created => "Created".to_string(),
            ContainerStatus::Running => match state.started_at {
                Some(at) => format!("Up {}", human_duration(now - at)),
                None => "Up".to_string(),
            },
            ContainerStatus::Exited => match state.finished_at {
                Some(at) => format!("Exited ({}) {} ago", state.exit_code, human_duration(now - at)),
                None => format!("Exited ({})", state.exit_code),
            },
        };
        Self {
            id: container.short_id().to_string(),
            image: container.image().name.clone(),
            command: container.config().cmd.join(" "),
            created: format!("{} ago", human_duration(now - state.created_at)),
            status,
        }
    }
}

async fn ps(runtime: &Runtime, args: &PsArgs, output: &mut ClientOutput) -> SkiffResult<i32> {
    let containers: Vec<_> = runtime
        .list()
        .into_iter()
        .filter(|c| args.all || c.is_running())
        .collect();

    if args.quiet {
        for container in &containers {
            write_line(output, container.short_id()).await?;
        }
        return Ok(0);
    }

    let now = Utc::now();
    let rows: Vec<_> = containers
        .iter()
        .map(|c| PsRow::from_container(c, now))
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::blank());
    write_line(output, &table.to_string()).await?;
    Ok(0)
}

fn human_duration(d: chrono::TimeDelta) -> String {
    let secs = d.num_seconds().max(0);
    match secs {
        0..=59 => format!("{} seconds", secs),
        60..=3599 => format!("{} minutes", secs / 60),
        3600..=86399 => format!("{} hours", secs / 3600),
        _ => format!("{} days", secs / 86400),
    }
}

async fn write_line(output: &mut ClientOutput, line: &str) -> SkiffResult<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}
