use clap::{Args, Parser, Subcommand};
use skiff::RuntimeOptions;
use skiff::server::Command;
use skiff_shared::Transport;
use skiff_shared::constants::envs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "skiff", version, about = "Run and attach to containers")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted before the subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Runtime home directory
    #[arg(long, env = envs::SKIFF_HOME, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Daemon address (unix:///path or tcp://host:port)
    #[arg(long, env = envs::SKIFF_HOST, value_name = "URI")]
    pub host: Option<String>,

    /// Verbose logging
    #[arg(long)]
    pub debug: bool,
}

impl GlobalFlags {
    pub fn runtime_options(&self) -> RuntimeOptions {
        match &self.home {
            Some(home) => {
                RuntimeOptions::with_home(std::path::absolute(home).unwrap_or_else(|_| home.clone()))
            }
            None => RuntimeOptions::default(),
        }
    }

    /// Where the daemon listens: `--host`, else the socket in the home dir.
    pub fn transport(&self) -> anyhow::Result<Transport> {
        match &self.host {
            Some(uri) => Transport::from_uri(uri).map_err(anyhow::Error::msg),
            None => {
                let options = self.runtime_options();
                Ok(Transport::unix(
                    skiff::runtime::layout::FilesystemLayout::new(options.home_dir).socket_path(),
                ))
            }
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine daemon
    Daemon(DaemonArgs),

    #[command(flatten)]
    Engine(Command),
}

#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Listen address instead of the home socket (unix:///path or tcp://host:port)
    #[arg(long, value_name = "URI")]
    pub listen: Option<String>,
}

/// Leading global flags are consumed locally; everything from the
/// subcommand on is forwarded to the daemon untouched.
pub fn forwarded_args(raw: &[String]) -> Vec<String> {
    let mut i = 0;
    while i < raw.len() {
        let arg = raw[i].as_str();
        match arg {
            "--debug" => i += 1,
            "--home" | "--host" => i += 2,
            _ if arg.starts_with("--home=") || arg.starts_with("--host=") => i += 1,
            _ => break,
        }
    }
    raw.get(i..).map(<[String]>::to_vec).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_forwarded_args_strip_globals() {
        let raw = strings(&["--home", "/tmp/s", "--debug", "run", "-i", "base", "cat"]);
        assert_eq!(forwarded_args(&raw), strings(&["run", "-i", "base", "cat"]));
    }

    #[test]
    fn test_forwarded_args_equals_form() {
        let raw = strings(&["--host=tcp://127.0.0.1:7777", "ps", "-a"]);
        assert_eq!(forwarded_args(&raw), strings(&["ps", "-a"]));
    }

    #[test]
    fn test_forwarded_args_keep_flags_after_subcommand() {
        let raw = strings(&["run", "base", "sh", "-c", "echo --debug"]);
        assert_eq!(forwarded_args(&raw), raw);
    }

    #[test]
    fn test_forwarded_args_dangling_global() {
        assert!(forwarded_args(&strings(&["--home"])).is_empty());
    }

    #[test]
    fn test_engine_commands_flattened() {
        let cli = Cli::try_parse_from(["skiff", "--home", "/tmp/s", "run", "-h", "box", "base", "hostname"])
            .unwrap();
        assert_eq!(cli.global.home, Some(PathBuf::from("/tmp/s")));
        match cli.command {
            Commands::Engine(Command::Run(run)) => {
                assert_eq!(run.hostname.as_deref(), Some("box"));
                assert_eq!(run.command, vec!["hostname"]);
            }
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_default_transport_is_home_socket() {
        let flags = GlobalFlags {
            home: Some(PathBuf::from("/srv/skiff")),
            host: None,
            debug: false,
        };
        assert_eq!(
            flags.transport().unwrap(),
            Transport::unix(PathBuf::from("/srv/skiff/skiff.sock"))
        );
    }
}
