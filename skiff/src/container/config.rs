//! Immutable container configuration.

use crate::isolation::capabilities;
use serde::{Deserialize, Serialize};
use skiff_shared::errors::{SkiffError, SkiffResult};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Maximum hostname length accepted by `sethostname(2)`.
const MAX_HOSTNAME_LEN: usize = 64;

/// Everything needed to launch a container. Fixed at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image reference, resolved through the image store.
    pub image: String,
    /// Program followed by its arguments.
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub hostname: Option<String>,
    /// Memory limit in bytes.
    #[serde(default)]
    pub memory: Option<u64>,
    /// Keep stdin open so clients can write to the process.
    #[serde(default)]
    pub open_stdin: bool,
    /// Allocate a pseudo-terminal. stdout and stderr share it.
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    /// Free-form hints for the isolation builder, e.g. `mount_label`.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    #[serde(default)]
    pub no_pivot_root: bool,
    #[serde(default)]
    pub readonly_rootfs: bool,
    #[serde(default)]
    pub device_nodes: Vec<String>,
    /// Capability names; empty means the default set.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Declarative mount as requested by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(default = "default_mount_type")]
    pub mount_type: String,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub private: bool,
}

fn default_mount_type() -> String {
    "bind".to_string()
}

/// Declarative network attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub network_type: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub mtu: Option<u32>,
    /// Builder hints (`nspath`, `bridge`, `prefix`).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ContainerConfig {
    pub fn new(image: impl Into<String>, cmd: Vec<String>) -> Self {
        Self {
            image: image.into(),
            cmd,
            env: BTreeMap::new(),
            working_dir: None,
            hostname: None,
            memory: None,
            open_stdin: false,
            tty: false,
            mounts: Vec::new(),
            network: None,
            context: BTreeMap::new(),
            no_pivot_root: false,
            readonly_rootfs: false,
            device_nodes: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn open_stdin(mut self, open: bool) -> Self {
        self.open_stdin = open;
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory = Some(bytes);
        self
    }

    pub fn program(&self) -> &str {
        self.cmd.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.cmd.get(1..).unwrap_or_default()
    }

    /// Reject configurations that can never launch.
    pub fn validate(&self) -> SkiffResult<()> {
        if self.image.is_empty() {
            return Err(SkiffError::Config("image must not be empty".into()));
        }
        if self.program().is_empty() {
            return Err(SkiffError::Config("command must not be empty".into()));
        }
        if let Some(hostname) = &self.hostname
            && (hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN)
        {
            return Err(SkiffError::Config(format!(
                "hostname must be 1..={MAX_HOSTNAME_LEN} bytes, got {}",
                hostname.len()
            )));
        }
        if let Some(memory) = self.memory
            && memory == 0
        {
            return Err(SkiffError::Config("memory limit must be positive".into()));
        }
        for cap in &self.capabilities {
            if !capabilities::is_known(cap) {
                return Err(SkiffError::Config(format!("unknown capability {cap}")));
            }
        }
        Ok(())
    }
}

/// Parse a memory size such as `512m`, `1g`, `4096` or `64k` into bytes.
pub fn parse_memory(s: &str) -> SkiffResult<u64> {
    let s = s.trim();
    let invalid = || SkiffError::InvalidArgument(format!("invalid memory size '{s}'"));
    let (digits, multiplier) = match s.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => {
            let multiplier = match c.to_ascii_lowercase() {
                'b' => 1,
                'k' => 1 << 10,
                'm' => 1 << 20,
                'g' => 1 << 30,
                _ => return Err(invalid()),
            };
            (&s[..idx], multiplier)
        }
        Some(_) => (s, 1),
        None => return Err(invalid()),
    };
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat() -> ContainerConfig {
        ContainerConfig::new("base", vec!["/bin/cat".into()])
    }

    #[test]
    fn test_program_and_args() {
        let config = ContainerConfig::new("base", vec!["sh".into(), "-c".into(), "true".into()]);
        assert_eq!(config.program(), "sh");
        assert_eq!(config.args(), &["-c".to_string(), "true".to_string()]);
        assert!(cat().args().is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(cat().validate().is_ok());
        assert!(ContainerConfig::new("base", vec![]).validate().is_err());
        assert!(ContainerConfig::new("", vec!["true".into()]).validate().is_err());
        assert!(cat().hostname("").validate().is_err());
        assert!(cat().hostname("a".repeat(65)).validate().is_err());
        assert!(cat().hostname("foobar").validate().is_ok());

        let mut config = cat();
        config.capabilities = vec!["CAP_NET_ADMIN".into()];
        assert!(config.validate().is_ok());
        config.capabilities = vec!["CAP_TIME_TRAVEL".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("4096").unwrap(), 4096);
        assert_eq!(parse_memory("64k").unwrap(), 64 * 1024);
        assert_eq!(parse_memory("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory("1G").unwrap(), 1 << 30);
        assert!(parse_memory("").is_err());
        assert!(parse_memory("12x").is_err());
        assert!(parse_memory("m").is_err());
    }

    #[test]
    fn test_config_json_defaults() {
        let config: ContainerConfig =
            serde_json::from_str(r#"{"image":"base","cmd":["true"]}"#).unwrap();
        assert!(!config.open_stdin);
        assert!(config.env.is_empty());
        assert_eq!(config, ContainerConfig::new("base", vec!["true".into()]));
    }
}
