//! Translation of a container's declarative mounts and network into
//! OS-ready specifications.
//!
//! The engine does not interpret these; they travel to the executor inside
//! the [`LaunchSpec`](crate::executor::LaunchSpec).

pub mod capabilities;

use crate::container::{ContainerConfig, NetworkConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Context key carrying the SELinux/AppArmor mount label.
pub const MOUNT_LABEL_KEY: &str = "mount_label";
/// Network context key: path of an existing network namespace to join.
pub const NSPATH_KEY: &str = "nspath";
/// Network context key: host bridge to attach to.
pub const BRIDGE_KEY: &str = "bridge";
/// Network context key: veth interface name prefix.
pub const VETH_PREFIX_KEY: &str = "prefix";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub mount_type: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub writable: bool,
    pub private: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub no_pivot_root: bool,
    pub readonly_fs: bool,
    pub device_nodes: Vec<String>,
    pub mount_label: Option<String>,
    pub mounts: Vec<Mount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub network_type: String,
    pub ns_path: Option<String>,
    pub bridge: Option<String>,
    pub veth_prefix: Option<String>,
    pub address: Option<String>,
    pub gateway: Option<String>,
    pub mtu: Option<u32>,
}

pub fn build_mount_spec(config: &ContainerConfig) -> MountSpec {
    MountSpec {
        no_pivot_root: config.no_pivot_root,
        readonly_fs: config.readonly_rootfs,
        device_nodes: config.device_nodes.clone(),
        mount_label: config.context.get(MOUNT_LABEL_KEY).cloned(),
        mounts: config
            .mounts
            .iter()
            .map(|m| Mount {
                mount_type: m.mount_type.clone(),
                source: m.source.clone(),
                destination: m.destination.clone(),
                writable: m.writable,
                private: m.private,
            })
            .collect(),
    }
}

pub fn build_network_spec(network: &NetworkConfig) -> NetworkSpec {
    NetworkSpec {
        network_type: network.network_type.clone(),
        ns_path: network.context.get(NSPATH_KEY).cloned(),
        bridge: network.context.get(BRIDGE_KEY).cloned(),
        veth_prefix: network.context.get(VETH_PREFIX_KEY).cloned(),
        address: network.address.clone(),
        gateway: network.gateway.clone(),
        mtu: network.mtu,
    }
}
