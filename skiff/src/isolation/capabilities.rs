//! Linux capability names.
//!
//! Static lookup of every capability the engine recognizes, indexed by
//! kernel capability number.

const CAPABILITIES: &[&str] = &[
    // File operations (0-4)
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    // Process (5-9)
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_LINUX_IMMUTABLE",
    // Network (10-13)
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_ADMIN",
    "CAP_NET_RAW",
    // IPC (14-15)
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    // System (16-26)
    "CAP_SYS_MODULE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_CHROOT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_PACCT",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_NICE",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    // Devices, leases, audit, file caps (27-31)
    "CAP_MKNOD",
    "CAP_LEASE",
    "CAP_AUDIT_WRITE",
    "CAP_AUDIT_CONTROL",
    "CAP_SETFCAP",
    // MAC (32-33)
    "CAP_MAC_OVERRIDE",
    "CAP_MAC_ADMIN",
    // Newer kernels (34-40)
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
    "CAP_BLOCK_SUSPEND",
    "CAP_AUDIT_READ",
    "CAP_PERFMON",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
];

/// Every recognized capability name, in kernel order.
pub fn all_capabilities() -> Vec<&'static str> {
    CAPABILITIES.to_vec()
}

/// Kernel number of a capability. Accepts `CAP_NET_ADMIN`, `NET_ADMIN` or `net_admin`.
pub fn number(name: &str) -> Option<usize> {
    let upper = name.to_ascii_uppercase();
    let full = if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    };
    CAPABILITIES.iter().position(|cap| *cap == full)
}

pub fn is_known(name: &str) -> bool {
    number(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_all_capabilities() {
        let caps = all_capabilities();
        assert_eq!(caps.len(), 41);

        let unique: HashSet<_> = caps.iter().collect();
        assert_eq!(unique.len(), caps.len());
        assert!(caps.iter().all(|c| c.starts_with("CAP_")));
    }

    #[test]
    fn test_kernel_numbers() {
        assert_eq!(number("CAP_CHOWN"), Some(0));
        assert_eq!(number("CAP_SYS_ADMIN"), Some(21));
        assert_eq!(number("CAP_CHECKPOINT_RESTORE"), Some(40));
    }

    #[test]
    fn test_name_forms() {
        assert!(is_known("CAP_NET_ADMIN"));
        assert!(is_known("NET_ADMIN"));
        assert!(is_known("net_admin"));
        assert!(!is_known("CAP_TIME_TRAVEL"));
        assert!(!is_known(""));
    }
}
