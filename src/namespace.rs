/// Namespaces requested at spawn time and namespace introspection
use crate::types::{NsboxError, Result, SetupError};
use nix::sched::CloneFlags;
use std::fs;

/// The fixed set of namespaces every container gets: UTS, PID, mount and network
///
/// Individual namespaces cannot be switched off.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NamespaceSet;

impl NamespaceSet {
    /// Clone flags passed to `clone(2)` when spawning the bootstrap process
    pub fn clone_flags(&self) -> CloneFlags {
        CloneFlags::CLONE_NEWUTS
            | CloneFlags::CLONE_NEWPID
            | CloneFlags::CLONE_NEWNS
            | CloneFlags::CLONE_NEWNET
    }
}

/// Check if namespace isolation is supported on this system
pub fn is_supported() -> bool {
    fs::read_dir("/proc/self/ns").is_ok()
}

/// Read a namespace identity such as `net:[4026531840]` from /proc/self/ns/
pub fn namespace_id(ns_type: &str) -> Result<String> {
    read_ns_link(&format!("/proc/self/ns/{}", ns_type))
}

/// Network namespace identity of the calling thread
///
/// Differs from `namespace_id("net")` while a thread has switched
/// namespaces on its own.
pub fn thread_netns_id() -> Result<String> {
    read_ns_link("/proc/thread-self/ns/net")
}

fn read_ns_link(path: &str) -> Result<String> {
    match fs::read_link(path) {
        Ok(link) => Ok(link.to_string_lossy().to_string()),
        Err(e) => Err(NsboxError::Config(format!(
            "Failed to read namespace {}: {}",
            path, e
        ))),
    }
}

/// Set the hostname; only meaningful inside a fresh UTS namespace
pub fn set_hostname(hostname: &str) -> std::result::Result<(), SetupError> {
    nix::unistd::sethostname(hostname)
        .map_err(|e| SetupError::Hostname(format!("{}: {}", hostname, e)))?;
    log::debug!("hostname set to {}", hostname);
    Ok(())
}

/// Namespace identities of the current process, for diagnostics
#[derive(Debug, Clone)]
pub struct NamespaceInfo {
    /// Process ID as seen from the current PID namespace
    pub pid: u32,
    pub uts_namespace: String,
    pub pid_namespace: String,
    pub mount_namespace: String,
    pub network_namespace: String,
}

impl NamespaceInfo {
    /// Collect identities from /proc/self/ns/
    pub fn current() -> Result<Self> {
        Ok(Self {
            pid: std::process::id(),
            uts_namespace: namespace_id("uts")?,
            pid_namespace: namespace_id("pid")?,
            mount_namespace: namespace_id("mnt")?,
            network_namespace: namespace_id("net")?,
        })
    }
}

impl std::fmt::Display for NamespaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PID: {}, Namespaces: [UTS: {}, PID: {}, Mount: {}, Net: {}]",
            self.pid,
            self.uts_namespace,
            self.pid_namespace,
            self.mount_namespace,
            self.network_namespace
        )
    }
}
