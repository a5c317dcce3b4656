/// Core types and error taxonomy for nsbox
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

/// Prefix length of the single container subnet
pub const PREFIX_LEN: u8 = 24;

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL)
pub const MAX_IFNAME_LEN: usize = 15;

/// Static addressing for the one container network this host supports
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    /// veth end that stays in the freshly created namespace
    pub local_name: String,
    /// veth end moved back into the caller's namespace
    pub peer_name: String,
    /// Address assigned to the local end (always a /24)
    pub address: Ipv4Addr,
    /// Default gateway installed in the freshly created namespace
    pub gateway: Ipv4Addr,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            local_name: "veth1".to_string(),
            peer_name: "veth2".to_string(),
            address: Ipv4Addr::new(192, 168, 1, 2),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
        }
    }
}

impl NetworkParams {
    /// Check both interface names before any kernel state is touched
    pub fn validate(&self) -> std::result::Result<(), SetupError> {
        validate_ifname(&self.local_name)?;
        validate_ifname(&self.peer_name)?;
        if self.local_name == self.peer_name {
            return Err(SetupError::InvalidName {
                name: self.peer_name.clone(),
                reason: "peer name must differ from local name",
            });
        }
        Ok(())
    }

    /// Address in `a.b.c.d/len` form as `ip addr` expects it
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.address, PREFIX_LEN)
    }
}

/// Reject names the kernel would refuse for a network interface
pub fn validate_ifname(name: &str) -> std::result::Result<(), SetupError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > MAX_IFNAME_LEN {
        Some("name is longer than 15 bytes")
    } else if name == "." || name == ".." {
        Some("name is reserved")
    } else if name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace()) {
        Some("name contains '/', ':' or whitespace")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SetupError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Where the memory control group lives
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupSettings {
    /// Mounted control-group hierarchy (v1 memory controller or v2 unified root)
    pub root: PathBuf,
    /// Directory created under `root` for this container
    pub name: String,
}

impl CgroupSettings {
    /// Full path of the container's control-group directory
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    /// The group must be a single directory directly under `root`
    pub fn validate(&self) -> std::result::Result<(), SetupError> {
        validate_cgroup_name(&self.name)
    }
}

/// Reject group names that would resolve to `root` itself, its parent or a nested path
pub fn validate_cgroup_name(name: &str) -> std::result::Result<(), SetupError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == "." || name == ".." {
        Some("name is reserved")
    } else if name.contains('/') || name.contains('\0') {
        Some("name contains '/' or a NUL byte")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SetupError::InvalidCgroupName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Everything the bootstrap process needs, built once by the launcher
///
/// The request crosses the process boundary only through the argument
/// vector, see [`IsolationRequest::to_child_args`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsolationRequest {
    /// Program executed inside the container
    pub command: String,
    /// Arguments passed to `command`
    pub args: Vec<String>,
    /// Host directory that becomes `/`
    pub rootfs: PathBuf,
    /// Memory ceiling in bytes
    pub memory_limit: u64,
    /// Control-group location
    pub cgroup: CgroupSettings,
    /// Hostname set inside the new UTS namespace
    pub hostname: Option<String>,
    /// Static network configuration
    pub network: NetworkParams,
}

impl IsolationRequest {
    /// Encode the request as the argument vector of the hidden `child` command
    ///
    /// The first element is the `child` tag. The target command follows a
    /// `--` separator so its own flags are never read as ours.
    pub fn to_child_args(&self) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![
            "child".into(),
            "--rootfs".into(),
            self.rootfs.clone().into_os_string(),
            "--memory".into(),
            self.memory_limit.to_string().into(),
            "--cgroup-root".into(),
            self.cgroup.root.clone().into_os_string(),
            "--cgroup-name".into(),
            self.cgroup.name.clone().into(),
        ];

        if let Some(ref hostname) = self.hostname {
            argv.push("--hostname".into());
            argv.push(hostname.into());
        }

        let tail: [OsString; 10] = [
            "--veth-local".into(),
            self.network.local_name.clone().into(),
            "--veth-peer".into(),
            self.network.peer_name.clone().into(),
            "--address".into(),
            self.network.address.to_string().into(),
            "--gateway".into(),
            self.network.gateway.to_string().into(),
            "--".into(),
            self.command.clone().into(),
        ];
        argv.extend(tail);
        argv.extend(self.args.iter().map(OsString::from));
        argv
    }
}

/// How the bootstrap process ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with the given code
    Exited(i32),
    /// Killed by the given signal number
    Signaled(i32),
}

impl ExitStatus {
    /// Shell-style exit code: the code itself, or 128 + signal number
    pub fn code(&self) -> i32 {
        match *self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled(signal) => 128 + signal,
        }
    }

    pub fn success(&self) -> bool {
        *self == ExitStatus::Exited(0)
    }
}

/// Network, memory-limit or hostname setup failure. Logged, never fatal.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("invalid interface name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("interface {0} already exists")]
    NameCollision(String),

    #[error("network namespace error: {0}")]
    Namespace(String),

    #[error("`ip {command}` failed: {detail}")]
    Command { command: String, detail: String },

    #[error("failed to restore the caller's network namespace: {0}")]
    Restore(String),

    #[error("invalid cgroup name {name:?}: {reason}")]
    InvalidCgroupName { name: String, reason: &'static str },

    #[error("cgroup error at {}: {source}", .path.display())]
    Cgroup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to set hostname: {0}")]
    Hostname(String),
}

/// Root change or /proc mount failure. Fatal for the bootstrap process.
#[derive(Error, Debug)]
pub enum IsolationError {
    #[error("root filesystem {} does not exist or is not a directory", .0.display())]
    RootNotFound(PathBuf),

    #[error("failed to make mounts private: {0}")]
    MountPrivate(#[source] nix::Error),

    #[error("chroot to {} failed: {source}", .path.display())]
    Chroot {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("chdir to / failed: {0}")]
    Chdir(#[source] nix::Error),

    #[error("failed to create /proc inside the new root: {0}")]
    ProcDir(#[source] io::Error),

    #[error("mounting /proc failed: {0}")]
    MountProc(#[source] nix::Error),
}

/// Target command could not replace the bootstrap process
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("argument {0:?} contains an interior NUL byte")]
    InvalidArgument(String),

    #[error("command not found: {0}")]
    NotFound(String),

    #[error("failed to execute {command}: {source}")]
    Failed {
        command: String,
        #[source]
        source: nix::Error,
    },
}

impl ExecError {
    /// 127 for a missing command, 126 for anything else, as shells do
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecError::NotFound(_) => 127,
            _ => 126,
        }
    }
}

/// Fatal outcome of the bootstrap sequence
#[derive(Error, Debug)]
pub enum BootError {
    #[error(transparent)]
    Isolation(#[from] IsolationError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl BootError {
    /// Exit code the bootstrap process terminates with
    pub fn exit_code(&self) -> i32 {
        match self {
            BootError::Isolation(_) => 125,
            BootError::Exec(e) => e.exit_code(),
        }
    }
}

/// Launcher could not start or wait for the bootstrap process
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("argument {0:?} contains an interior NUL byte")]
    InvalidArgument(String),

    #[error("failed to spawn bootstrap process: {0}")]
    Spawn(#[source] nix::Error),

    #[error("failed to wait for bootstrap process: {0}")]
    Wait(#[source] nix::Error),

    #[error("log file {}: {source}", .path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Crate-level error type
#[derive(Error, Debug)]
pub enum NsboxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Signal error: {0}")]
    Signal(String),
}

/// Result type alias for nsbox operations
pub type Result<T> = std::result::Result<T, NsboxError>;
