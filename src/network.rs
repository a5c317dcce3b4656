/// Network namespace configurator: an anonymous namespace joined to the caller's by a veth pair
///
/// Links, addresses and routes are managed through the `ip` tool. Each `ip`
/// child inherits the calling thread's network namespace, which is what
/// scopes every command to the namespace currently entered.
use crate::types::{NetworkParams, SetupError, PREFIX_LEN};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sched::{unshare, CloneFlags};
use std::fs::File;
use std::io;
use std::net::Ipv4Addr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::Command;

const IP_BIN: &str = "ip";
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Descriptor number under which `ip` children see the caller's namespace
const CALLER_NS_FD: RawFd = 3;

/// The calling thread's network namespace, switched out for a fresh anonymous one
///
/// [`NetnsScope::exit`] switches back and must be called on every path.
/// Dropping an unexited scope also switches back so an unwinding panic
/// cannot leave the thread in the wrong namespace.
pub struct NetnsScope {
    original: File,
    restored: bool,
}

impl NetnsScope {
    /// Remember the current namespace, then move the calling thread into a new one
    pub fn enter() -> Result<Self, SetupError> {
        let original = File::open(THREAD_NETNS).map_err(|e| {
            SetupError::Namespace(format!("failed to open {}: {}", THREAD_NETNS, e))
        })?;

        unshare(CloneFlags::CLONE_NEWNET).map_err(|e| {
            SetupError::Namespace(format!("failed to create network namespace: {}", e))
        })?;

        log::debug!("entered anonymous network namespace");
        Ok(Self {
            original,
            restored: false,
        })
    }

    /// Descriptor of the namespace the thread was in before [`NetnsScope::enter`]
    pub fn original_fd(&self) -> RawFd {
        self.original.as_raw_fd()
    }

    /// Switch the calling thread back to its original namespace
    pub fn exit(mut self) -> Result<(), SetupError> {
        let result = self.restore();
        self.restored = true;
        result
    }

    fn restore(&mut self) -> Result<(), SetupError> {
        if self.restored {
            return Ok(());
        }
        // SAFETY: `self.original` owns the descriptor and keeps it open for the call.
        let rc = unsafe { libc::setns(self.original.as_raw_fd(), libc::CLONE_NEWNET) };
        Errno::result(rc).map_err(|e| SetupError::Restore(e.to_string()))?;
        self.restored = true;
        log::debug!("restored original network namespace");
        Ok(())
    }
}

impl Drop for NetnsScope {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            log::error!("{}", e);
        }
    }
}

/// A configured veth pair and a reference holding its namespace alive
///
/// The anonymous namespace only exists while something references it.
/// Dropping the handle (or exec'ing without
/// [`NetworkHandle::keep_across_exec`]) tears the namespace down together
/// with both veth ends.
#[derive(Debug)]
pub struct NetworkHandle {
    namespace: File,
    local_name: String,
    peer_name: String,
    address: Ipv4Addr,
    gateway: Ipv4Addr,
}

impl NetworkHandle {
    /// Let the namespace reference survive exec so the link lives as long as the container
    ///
    /// The target command inherits the descriptor as an unnamed open fd
    /// referring to the anonymous namespace. A process holding it can
    /// `setns` into that namespace; nothing closes it for the command.
    pub fn keep_across_exec(&self) -> Result<(), SetupError> {
        fcntl(self.namespace.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))
            .map(drop)
            .map_err(|e| SetupError::Namespace(format!("failed to clear close-on-exec: {}", e)))
    }
}

/// Create an anonymous network namespace wired to the caller's with a veth pair
///
/// The local end stays in the new namespace with the static /24 address and
/// a default route via the gateway. The peer end is moved into the
/// namespace the caller was in. The calling thread is back in its original
/// namespace when this returns, whatever the outcome.
pub fn configure_network(params: &NetworkParams) -> Result<NetworkHandle, SetupError> {
    params.validate()?;

    if link_exists(&params.peer_name) {
        return Err(SetupError::NameCollision(params.peer_name.clone()));
    }

    let scope = NetnsScope::enter()?;
    let configured = configure_in_scope(&scope, params);
    let restored = scope.exit();

    match (configured, restored) {
        (Ok(handle), Ok(())) => {
            log::info!(
                "network configured: {} ({}/{}) <-> {}, gateway {}",
                handle.local_name,
                handle.address,
                PREFIX_LEN,
                handle.peer_name,
                handle.gateway
            );
            Ok(handle)
        }
        (Err(e), Ok(())) => Err(e),
        (configured, Err(restore_error)) => {
            if let Err(e) = configured {
                log::warn!("network configuration failed before restore: {}", e);
            }
            Err(restore_error)
        }
    }
}

fn configure_in_scope(scope: &NetnsScope, params: &NetworkParams) -> Result<NetworkHandle, SetupError> {
    let namespace = File::open(THREAD_NETNS).map_err(|e| {
        SetupError::Namespace(format!("failed to open {}: {}", THREAD_NETNS, e))
    })?;

    let local = params.local_name.as_str();
    let peer = params.peer_name.as_str();

    ip(&["link", "add", local, "type", "veth", "peer", "name", peer], Some(local))?;
    move_to_caller_namespace(scope, peer)?;
    ip(&["link", "set", local, "up"], None)?;
    ip(&["addr", "add", &params.cidr(), "dev", local], None)?;
    ip(
        &["route", "add", "default", "via", &params.gateway.to_string(), "dev", local],
        None,
    )?;

    Ok(NetworkHandle {
        namespace,
        local_name: params.local_name.clone(),
        peer_name: params.peer_name.clone(),
        address: params.address,
        gateway: params.gateway,
    })
}

/// `ip link set <peer> netns /proc/self/fd/3`, with fd 3 being the caller's namespace
fn move_to_caller_namespace(scope: &NetnsScope, peer: &str) -> Result<(), SetupError> {
    let ns_path = format!("/proc/self/fd/{}", CALLER_NS_FD);
    let args = ["link", "set", peer, "netns", ns_path.as_str()];

    let fd = scope.original_fd();
    let mut cmd = Command::new(IP_BIN);
    cmd.args(args);
    // SAFETY: only async-signal-safe calls between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            if fd == CALLER_NS_FD {
                let flags = libc::fcntl(fd, libc::F_GETFD);
                if flags == -1 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1 {
                    return Err(io::Error::last_os_error());
                }
            } else if libc::dup2(fd, CALLER_NS_FD) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    run_ip(cmd, &args, Some(peer))
}

fn ip(args: &[&str], collision_name: Option<&str>) -> Result<(), SetupError> {
    let mut cmd = Command::new(IP_BIN);
    cmd.args(args);
    run_ip(cmd, args, collision_name)
}

/// Run an `ip` command; "File exists" is reported as a collision on `collision_name`
fn run_ip(mut cmd: Command, args: &[&str], collision_name: Option<&str>) -> Result<(), SetupError> {
    let command = args.join(" ");
    let output = cmd.output().map_err(|e| SetupError::Command {
        command: command.clone(),
        detail: e.to_string(),
    })?;

    if output.status.success() {
        log::debug!("ip {}", command);
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if let Some(name) = collision_name {
        if stderr.contains("File exists") {
            return Err(SetupError::NameCollision(name.to_string()));
        }
    }
    Err(SetupError::Command {
        command,
        detail: if stderr.is_empty() {
            output.status.to_string()
        } else {
            stderr
        },
    })
}

/// Whether an interface with this name exists in the calling thread's namespace
pub fn link_exists(name: &str) -> bool {
    Command::new(IP_BIN)
        .args(["link", "show", "dev", name])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Whether the `ip` tool can be run at all
pub fn ip_available() -> bool {
    Command::new(IP_BIN)
        .arg("-V")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
