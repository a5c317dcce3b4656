/// Launcher: re-executes this binary as the `child` command inside fresh namespaces
use crate::cgroup;
use crate::logs;
use crate::namespace::NamespaceSet;
use crate::types::{ExitStatus, IsolationRequest, LaunchError};
use nix::errno::Errno;
use nix::sched::clone;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, execv, Pid};
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStringExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

const SELF_EXE: &str = "/proc/self/exe";
const CHILD_ARGV0: &str = "nsbox";
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Exit code of the cloned process when it cannot re-exec itself
const REEXEC_FAILED: isize = 126;

/// Spawn the bootstrap process, wait for it and clean up its control group
///
/// The control-group directory is removed whatever the outcome; a removal
/// failure is logged and does not change the result. A request whose group
/// name does not denote a single directory under the cgroup root is refused
/// before anything is spawned or removed.
pub fn launch(request: &IsolationRequest) -> Result<ExitStatus, LaunchError> {
    launch_with_log(request, None)
}

/// [`launch`], with the container's stdout and stderr appended to `log_file`
pub fn launch_with_log(
    request: &IsolationRequest,
    log_file: Option<&Path>,
) -> Result<ExitStatus, LaunchError> {
    request
        .cgroup
        .validate()
        .map_err(|e| LaunchError::InvalidArgument(e.to_string()))?;

    let result = spawn_and_wait(request, log_file);

    let group = request.cgroup.path();
    if let Err(e) = cgroup::remove_cgroup(&group) {
        log::warn!("failed to remove cgroup {}: {}", group.display(), e);
    }

    result
}

fn spawn_and_wait(request: &IsolationRequest, log_file: Option<&Path>) -> Result<ExitStatus, LaunchError> {
    let exe = to_cstring(SELF_EXE.into())?;
    let argv = child_argv(request)?;
    let log = log_file.map(logs::open_log).transpose()?;
    let log_fd = log.as_ref().map(|f| f.as_raw_fd());

    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let callback = Box::new(|| {
        if let Some(fd) = log_fd {
            if dup2(fd, libc::STDOUT_FILENO).is_err() || dup2(fd, libc::STDERR_FILENO).is_err() {
                return REEXEC_FAILED;
            }
        }
        match execv(&exe, &argv) {
            Ok(never) => match never {},
            Err(_) => REEXEC_FAILED,
        }
    });

    // SAFETY: the child gets its own copy of the address space (no CLONE_VM)
    // and only calls dup2 and execv before leaving the callback.
    let pid = unsafe {
        clone(
            callback,
            &mut stack,
            NamespaceSet.clone_flags(),
            Some(libc::SIGCHLD),
        )
    }
    .map_err(LaunchError::Spawn)?;

    log::debug!("bootstrap process started as pid {}", pid);
    wait_for(pid)
}

/// Full argument vector of the re-executed process, `argv[0]` included
pub fn child_argv(request: &IsolationRequest) -> Result<Vec<CString>, LaunchError> {
    std::iter::once(OsString::from(CHILD_ARGV0))
        .chain(request.to_child_args())
        .map(to_cstring)
        .collect()
}

fn to_cstring(arg: OsString) -> Result<CString, LaunchError> {
    CString::new(arg.into_vec())
        .map_err(|e| LaunchError::InvalidArgument(String::from_utf8_lossy(&e.into_vec()).into_owned()))
}

fn wait_for(pid: Pid) -> Result<ExitStatus, LaunchError> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(ExitStatus::Signaled(signal as i32)),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(e) => return Err(LaunchError::Wait(e)),
        }
    }
}
