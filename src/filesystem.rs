/// Filesystem isolation: root change and a fresh /proc
///
/// This is a plain chroot. The old root stays reachable through any
/// descriptor opened before the change; pivot_root is not used. Inherited
/// descriptors also survive into the container's command. Once networking
/// is configured one is always there: the network namespace reference kept
/// open across exec (see `NetworkHandle::keep_across_exec`).
use crate::types::IsolationError;
use nix::mount::{mount, MsFlags};
use nix::unistd::{chdir, chroot};
use std::fs;
use std::path::Path;

/// Make `path` the process root and move the working directory to it
///
/// Mount propagation is switched to private first so that mounts made
/// under the new root never show up in the host's mount namespace.
pub fn change_root(path: &Path) -> Result<(), IsolationError> {
    if !path.is_dir() {
        return Err(IsolationError::RootNotFound(path.to_path_buf()));
    }

    make_mounts_private()?;

    chroot(path).map_err(|source| IsolationError::Chroot {
        path: path.to_path_buf(),
        source,
    })?;
    chdir("/").map_err(IsolationError::Chdir)?;

    log::debug!("root changed to {}", path.display());
    Ok(())
}

/// Mount a new procfs at /proc; must only run after [`change_root`]
///
/// Before the root change this would cover the host's /proc instead.
pub fn mount_proc() -> Result<(), IsolationError> {
    fs::create_dir_all("/proc").map_err(IsolationError::ProcDir)?;

    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(IsolationError::MountProc)?;

    log::debug!("mounted fresh procfs at /proc");
    Ok(())
}

fn make_mounts_private() -> Result<(), IsolationError> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(IsolationError::MountPrivate)
}
