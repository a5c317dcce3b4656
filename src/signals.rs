/// Attach/detach notifications delivered to a running container process
use crate::types::{NsboxError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Tell the container process a client attached (`SIGUSR1`)
pub fn attach(pid: i32) -> Result<()> {
    send(pid, Signal::SIGUSR1)
}

/// Tell the container process its client detached (`SIGUSR2`)
pub fn detach(pid: i32) -> Result<()> {
    send(pid, Signal::SIGUSR2)
}

fn send(pid: i32, signal: Signal) -> Result<()> {
    // 0 and negative values would address process groups
    if pid <= 0 {
        return Err(NsboxError::Signal(format!("invalid pid {}", pid)));
    }

    kill(Pid::from_raw(pid), signal)
        .map_err(|e| NsboxError::Signal(format!("failed to send {} to {}: {}", signal, pid, e)))?;
    log::info!("sent {} to pid {}", signal, pid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    #[test]
    fn test_rejects_group_pids() {
        assert!(matches!(attach(0), Err(NsboxError::Signal(_))));
        assert!(matches!(detach(-1), Err(NsboxError::Signal(_))));
    }

    #[test]
    fn test_attach_delivers_sigusr1() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        attach(child.id() as i32).unwrap();

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGUSR1));
    }

    #[test]
    fn test_detach_delivers_sigusr2() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        detach(child.id() as i32).unwrap();

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGUSR2));
    }
}
