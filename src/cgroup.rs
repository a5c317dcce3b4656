/// Memory limiting through a control-group directory
///
/// Works against a cgroup v1 memory controller hierarchy (the classic
/// `/sys/fs/cgroup/memory`) or a cgroup v2 unified hierarchy.
use crate::types::{CgroupSettings, SetupError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Control files nsbox writes into a group
const WRITTEN_FILES: [&str; 4] = [
    "memory.limit_in_bytes",
    "memory.max",
    "notify_on_release",
    "cgroup.procs",
];

const REMOVE_ATTEMPTS: u32 = 50;
const REMOVE_BACKOFF: Duration = Duration::from_millis(20);

/// Which control-group interface a hierarchy exposes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

impl CgroupVersion {
    /// A v2 root carries `cgroup.controllers`; anything else is treated as v1
    pub fn detect(root: &Path) -> Self {
        if root.join("cgroup.controllers").exists() {
            CgroupVersion::V2
        } else {
            CgroupVersion::V1
        }
    }

    /// Control file holding the memory ceiling
    pub fn limit_file(self) -> &'static str {
        match self {
            CgroupVersion::V1 => "memory.limit_in_bytes",
            CgroupVersion::V2 => "memory.max",
        }
    }
}

/// A control-group directory with a memory limit and its attached processes
#[derive(Debug)]
pub struct CgroupHandle {
    path: PathBuf,
    version: CgroupVersion,
    limit_bytes: u64,
    pids: Vec<u32>,
}

impl CgroupHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> CgroupVersion {
        self.version
    }

    /// The limit that was written, before any kernel rounding
    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    /// Processes attached through this handle
    pub fn pids(&self) -> &[u32] {
        &self.pids
    }

    /// Read the memory ceiling back from the control file
    ///
    /// The kernel rounds v1 limits down to a page multiple. A v2 `max`
    /// reads back as `u64::MAX`.
    pub fn memory_limit(&self) -> Result<u64, SetupError> {
        let content = self.read_cgroup_file(self.version.limit_file())?;
        let value = content.trim();
        if value == "max" {
            return Ok(u64::MAX);
        }
        value.parse().map_err(|e| SetupError::Cgroup {
            path: self.path.join(self.version.limit_file()),
            source: io::Error::new(io::ErrorKind::InvalidData, format!("{}: {:?}", e, value)),
        })
    }

    /// Attach a process; its descendants inherit the membership
    pub fn add_process(&mut self, pid: u32) -> Result<(), SetupError> {
        self.write_cgroup_file("cgroup.procs", &pid.to_string())?;
        self.pids.push(pid);
        log::debug!("attached pid {} to {}", pid, self.path.display());
        Ok(())
    }

    fn write_cgroup_file(&self, filename: &str, content: &str) -> Result<(), SetupError> {
        let file_path = self.path.join(filename);
        fs::write(&file_path, content).map_err(|source| SetupError::Cgroup {
            path: file_path,
            source,
        })
    }

    fn read_cgroup_file(&self, filename: &str) -> Result<String, SetupError> {
        let file_path = self.path.join(filename);
        fs::read_to_string(&file_path).map_err(|source| SetupError::Cgroup {
            path: file_path,
            source,
        })
    }
}

/// Create the control group, write the memory ceiling and attach the calling process
///
/// The calling process is attached last, after the limit is in place, so
/// everything it runs from then on (including an exec'd command) is bound.
pub fn limit_memory(settings: &CgroupSettings, bytes: u64) -> Result<CgroupHandle, SetupError> {
    settings.validate()?;
    let version = CgroupVersion::detect(&settings.root);
    let path = settings.path();

    if version == CgroupVersion::V2 {
        enable_memory_controller(&settings.root);
    }

    fs::create_dir_all(&path).map_err(|source| SetupError::Cgroup {
        path: path.clone(),
        source,
    })?;

    let mut handle = CgroupHandle {
        path,
        version,
        limit_bytes: bytes,
        pids: Vec::new(),
    };

    handle.write_cgroup_file(version.limit_file(), &bytes.to_string())?;
    if version == CgroupVersion::V1 {
        handle.write_cgroup_file("notify_on_release", "1")?;
    }
    handle.add_process(std::process::id())?;

    log::debug!(
        "memory limit of {} bytes applied via {} ({:?})",
        bytes,
        handle.path.display(),
        version
    );
    Ok(handle)
}

/// Children of a v2 group only get `memory.max` once the parent delegates the controller
fn enable_memory_controller(root: &Path) {
    let control = root.join("cgroup.subtree_control");
    let enabled = fs::read_to_string(&control)
        .map(|c| c.split_whitespace().any(|ctl| ctl == "memory"))
        .unwrap_or(false);
    if !enabled {
        if let Err(e) = fs::write(&control, "+memory") {
            log::debug!("could not enable memory controller in {}: {}", control.display(), e);
        }
    }
}

/// Remove a control-group directory, ignoring one that is already gone
///
/// Only the group directory itself is removed, never anything recursively.
/// Tasks of the container may still be leaving the group right after PID 1
/// is reaped, so an `EBUSY` rmdir is retried for about a second. Outside
/// cgroupfs (a plain directory standing in for a hierarchy) the control
/// files nsbox wrote are deleted first; any other content keeps the
/// directory in place.
pub fn remove_cgroup(path: &Path) -> io::Result<()> {
    if path.is_dir() && !is_cgroupfs(path) {
        for name in WRITTEN_FILES {
            match fs::remove_file(path.join(name)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
    }

    retry_busy(REMOVE_ATTEMPTS, REMOVE_BACKOFF, || match fs::remove_dir(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    })
}

/// Run `op` until it stops failing with `EBUSY`, at most `attempts` times
fn retry_busy<F>(attempts: u32, backoff: Duration, mut op: F) -> io::Result<()>
where
    F: FnMut() -> io::Result<()>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) && attempt < attempts => {
                log::debug!("cgroup busy (attempt {}), retrying", attempt);
                attempt += 1;
                thread::sleep(backoff);
            }
            result => return result,
        }
    }
}

fn is_cgroupfs(path: &Path) -> bool {
    use nix::sys::statfs::{statfs, CGROUP2_SUPER_MAGIC, CGROUP_SUPER_MAGIC};

    match statfs(path) {
        Ok(stat) => {
            let fs_type = stat.filesystem_type();
            fs_type == CGROUP_SUPER_MAGIC || fs_type == CGROUP2_SUPER_MAGIC
        }
        Err(_) => false,
    }
}

/// Whether a control-group hierarchy is mounted at `root`
pub fn cgroups_available(root: &Path) -> bool {
    Path::new("/proc/cgroups").exists() && root.is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(root: &Path) -> CgroupSettings {
        CgroupSettings {
            root: root.to_path_buf(),
            name: "unit".to_string(),
        }
    }

    #[test]
    fn test_version_detection() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(CgroupVersion::detect(dir.path()), CgroupVersion::V1);

        fs::write(dir.path().join("cgroup.controllers"), "cpu memory").unwrap();
        assert_eq!(CgroupVersion::detect(dir.path()), CgroupVersion::V2);
    }

    #[test]
    fn test_v1_limit_and_membership() {
        let dir = tempfile::tempdir().unwrap();
        let handle = limit_memory(&settings(dir.path()), 999_424).unwrap();

        assert_eq!(handle.version(), CgroupVersion::V1);
        assert_eq!(handle.memory_limit().unwrap(), 999_424);
        assert_eq!(handle.pids(), &[std::process::id()]);

        let group = dir.path().join("unit");
        assert_eq!(fs::read_to_string(group.join("notify_on_release")).unwrap(), "1");
        assert_eq!(
            fs::read_to_string(group.join("cgroup.procs")).unwrap(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn test_v2_limit_skips_release_notification() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cgroup.controllers"), "memory pids").unwrap();
        fs::write(dir.path().join("cgroup.subtree_control"), "").unwrap();

        let handle = limit_memory(&settings(dir.path()), 1 << 20).unwrap();
        let group = dir.path().join("unit");

        assert_eq!(handle.version(), CgroupVersion::V2);
        assert_eq!(fs::read_to_string(group.join("memory.max")).unwrap(), "1048576");
        assert!(!group.join("notify_on_release").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("cgroup.subtree_control")).unwrap(),
            "+memory"
        );
    }

    #[test]
    fn test_v2_max_reads_as_unlimited() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cgroup.controllers"), "memory").unwrap();
        let handle = limit_memory(&settings(dir.path()), 4096).unwrap();

        fs::write(dir.path().join("unit").join("memory.max"), "max\n").unwrap();
        assert_eq!(handle.memory_limit().unwrap(), u64::MAX);
    }

    #[test]
    fn test_missing_root_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, "").unwrap();

        let err = limit_memory(&settings(&file), 4096).unwrap_err();
        assert!(matches!(err, SetupError::Cgroup { .. }));
    }

    #[test]
    fn test_remove_cgroup() {
        let dir = tempfile::tempdir().unwrap();
        limit_memory(&settings(dir.path()), 4096).unwrap();
        let group = dir.path().join("unit");
        assert!(group.exists());

        remove_cgroup(&group).unwrap();
        assert!(!group.exists());
        // Already gone
        remove_cgroup(&group).unwrap();
    }

    #[test]
    fn test_remove_never_deletes_foreign_content() {
        let dir = tempfile::tempdir().unwrap();
        limit_memory(&settings(dir.path()), 4096).unwrap();
        let group = dir.path().join("unit");
        fs::create_dir(group.join("data")).unwrap();
        fs::write(group.join("data").join("keep.txt"), "keep").unwrap();

        assert!(remove_cgroup(&group).is_err());
        assert!(group.join("data").join("keep.txt").exists());
        assert!(!group.join("memory.limit_in_bytes").exists());
    }

    #[test]
    fn test_invalid_group_name_is_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = settings(dir.path());
        bad.name = String::new();

        let err = limit_memory(&bad, 4096).unwrap_err();
        assert!(matches!(err, SetupError::InvalidCgroupName { .. }));
        assert!(!dir.path().join("memory.limit_in_bytes").exists());
        assert!(!dir.path().join("cgroup.procs").exists());
    }

    #[test]
    fn test_busy_removal_is_retried_then_succeeds() {
        let mut calls = 0;
        let result = retry_busy(5, Duration::from_millis(1), || {
            calls += 1;
            if calls < 3 {
                Err(io::Error::from_raw_os_error(libc::EBUSY))
            } else {
                Ok(())
            }
        });

        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_busy_retry_is_bounded_and_other_errors_are_not_retried() {
        let mut calls = 0;
        let result = retry_busy(4, Duration::from_millis(1), || {
            calls += 1;
            Err(io::Error::from_raw_os_error(libc::EBUSY))
        });
        assert_eq!(result.unwrap_err().raw_os_error(), Some(libc::EBUSY));
        assert_eq!(calls, 4);

        let mut calls = 0;
        let result = retry_busy(4, Duration::from_millis(1), || {
            calls += 1;
            Err(io::Error::from_raw_os_error(libc::EACCES))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
