/// Container log capture: stdout and stderr appended to a host file
use crate::types::{LaunchError, NsboxError, Result};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Open (creating it and its directory if needed) a log file for appending
pub fn open_log(path: &Path) -> std::result::Result<File, LaunchError> {
    let log_error = |source| LaunchError::Log {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(log_error)?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o644)
        .open(path)
        .map_err(log_error)
}

/// Remove a log file written by a previous `run --log-file`
///
/// A file that is already gone is reported as an error, like any other
/// failed unlink.
pub fn detach_logs(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            NsboxError::Config(format!("no log file at {}", path.display()))
        }
        _ => NsboxError::Config(format!("failed to remove {}: {}", path.display(), e)),
    })?;
    log::info!("removed log file {}", path.display());
    Ok(())
}
