/// Host prerequisite checks behind the `check` command
use crate::cgroup::{self, CgroupVersion};
use crate::config::ContainerConfig;
use crate::namespace::{self, NamespaceInfo};
use crate::network;
use std::fmt;

/// Outcome of one prerequisite check
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl Check {
    fn new(name: &'static str, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok,
            detail: detail.into(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PreflightReport {
    pub checks: Vec<Check>,
    /// Namespaces of the checking process, i.e. what a container is isolated from
    pub namespaces: Option<NamespaceInfo>,
}

impl PreflightReport {
    /// True when every check passed
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.ok)
    }
}

impl fmt::Display for PreflightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let mark = if check.ok { "ok" } else { "FAIL" };
            writeln!(f, "[{:>4}] {:<12} {}", mark, check.name, check.detail)?;
        }
        if let Some(ref info) = self.namespaces {
            writeln!(f, "host {}", info)?;
        }
        Ok(())
    }
}

/// Check everything a `run` with this configuration relies on
pub fn preflight(config: &ContainerConfig) -> PreflightReport {
    let mut checks = Vec::new();

    let root = nix::unistd::Uid::effective().is_root();
    checks.push(Check::new(
        "privileges",
        root,
        if root { "running as root" } else { "root privileges required" },
    ));

    let ns = namespace::is_supported();
    checks.push(Check::new(
        "namespaces",
        ns,
        if ns { "/proc/self/ns present" } else { "/proc/self/ns not readable" },
    ));
    let namespaces = if ns {
        NamespaceInfo::current()
            .map_err(|e| log::warn!("{}", e))
            .ok()
    } else {
        None
    };

    let cgroup_ok = cgroup::cgroups_available(&config.cgroup_root);
    let cgroup_detail = if cgroup_ok {
        let version = match CgroupVersion::detect(&config.cgroup_root) {
            CgroupVersion::V1 => "v1",
            CgroupVersion::V2 => "v2",
        };
        format!("{} ({})", config.cgroup_root.display(), version)
    } else {
        format!("{} not available", config.cgroup_root.display())
    };
    checks.push(Check::new("cgroup", cgroup_ok, cgroup_detail));

    let rootfs_ok = config.rootfs.is_dir();
    checks.push(Check::new(
        "rootfs",
        rootfs_ok,
        if rootfs_ok {
            config.rootfs.display().to_string()
        } else {
            format!("{} is not a directory", config.rootfs.display())
        },
    ));

    let ip_ok = network::ip_available();
    checks.push(Check::new(
        "ip",
        ip_ok,
        if ip_ok { "iproute2 found" } else { "`ip` not found in PATH" },
    ));

    PreflightReport { checks, namespaces }
}
