/// Container defaults and JSON configuration file loading
use crate::types::{validate_cgroup_name, CgroupSettings, IsolationRequest, NetworkParams, NsboxError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default memory ceiling in bytes
pub const DEFAULT_MEMORY_LIMIT: u64 = 999_424;

/// Default control-group directory name
pub const DEFAULT_CGROUP_NAME: &str = "nsbox";

/// Default root filesystem location
pub const DEFAULT_ROOTFS: &str = "/var/lib/nsbox/rootfs";

const CGROUP_MOUNT: &str = "/sys/fs/cgroup";

/// Settings a `run` invocation starts from before CLI overrides
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Directory that becomes the container's `/`
    pub rootfs: PathBuf,
    /// Memory ceiling in bytes
    pub memory_limit: u64,
    /// Mounted control-group hierarchy
    pub cgroup_root: PathBuf,
    /// Control-group directory name under `cgroup_root`
    pub cgroup_name: String,
    /// Hostname inside the UTS namespace
    pub hostname: Option<String>,
    /// Static network configuration
    pub network: NetworkParams,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            rootfs: PathBuf::from(DEFAULT_ROOTFS),
            memory_limit: DEFAULT_MEMORY_LIMIT,
            cgroup_root: default_cgroup_root(),
            cgroup_name: DEFAULT_CGROUP_NAME.to_string(),
            hostname: None,
            network: NetworkParams::default(),
        }
    }
}

impl ContainerConfig {
    /// Load a configuration file; missing keys fall back to the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            NsboxError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
            .map_err(|e| NsboxError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse a configuration from JSON text
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| NsboxError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the names that end up as kernel objects or paths
    pub fn validate(&self) -> Result<()> {
        validate_cgroup_name(&self.cgroup_name)
            .and_then(|()| self.network.validate())
            .map_err(|e| NsboxError::Config(e.to_string()))
    }

    /// Build the immutable request for one container lifecycle
    pub fn into_request(self, command: String, args: Vec<String>) -> IsolationRequest {
        IsolationRequest {
            command,
            args,
            rootfs: self.rootfs,
            memory_limit: self.memory_limit,
            cgroup: CgroupSettings {
                root: self.cgroup_root,
                name: self.cgroup_name,
            },
            hostname: self.hostname,
            network: self.network,
        }
    }
}

/// Unified root on cgroup v2 hosts, the v1 memory controller otherwise
pub fn default_cgroup_root() -> PathBuf {
    let mount = Path::new(CGROUP_MOUNT);
    if mount.join("cgroup.controllers").exists() {
        mount.to_path_buf()
    } else {
        mount.join("memory")
    }
}
