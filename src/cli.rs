/// Command line interface for nsbox
use crate::config::ContainerConfig;
use crate::types::{validate_cgroup_name, CgroupSettings, IsolationRequest, NetworkParams, NsboxError, Result};
use clap::{Args, Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nsbox")]
#[command(author, version, about = "Run a command in fresh namespaces with a memory cgroup, a chroot and a veth pair", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command in a new container
    Run(RunArgs),

    /// Bootstrap the container from inside its namespaces
    #[command(hide = true)]
    Child(ChildArgs),

    /// Check host prerequisites
    Check {
        /// Root filesystem to check
        #[arg(long, env = "NSBOX_ROOTFS")]
        rootfs: Option<PathBuf>,

        /// Control-group hierarchy to check
        #[arg(long, env = "NSBOX_CGROUP_ROOT")]
        cgroup_root: Option<PathBuf>,

        /// JSON configuration file
        #[arg(short, long, env = "NSBOX_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Notify a container process that a client attached (SIGUSR1)
    Attach {
        /// Process ID of the container process
        pid: i32,
    },

    /// Notify a container process that its client detached (SIGUSR2)
    Detach {
        /// Process ID of the container process
        pid: i32,
    },

    /// Remove a log file written by `run --log-file`
    DetachLogs {
        /// Log file to remove
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON configuration file; flags override its values
    #[arg(short, long, env = "NSBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory that becomes the container's root
    #[arg(long, env = "NSBOX_ROOTFS")]
    pub rootfs: Option<PathBuf>,

    /// Memory limit in bytes
    #[arg(long, env = "NSBOX_MEMORY")]
    pub memory: Option<u64>,

    /// Mounted control-group hierarchy
    #[arg(long, env = "NSBOX_CGROUP_ROOT")]
    pub cgroup_root: Option<PathBuf>,

    /// Control-group directory name
    #[arg(long, env = "NSBOX_CGROUP_NAME")]
    pub cgroup_name: Option<String>,

    /// Hostname inside the container
    #[arg(long, env = "NSBOX_HOSTNAME")]
    pub hostname: Option<String>,

    /// veth end kept in the container network namespace
    #[arg(long, env = "NSBOX_VETH_LOCAL")]
    pub veth_local: Option<String>,

    /// veth end moved to the peer namespace
    #[arg(long, env = "NSBOX_VETH_PEER")]
    pub veth_peer: Option<String>,

    /// IPv4 address of the local end (/24)
    #[arg(long, env = "NSBOX_ADDRESS")]
    pub address: Option<Ipv4Addr>,

    /// Default gateway
    #[arg(long, env = "NSBOX_GATEWAY")]
    pub gateway: Option<Ipv4Addr>,

    /// Append the container's stdout and stderr to this file
    #[arg(long, env = "NSBOX_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Program to run and its arguments; nothing after the program is read as an nsbox option
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Merge flags over the configuration file (or the defaults) into a request
    pub fn into_request(self) -> Result<IsolationRequest> {
        let mut command_line = self.command.into_iter();
        let command = command_line
            .next()
            .ok_or_else(|| NsboxError::Config("no command given".to_string()))?;
        let args = command_line.collect();

        let mut config = match self.config {
            Some(ref path) => ContainerConfig::load(path)?,
            None => ContainerConfig::default(),
        };

        if let Some(rootfs) = self.rootfs {
            config.rootfs = rootfs;
        }
        if let Some(memory) = self.memory {
            config.memory_limit = memory;
        }
        if let Some(root) = self.cgroup_root {
            config.cgroup_root = root;
        }
        if let Some(name) = self.cgroup_name {
            config.cgroup_name = name;
        }
        if self.hostname.is_some() {
            config.hostname = self.hostname;
        }
        if let Some(local) = self.veth_local {
            config.network.local_name = local;
        }
        if let Some(peer) = self.veth_peer {
            config.network.peer_name = peer;
        }
        if let Some(address) = self.address {
            config.network.address = address;
        }
        if let Some(gateway) = self.gateway {
            config.network.gateway = gateway;
        }

        config.validate()?;
        Ok(config.into_request(command, args))
    }
}

/// Arguments of the re-executed bootstrap process; every value is explicit
#[derive(Args, Debug)]
pub struct ChildArgs {
    #[arg(long)]
    pub rootfs: PathBuf,

    #[arg(long)]
    pub memory: u64,

    #[arg(long)]
    pub cgroup_root: PathBuf,

    #[arg(long, value_parser = parse_cgroup_name)]
    pub cgroup_name: String,

    #[arg(long)]
    pub hostname: Option<String>,

    #[arg(long)]
    pub veth_local: String,

    #[arg(long)]
    pub veth_peer: String,

    #[arg(long)]
    pub address: Ipv4Addr,

    #[arg(long)]
    pub gateway: Ipv4Addr,

    pub command: String,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

fn parse_cgroup_name(name: &str) -> std::result::Result<String, String> {
    validate_cgroup_name(name)
        .map(|()| name.to_string())
        .map_err(|e| e.to_string())
}

impl ChildArgs {
    pub fn into_request(self) -> IsolationRequest {
        IsolationRequest {
            command: self.command,
            args: self.args,
            rootfs: self.rootfs,
            memory_limit: self.memory,
            cgroup: CgroupSettings {
                root: self.cgroup_root,
                name: self.cgroup_name,
            },
            hostname: self.hostname,
            network: NetworkParams {
                local_name: self.veth_local,
                peer_name: self.veth_peer,
                address: self.address,
                gateway: self.gateway,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn parse<I, T>(args: I) -> Cli
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Cli::try_parse_from(std::iter::once(OsString::from("nsbox")).chain(args.into_iter().map(Into::into)))
            .unwrap()
    }

    #[test]
    fn test_child_args_round_trip() {
        let request = IsolationRequest {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "echo --rootfs".to_string()],
            rootfs: PathBuf::from("/srv/alpine"),
            memory_limit: 1 << 20,
            cgroup: CgroupSettings {
                root: PathBuf::from("/sys/fs/cgroup"),
                name: "box0".to_string(),
            },
            hostname: Some("box".to_string()),
            network: NetworkParams {
                local_name: "vlocal".to_string(),
                peer_name: "vpeer".to_string(),
                address: Ipv4Addr::new(10, 0, 0, 2),
                gateway: Ipv4Addr::new(10, 0, 0, 1),
            },
        };

        match parse(request.to_child_args()).command {
            Commands::Child(args) => assert_eq!(args.into_request(), request),
            other => panic!("expected child command, got {:?}", other),
        }
    }

    #[test]
    fn test_run_flags_override_defaults() {
        let cli = parse([
            "run",
            "--rootfs",
            "/srv/rootfs",
            "--memory",
            "2048",
            "--veth-peer",
            "vpeer0",
            "/bin/echo",
            "-n",
            "hello",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let request = args.into_request().unwrap();

        assert_eq!(request.rootfs, PathBuf::from("/srv/rootfs"));
        assert_eq!(request.memory_limit, 2048);
        assert_eq!(request.network.peer_name, "vpeer0");
        assert_eq!(request.network.local_name, "veth1");
        assert_eq!(request.command, "/bin/echo");
        assert_eq!(request.args, ["-n", "hello"]);
    }

    #[test]
    fn test_target_flags_stay_with_the_command() {
        let cli = parse(["run", "/bin/sh", "-c", "x", "--memory", "5"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.command, ["/bin/sh", "-c", "x", "--memory", "5"]);
        assert_eq!(args.config, None);
        assert_eq!(args.memory, None);

        let request = args.into_request().unwrap();
        assert_eq!(request.command, "/bin/sh");
        assert_eq!(request.args, ["-c", "x", "--memory", "5"]);
        assert_eq!(request.memory_limit, crate::config::DEFAULT_MEMORY_LIMIT);
    }

    #[test]
    fn test_log_file_flag() {
        let cli = parse(["run", "--log-file", "/var/log/nsbox/box.log", "/bin/echo", "--log-file"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.log_file, Some(PathBuf::from("/var/log/nsbox/box.log")));
        assert_eq!(args.command, ["/bin/echo", "--log-file"]);
    }

    #[test]
    fn test_run_rejects_cgroup_name_outside_root() {
        for name in ["..", "a/b"] {
            let cli = parse(["run", "--cgroup-name", name, "/bin/true"]);
            let Commands::Run(args) = cli.command else {
                panic!("expected run command");
            };
            let err = args.into_request().unwrap_err();
            assert!(err.to_string().contains("invalid cgroup name"), "{}", err);
        }
    }

    #[test]
    fn test_child_rejects_cgroup_name_outside_root() {
        let mut request = ContainerConfig::default().into_request("/bin/true".to_string(), vec![]);
        request.cgroup.name = "..".to_string();

        let argv = std::iter::once(OsString::from("nsbox")).chain(request.to_child_args());
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_run_rejects_long_interface_name() {
        let cli = parse(["run", "--veth-local", "much-too-long-name", "/bin/true"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert!(matches!(args.into_request(), Err(NsboxError::Config(_))));
    }

    #[test]
    fn test_config_file_under_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nsbox.json");
        std::fs::write(&path, r#"{ "memory_limit": 8192, "cgroup_name": "fromfile" }"#).unwrap();

        let cli = parse([
            OsString::from("run"),
            OsString::from("--config"),
            path.into_os_string(),
            OsString::from("--cgroup-name"),
            OsString::from("fromflag"),
            OsString::from("/bin/true"),
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let request = args.into_request().unwrap();

        assert_eq!(request.memory_limit, 8192);
        assert_eq!(request.cgroup.name, "fromflag");
    }
}
