/// Bootstrap sequence run as PID 1 of the new PID namespace
///
/// Setup steps (hostname, network, memory) are best-effort: their failures
/// are logged and kept in [`Diagnostics`]. The root change, the /proc
/// mount and the final exec are fatal.
use crate::cgroup;
use crate::filesystem;
use crate::namespace;
use crate::network::{self, NetworkHandle};
use crate::types::{BootError, CgroupSettings, ExecError, IsolationError, IsolationRequest, NetworkParams, SetupError};
use nix::errno::Errno;
use nix::unistd::execvp;
use std::convert::Infallible;
use std::ffi::CString;
use std::path::Path;

/// Where the bootstrap sequence currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootStage {
    Spawned,
    NetworkConfigured,
    MemoryLimited,
    RootChanged,
    ProcMounted,
    Executing,
    Aborted,
}

/// Kernel-facing operations the bootstrap sequence is built from
pub trait Host {
    fn set_hostname(&mut self, hostname: &str) -> Result<(), SetupError>;
    fn configure_network(&mut self, params: &NetworkParams) -> Result<(), SetupError>;
    fn limit_memory(&mut self, settings: &CgroupSettings, bytes: u64) -> Result<(), SetupError>;
    fn change_root(&mut self, path: &Path) -> Result<(), IsolationError>;
    fn mount_proc(&mut self) -> Result<(), IsolationError>;
    /// Replace the process image; only returns on failure
    fn exec(&mut self, command: &str, args: &[String]) -> Result<Infallible, ExecError>;
}

/// The real host
#[derive(Debug, Default)]
pub struct LinuxHost {
    /// Keeps the container's network namespace referenced until exec
    _network: Option<NetworkHandle>,
}

impl Host for LinuxHost {
    fn set_hostname(&mut self, hostname: &str) -> Result<(), SetupError> {
        namespace::set_hostname(hostname)
    }

    fn configure_network(&mut self, params: &NetworkParams) -> Result<(), SetupError> {
        let handle = network::configure_network(params)?;
        handle.keep_across_exec()?;
        self._network = Some(handle);
        Ok(())
    }

    fn limit_memory(&mut self, settings: &CgroupSettings, bytes: u64) -> Result<(), SetupError> {
        let group = cgroup::limit_memory(settings, bytes)?;
        match group.memory_limit() {
            Ok(effective) => log::debug!("memory ceiling {} bytes (requested {})", effective, group.limit_bytes()),
            Err(e) => log::debug!("could not read back memory ceiling: {}", e),
        }
        Ok(())
    }

    fn change_root(&mut self, path: &Path) -> Result<(), IsolationError> {
        filesystem::change_root(path)
    }

    fn mount_proc(&mut self) -> Result<(), IsolationError> {
        filesystem::mount_proc()
    }

    fn exec(&mut self, command: &str, args: &[String]) -> Result<Infallible, ExecError> {
        exec_command(command, args)
    }
}

/// `execvp` the command with stdio inherited; PATH is searched inside the current root
pub fn exec_command(command: &str, args: &[String]) -> Result<Infallible, ExecError> {
    let to_cstring = |s: &str| CString::new(s).map_err(|_| ExecError::InvalidArgument(s.to_string()));

    let program = to_cstring(command)?;
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(program.clone());
    for arg in args {
        argv.push(to_cstring(arg)?);
    }

    match execvp(&program, &argv) {
        Ok(never) => match never {},
        Err(Errno::ENOENT) => Err(ExecError::NotFound(command.to_string())),
        Err(source) => Err(ExecError::Failed {
            command: command.to_string(),
            source,
        }),
    }
}

/// Setup failures that were suppressed, in the order they happened
#[derive(Debug, Default)]
pub struct Diagnostics {
    suppressed: Vec<(&'static str, SetupError)>,
}

impl Diagnostics {
    pub fn record(&mut self, step: &'static str, error: SetupError) {
        log::warn!("{} setup failed, continuing: {}", step, error);
        self.suppressed.push((step, error));
    }

    pub fn suppressed(&self) -> &[(&'static str, SetupError)] {
        &self.suppressed
    }

    pub fn is_empty(&self) -> bool {
        self.suppressed.is_empty()
    }
}

/// Drives a [`Host`] through the bootstrap steps in their fixed order
pub struct Bootstrapper<H: Host> {
    host: H,
    stage: BootStage,
    history: Vec<BootStage>,
    diagnostics: Diagnostics,
}

impl<H: Host> Bootstrapper<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            stage: BootStage::Spawned,
            history: vec![BootStage::Spawned],
            diagnostics: Diagnostics::default(),
        }
    }

    /// Run every step; returns only if a fatal step failed
    pub fn run(&mut self, request: &IsolationRequest) -> Result<Infallible, BootError> {
        if let Some(ref hostname) = request.hostname {
            if let Err(e) = self.host.set_hostname(hostname) {
                self.diagnostics.record("hostname", e);
            }
        }

        match self.host.configure_network(&request.network) {
            Ok(()) => self.advance(BootStage::NetworkConfigured),
            Err(e) => self.diagnostics.record("network", e),
        }

        match self.host.limit_memory(&request.cgroup, request.memory_limit) {
            Ok(()) => self.advance(BootStage::MemoryLimited),
            Err(e) => self.diagnostics.record("memory", e),
        }

        if let Err(e) = self.host.change_root(&request.rootfs) {
            return Err(self.abort(e.into()));
        }
        self.advance(BootStage::RootChanged);

        if let Err(e) = self.host.mount_proc() {
            return Err(self.abort(e.into()));
        }
        self.advance(BootStage::ProcMounted);

        self.advance(BootStage::Executing);
        match self.host.exec(&request.command, &request.args) {
            Ok(never) => match never {},
            Err(e) => Err(self.abort(e.into())),
        }
    }

    pub fn stage(&self) -> BootStage {
        self.stage
    }

    /// Every stage entered so far, starting with [`BootStage::Spawned`]
    pub fn history(&self) -> &[BootStage] {
        &self.history
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn advance(&mut self, stage: BootStage) {
        log::debug!("boot stage {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
        self.history.push(stage);
    }

    fn abort(&mut self, error: BootError) -> BootError {
        log::error!("bootstrap aborted in {:?}: {}", self.stage, error);
        self.advance(BootStage::Aborted);
        error
    }
}

/// Bootstrap the current process against the real host
pub fn boot(request: &IsolationRequest) -> Result<Infallible, BootError> {
    Bootstrapper::new(LinuxHost::default()).run(request)
}
