/// nsbox: run a command as a minimal container
///
/// The `run` command builds the request and re-executes this binary as the
/// hidden `child` command inside new UTS, PID, mount and network
/// namespaces. The child sets up networking, a memory cgroup, the new root
/// and /proc, then execs the target command.
///
/// # Usage
/// ```bash
/// nsbox check --rootfs /srv/alpine
/// nsbox run --rootfs /srv/alpine --memory 67108864 /bin/sh -c 'echo hello'
/// nsbox run --log-file /var/log/nsbox/box.log /bin/sh -c 'echo hello'
/// nsbox detach-logs /var/log/nsbox/box.log
/// nsbox attach 4242
/// ```
use anyhow::{Context, Result};
use clap::Parser;
use nsbox::cli::{Cli, Commands};
use nsbox::config::ContainerConfig;
use nsbox::{bootstrap, launcher, logs, preflight, signals};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let log_file = args.log_file.clone();
            let request = args.into_request()?;
            log::info!(
                "running {} in {} ({} bytes)",
                request.command,
                request.rootfs.display(),
                request.memory_limit
            );

            let status = launcher::launch_with_log(&request, log_file.as_deref())
                .context("failed to start container")?;
            if !status.success() {
                log::info!("container exited with {:?}", status);
            }
            std::process::exit(status.code());
        }
        Commands::Child(args) => {
            let request = args.into_request();
            let error = match bootstrap::boot(&request) {
                Ok(never) => match never {},
                Err(e) => e,
            };
            eprintln!("nsbox: {}", error);
            std::process::exit(error.exit_code());
        }
        Commands::Check {
            rootfs,
            cgroup_root,
            config,
        } => {
            let mut config = match config {
                Some(path) => ContainerConfig::load(&path)?,
                None => ContainerConfig::default(),
            };
            if let Some(rootfs) = rootfs {
                config.rootfs = rootfs;
            }
            if let Some(root) = cgroup_root {
                config.cgroup_root = root;
            }

            let report = preflight::preflight(&config);
            print!("{}", report);
            if !report.passed() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Attach { pid } => {
            signals::attach(pid)?;
            println!("Attached to {}", pid);
            Ok(())
        }
        Commands::Detach { pid } => {
            signals::detach(pid)?;
            println!("Detached from {}", pid);
            Ok(())
        }
        Commands::DetachLogs { file } => {
            logs::detach_logs(&file)?;
            println!("Removed {}", file.display());
            Ok(())
        }
    }
}
