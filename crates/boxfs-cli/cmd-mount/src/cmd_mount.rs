// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fuser::MountOption;
use miette::{miette, Context, IntoDiagnostic, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::timeout;

use boxfs_cli_common::{self as cli, CommandName};

// The mount must be fully established before this process can
// daemonize, so the session setup happens on the plain main thread
// and the async runtime is only built afterwards.
fn main() {
    // because this function exits right away it does not
    // properly handle destruction of data, so we put the actual
    // logic into a separate function/scope
    std::process::exit(main2())
}
fn main2() -> i32 {
    let opt = CmdMount::parse();
    opt.logging.configure();

    let result = opt.run();
    match result {
        Ok(code) => code,
        Err(err) => {
            // stderr may be long gone once we daemonize, so failures
            // also land in the configured log
            tracing::error!("{err:?}");
            eprintln!("{err:?}");
            1
        }
    }
}

/// Mount the path-translating overlay over a project directory
#[derive(Debug, Parser)]
#[clap(name = "boxfs-mount")]
pub struct CmdMount {
    #[clap(flatten)]
    logging: cli::Logging,

    /// Do not daemonize the filesystem, run it in the foreground instead
    #[clap(long, short)]
    foreground: bool,

    /// Path mapping string, HOST:CONTAINER entries separated by ';'
    ///
    /// A colon immediately after a drive letter belongs to the host
    /// path: D:/proj:/d/proj maps D:/proj onto /d/proj.
    #[clap(long, env = "BOXFS_PATH_MAP", default_value = "")]
    pathmap: String,

    /// Directory name mapping string, ENCODED:NATIVE entries separated by ';'
    #[clap(long, env = "BOXFS_DIR_MAP", default_value = "")]
    dirmap: String,

    /// Comma-separated list of file extensions eligible for content transform
    #[clap(long, env = "BOXFS_EXTENSIONS", default_value = boxfs::DEFAULT_EXTENSIONS)]
    extensions: String,

    /// Transform trace level (0, 1 or 2)
    #[clap(long, env = "BOXFS_TRACE", default_value_t = 0)]
    trace: u8,

    /// Options for the mount in the form opt1,opt2=value
    #[clap(long, short, value_delimiter = ',')]
    options: Vec<String>,

    /// The directory to mount the overlay over
    source: std::path::PathBuf,
}

impl CommandName for CmdMount {
    fn command_name(&self) -> &str {
        "mount"
    }
}

impl CmdMount {
    pub fn run(&self) -> Result<i32> {
        let target = self
            .source
            .canonicalize()
            .into_diagnostic()
            .wrap_err("Invalid mount source")?;

        if already_mounted(&target) {
            return Err(miette!(
                "{} is already a mount point, refusing to mount over it",
                target.display()
            ));
        }

        let path_maps = boxfs::parse_path_map(&self.pathmap).into_diagnostic()?;
        let dir_maps = boxfs::parse_dir_map(&self.dirmap).into_diagnostic()?;
        let mount = boxfs::MountConfig {
            source: target.clone(),
            path_maps,
            dir_maps,
            extensions: boxfs::ExtensionSet::parse(&self.extensions),
            trace: self.trace,
        };

        // the original path is bound aside first; the overlay then
        // mounts over the original and reads through the bind
        let name = boxfs::mapping::encode_session_dir(target.to_string_lossy());
        let points = boxfs::env::bind_source_aside(&target, &name)
            .map_err(|err| miette!("Failed to bind mount source aside: {err}"))?;

        let mut mount_options = vec![
            MountOption::NoDev,
            MountOption::NoSuid,
            MountOption::DefaultPermissions,
            MountOption::FSName("boxfs".to_string()),
        ];
        if boxfs::launch::which("fusermount3").is_none() {
            // fuse2 refuses to mount over a directory that already has
            // contents unless told otherwise, and the overlay always
            // mounts over its own source; fuse3 dropped the option
            mount_options.push(MountOption::CUSTOM("nonempty".into()));
        }
        mount_options.extend(self.options.iter().map(|opt| mount_option(opt)));

        let session = boxfs_vfs::Session::new(boxfs_vfs::Config {
            source: points.aside.clone(),
            mount: Arc::new(mount),
            mount_options: mount_options.iter().cloned().collect(),
        })
        .into_diagnostic()?;

        tracing::debug!("establishing fuse session...");
        let mut fuser_session = fuser::Session::new(session, &target, &mount_options)
            .into_diagnostic()
            .wrap_err("Failed to create a FUSE session")?;

        if !self.foreground {
            tracing::debug!("moving into background...");
            // We cannot daemonize until the session is established,
            // otherwise initial use of the filesystem may not show any
            // mount at all.
            nix::unistd::daemon(false, true)
                .into_diagnostic()
                .wrap_err("Failed to daemonize")?;
        }

        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .into_diagnostic()
            .wrap_err("Failed to establish runtime")?;

        let result = rt.block_on(async move {
            let mut interrupt = signal(SignalKind::interrupt())
                .into_diagnostic()
                .wrap_err("interrupt signal handler")?;
            let mut quit = signal(SignalKind::quit())
                .into_diagnostic()
                .wrap_err("quit signal handler")?;
            let mut terminate = signal(SignalKind::terminate())
                .into_diagnostic()
                .wrap_err("terminate signal handler")?;

            tracing::info!("starting overlay filesystem");
            let unmount_callable =
                Arc::new(std::sync::Mutex::new(fuser_session.unmount_callable()));
            let mut join_handle = tokio::task::spawn_blocking(move || fuser_session.run());

            let res = tokio::select! {
                res = &mut join_handle => {
                    tracing::info!("filesystem shutting down");
                    res.into_diagnostic().wrap_err("FUSE session failed")
                }
                _ = terminate.recv() => Err(miette!("Terminate signal received, filesystem shutting down")),
                _ = interrupt.recv() => Err(miette!("Interrupt signal received, filesystem shutting down")),
                _ = quit.recv() => Err(miette!("Quit signal received, filesystem shutting down")),
            };

            if !join_handle.is_finished() {
                unmount_callable
                    .lock()
                    .unwrap()
                    .unmount()
                    .into_diagnostic()
                    .wrap_err("FUSE unmount failed")?;
                // the join uses a timeout so a stuck unmount cannot
                // keep this process alive forever
                match timeout(Duration::from_secs(5), join_handle).await {
                    Ok(r) => {
                        r.into_diagnostic()
                            .wrap_err("FUSE join_handle await failed")?
                            .into_diagnostic()
                            .wrap_err("FUSE session failed after unmount")?;
                    }
                    Err(_) => {
                        tracing::warn!("FUSE session join timed out");
                    }
                }
            }
            res
        });

        if let Err(err) = boxfs::env::unmount(&points) {
            tracing::warn!("failed to clean up mounts: {err}");
        }

        rt.shutdown_timeout(Duration::from_secs(2));
        result?.into_diagnostic()?;
        Ok(0)
    }
}

/// A directory sitting on a different device than its parent is
/// already the root of some mount; mounting the overlay over it would
/// shadow whatever lives there.
fn already_mounted(target: &std::path::Path) -> bool {
    let Some(parent) = target.parent() else {
        return false;
    };
    match (nix::sys::stat::stat(target), nix::sys::stat::stat(parent)) {
        (Ok(t), Ok(p)) => t.st_dev != p.st_dev,
        _ => false,
    }
}

/// The `-o` option names this mount understands. Anything not listed
/// here is handed to the kernel unchanged so distro-specific fuse
/// options keep working.
fn mount_option(opt: &str) -> MountOption {
    match opt {
        "auto_unmount" => MountOption::AutoUnmount,
        "allow_other" => MountOption::AllowOther,
        "allow_root" => MountOption::AllowRoot,
        "ro" => MountOption::RO,
        "noatime" => MountOption::NoAtime,
        other => match other.split_once('=') {
            Some(("fsname", name)) => MountOption::FSName(name.to_string()),
            Some(("subtype", name)) => MountOption::Subtype(name.to_string()),
            _ => MountOption::CUSTOM(other.to_string()),
        },
    }
}
