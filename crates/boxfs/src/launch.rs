// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! Deterministic assembly of the container launch arguments.
//!
//! Everything the container runtime needs to give the overlay
//! filesystem and the syscall interposer one coherent view of the
//! project is computed here: the mapping strings, the environment,
//! the capability set and the resource limits. Assembly has no side
//! effects beyond optionally writing the secrets env-file.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::Config;
use crate::mapping::{encode_session_dir, normalize_host_path};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./launch_test.rs"]
mod launch_test;

/// Home directory of the agent user inside the container.
pub const CONTAINER_HOME: &str = "/home/agent";
/// Agent configuration directory, fixed under the container home.
pub const CONTAINER_CONFIG_DIR: &str = "/home/agent/.agent";

/// Capabilities kept after dropping everything else.
const BASE_CAPABILITIES: &[&str] = &["SETUID", "SETGID", "CHOWN"];

/// Preamble appended to the agent's system prompt so it understands the
/// environment it is really running in.
const CONTAINER_PROMPT: &str = "\
You are running inside an isolated Linux container. Only the project \
directory and the agent configuration directory persist after the \
session ends; everything else is discarded. Process count, memory and \
CPU are limited. Paths are translated transparently between host and \
container spellings, so use the paths you see as-is. Files placed in \
the inbox directory of the project are delivered from the host and may \
appear at any time.";

/// A command to be executed
pub struct Command {
    pub executable: OsString,
    pub args: Vec<OsString>,
}

impl Command {
    /// Turns this command into a synchronously runnable one
    pub fn into_std(self) -> std::process::Command {
        let mut cmd = std::process::Command::new(self.executable);
        cmd.args(self.args);
        cmd
    }

    /// Turns this command into an asynchronously runnable one
    pub fn into_tokio(self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(self.executable);
        cmd.args(self.args);
        cmd
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Command")
            .field(&self.executable)
            .field(&self.args)
            .finish()
    }
}

/// The one coarse network switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetworkPolicy {
    #[default]
    Full,
    Restricted,
    None,
}

impl FromStr for NetworkPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Self::Full),
            "restricted" => Ok(Self::Restricted),
            "none" => Ok(Self::None),
            other => Err(Error::String(format!("Unknown network policy: {other}"))),
        }
    }
}

/// Caller-supplied options for one container launch.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Absolute project path on the host, in any native spelling.
    pub project_dir: String,
    pub project_name: String,
    /// Identifier of the image stack to launch.
    pub stack: String,
    /// Start without the persisted agent configuration directory.
    pub fresh: bool,
    pub headless: bool,
    pub debug: u8,
    /// Lift the resource limits entirely.
    pub unrestricted: bool,
    pub network: NetworkPolicy,
    pub read_only_root: bool,
    /// Mount FUSE support inside the container.
    pub fuse: bool,
    pub memory: Option<String>,
    pub cpus: Option<f64>,
    pub pids_limit: Option<u32>,
    /// Host path of the persisted agent configuration directory.
    pub config_dir: Option<String>,
    pub trace: Option<u8>,
    /// User-supplied environment for the agent.
    pub env: Vec<(String, String)>,
    /// Arguments passed through to the agent after the image name.
    pub agent_args: Vec<String>,
    /// User addition to the agent's system prompt.
    pub system_prompt: Option<String>,
    /// Container runtime binary; discovered on PATH when unset.
    pub runtime: Option<String>,
}

/// Everything needed to start the container, fully derived and ready
/// to run. Construction either succeeds whole or fails whole.
#[derive(Debug)]
pub struct LaunchPlan {
    pub command: Command,
    /// Non-secret environment the container receives.
    pub env: BTreeMap<String, String>,
    pub interactive: bool,
    pub container_name: String,
    pub image: String,
    /// Temp file carrying secret env values, passed by path so they
    /// never appear on the launcher's argv. The caller unlinks it
    /// after the container exits.
    pub env_file: Option<PathBuf>,
}

impl LaunchPlan {
    /// Best-effort removal of the secrets file once the container is done.
    pub fn remove_env_file(&self) {
        if let Some(path) = &self.env_file {
            if let Err(err) = std::fs::remove_file(path) {
                tracing::warn!(?path, ?err, "failed to remove secrets env-file");
            }
        }
    }
}

/// Derive the container-side spelling of a host project path.
///
/// `X:/...` becomes `/x/...`, `/mnt/x/...` becomes `/x/...`, and a
/// plain POSIX path maps to itself. The images carry `/a`..`/z` plus
/// `/A:`-style symlinks so either spelling resolves inside.
pub fn container_side_path(host: &str) -> String {
    let host = normalize_host_path(host);
    let bytes = host.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let letter = bytes[0].to_ascii_lowercase() as char;
        let rest = host[2..].trim_start_matches('/');
        return if rest.is_empty() {
            format!("/{letter}")
        } else {
            format!("/{letter}/{rest}")
        };
    }
    if let Some(rest) = host.strip_prefix("/mnt/") {
        let rb = rest.as_bytes();
        if !rb.is_empty() && rb[0].is_ascii_alphabetic() && (rb.len() == 1 || rb[1] == b'/') {
            let letter = rb[0].to_ascii_lowercase() as char;
            let tail = rest[1..].trim_start_matches('/');
            return if tail.is_empty() {
                format!("/{letter}")
            } else {
                format!("/{letter}/{tail}")
            };
        }
    }
    host
}

/// The alternate spelling of the same host directory, when one exists:
/// a drive path also resolves under `/mnt/<letter>` and vice versa.
fn alias_spelling(host: &str) -> Option<String> {
    let bytes = host.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let letter = bytes[0].to_ascii_lowercase() as char;
        let rest = host[2..].trim_start_matches('/');
        return Some(if rest.is_empty() {
            format!("/mnt/{letter}")
        } else {
            format!("/mnt/{letter}/{rest}")
        });
    }
    if let Some(rest) = host.strip_prefix("/mnt/") {
        let rb = rest.as_bytes();
        if !rb.is_empty() && rb[0].is_ascii_alphabetic() && (rb.len() == 1 || rb[1] == b'/') {
            let letter = rb[0].to_ascii_uppercase() as char;
            let tail = rest[1..].trim_start_matches('/');
            return Some(if tail.is_empty() {
                format!("{letter}:/")
            } else {
                format!("{letter}:/{tail}")
            });
        }
    }
    None
}

/// Build the `PATH_MAP` string: project mapping first, the alternate
/// spelling of the project next when one exists, and the configuration
/// directory last (omitted in fresh mode). Entries are separated by
/// `;`, host and container sides by `:`; the colon after a drive
/// letter belongs to the path.
pub fn path_map_string(opts: &LaunchOptions) -> String {
    let host = normalize_host_path(&opts.project_dir);
    let container = container_side_path(&host);
    let mut entries = vec![format!("{host}:{container}")];
    if let Some(alias) = alias_spelling(&host) {
        entries.push(format!("{alias}:{container}"));
    }
    if !opts.fresh {
        if let Some(config_dir) = &opts.config_dir {
            let config_host = normalize_host_path(config_dir);
            entries.push(format!("{config_host}:{CONTAINER_CONFIG_DIR}"));
        }
    }
    entries.join(";")
}

/// Build the `DIR_MAP` string bridging the container-encoded and
/// native-encoded session directory names, or nothing when the two
/// spellings already agree.
pub fn dir_map_string(opts: &LaunchOptions) -> Option<String> {
    let host = normalize_host_path(&opts.project_dir);
    let container = container_side_path(&host);
    let container_encoded = encode_session_dir(&container);
    let native_encoded = encode_session_dir(&host);
    if container_encoded == native_encoded {
        return None;
    }
    Some(format!("{container_encoded}:{native_encoded}"))
}

/// The paths that survive container exit, for injection into the
/// agent's system prompt.
pub fn persistent_paths_hint(opts: &LaunchOptions) -> String {
    let container = container_side_path(&normalize_host_path(&opts.project_dir));
    if opts.fresh || opts.config_dir.is_none() {
        format!("Persistent paths: {container}")
    } else {
        format!("Persistent paths: {container}, {CONTAINER_CONFIG_DIR}")
    }
}

/// The complete system prompt for the agent: the fixed container
/// preamble, the persistence hint, then any user addition.
pub fn system_prompt(opts: &LaunchOptions) -> String {
    let mut prompt = format!("{CONTAINER_PROMPT}\n{}", persistent_paths_hint(opts));
    if let Some(extra) = &opts.system_prompt {
        prompt.push_str("\n\n");
        prompt.push_str(extra);
    }
    prompt
}

/// Annotate the well-known exit codes of the contained process; all
/// other codes are surfaced verbatim with no annotation.
pub fn annotate_exit_status(code: i32) -> Option<&'static str> {
    match code {
        130 => Some("interrupted"),
        137 => Some("killed, possibly out of memory"),
        139 => Some("crashed with a segmentation fault"),
        143 => Some("terminated"),
        _ => None,
    }
}

fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    upper.contains("TOKEN")
        || upper.contains("SECRET")
        || upper.contains("PASSWORD")
        || upper.contains("PASSWD")
        || upper.contains("CREDENTIAL")
        || upper.contains("OAUTH")
        || upper.ends_with("_KEY")
        || upper == "KEY"
}

/// Find an executable on PATH.
pub fn which<S: AsRef<str>>(name: S) -> Option<PathBuf> {
    let path = std::env::var("PATH").unwrap_or_default();
    for dir in path.split(':') {
        let candidate = std::path::Path::new(dir).join(name.as_ref());
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Assemble the full launch plan from the given options and the loaded
/// configuration. Deterministic apart from the secrets file path; any
/// configuration error aborts before anything is constructed.
pub fn assemble(opts: &LaunchOptions, config: &Config) -> Result<LaunchPlan> {
    if opts.project_dir.is_empty() {
        return Err(Error::String("project directory is required".to_string()));
    }
    let host = normalize_host_path(&opts.project_dir);
    let container_project = container_side_path(&host);
    let interactive = !opts.headless && opts.debug < 2;

    let runtime = match &opts.runtime {
        Some(r) => OsString::from(r),
        None => which("docker")
            .or_else(|| which("podman"))
            .ok_or(Error::MissingBinary("docker"))?
            .into_os_string(),
    };

    let prefix = &config.container.name_prefix;
    let container_name = format!("{prefix}-{}", sanitize_name(&opts.project_name));
    let image = format!("{prefix}-{}", sanitize_name(&opts.stack));

    let mut args: Vec<OsString> = vec!["run".into(), "--rm".into()];
    args.push("--name".into());
    args.push(container_name.clone().into());
    args.push("-i".into());
    if interactive {
        args.push("-t".into());
    }

    if config.container.privileged {
        // the platform cannot mount FUSE in an unprivileged container;
        // the capability restrictions do not apply in this branch
        args.push("--privileged".into());
    } else {
        args.push("--cap-drop".into());
        args.push("ALL".into());
        for cap in BASE_CAPABILITIES {
            args.push("--cap-add".into());
            args.push((*cap).into());
        }
        if opts.fuse {
            args.push("--cap-add".into());
            args.push("SYS_ADMIN".into());
            args.push("--device".into());
            args.push("/dev/fuse".into());
        }
        if opts.network != NetworkPolicy::Full {
            args.push("--cap-add".into());
            args.push("NET_ADMIN".into());
        }
        args.push("--security-opt".into());
        args.push("no-new-privileges".into());
    }

    if opts.network == NetworkPolicy::None {
        args.push("--network".into());
        args.push("none".into());
    }

    if !opts.unrestricted {
        args.push("--pids-limit".into());
        args.push(
            opts.pids_limit
                .unwrap_or(config.container.pids_limit)
                .to_string()
                .into(),
        );
        args.push("--memory".into());
        args.push(
            opts.memory
                .clone()
                .unwrap_or_else(|| config.container.memory.clone())
                .into(),
        );
        args.push("--cpus".into());
        args.push(
            opts.cpus
                .unwrap_or(config.container.cpus)
                .to_string()
                .into(),
        );
        args.push("--cpu-shares".into());
        args.push(config.container.cpu_shares.to_string().into());
    }

    if opts.read_only_root {
        args.push("--read-only".into());
    }

    for (target, size) in [
        ("/tmp", &config.container.tmp_size),
        ("/var/tmp", &config.container.var_tmp_size),
        ("/run", &config.container.run_size),
    ] {
        args.push("--tmpfs".into());
        args.push(format!("{target}:rw,noexec,nosuid,nodev,size={size}").into());
    }

    args.push("-v".into());
    args.push(format!("{host}:{container_project}").into());
    args.push("-w".into());
    args.push(container_project.clone().into());

    let mut env = BTreeMap::new();
    env.insert("HOME".to_string(), CONTAINER_HOME.to_string());
    env.insert(
        "AGENT_CONFIG_DIR".to_string(),
        CONTAINER_CONFIG_DIR.to_string(),
    );
    env.insert(crate::ENV_PATH_MAP.to_string(), path_map_string(opts));
    if let Some(dir_map) = dir_map_string(opts) {
        env.insert(crate::ENV_DIR_MAP.to_string(), dir_map);
    }
    if host != container_project {
        // the interposer only activates when the spellings differ
        env.insert(crate::ENV_HOST_ROOT.to_string(), host.clone());
    }
    if let Some(trace) = opts.trace {
        env.insert(crate::ENV_TRACE.to_string(), trace.to_string());
    }
    env.insert(
        "BOXFS_UID".to_string(),
        nix::unistd::getuid().as_raw().to_string(),
    );
    env.insert(
        "BOXFS_GID".to_string(),
        nix::unistd::getgid().as_raw().to_string(),
    );

    let mut secrets = Vec::new();
    for (key, value) in opts.env.iter() {
        if is_secret_key(key) {
            secrets.push((key.clone(), value.clone()));
        } else {
            env.insert(key.clone(), value.clone());
        }
    }

    let env_file = if secrets.is_empty() {
        None
    } else {
        Some(write_env_file(&secrets)?)
    };
    if let Some(path) = &env_file {
        args.push("--env-file".into());
        args.push(path.clone().into());
    }

    for (key, value) in env.iter() {
        args.push("-e".into());
        args.push(format!("{key}={value}").into());
    }

    args.push(image.clone().into());
    args.extend(opts.agent_args.iter().map(OsString::from));

    Ok(LaunchPlan {
        command: Command {
            executable: runtime,
            args,
        },
        env,
        interactive,
        container_name,
        image,
        env_file,
    })
}

/// Write secret env values to a private temp file whose path is handed
/// to the runtime as `--env-file`, keeping the values off every argv.
fn write_env_file(secrets: &[(String, String)]) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(".boxfs-env-")
        .tempfile()
        .map_err(|err| Error::wrap_io(err, "Failed to create secrets env-file"))?;
    for (key, value) in secrets {
        writeln!(file, "{key}={value}")
            .map_err(|err| Error::wrap_io(err, "Failed to write secrets env-file"))?;
    }
    let (_, path) = file
        .keep()
        .map_err(|err| Error::wrap_io(err.error, "Failed to persist secrets env-file"))?;
    Ok(path)
}
