//! Sandboxed command execution
//!
//! `CommandSandbox::execute` validates a command, creates a private working
//! directory, and runs the command there with a scrubbed environment and
//! hard limits on time and output. The directory is removed on every exit
//! path, including cancellation of the returned future.
//!
//! On unix the child also gets a best-effort address-space limit, its own
//! process group, and reduced privileges when the parent runs as root.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::{timeout, Duration};

use crate::redaction::{detect_secrets, sanitize_command};
use crate::{slog_info, slog_warn};

pub const TIMEOUT_MARKER: &str = "[EXECUTION TIMEOUT]";
pub const TRUNCATION_MARKER: &str = "\n[OUTPUT TRUNCATED]\n";
/// Time a child gets to exit after the polite signal before it is killed.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

const RESTRICTED_PATH: &str =
    "/run/current-system/sw/bin:/nix/var/nix/profiles/default/bin:/usr/local/bin:/usr/bin:/bin";
const DISCARD_PROXY: &str = "http://127.0.0.1:9";
const PROXY_VARS: &[&str] = &[
    "http_proxy",
    "https_proxy",
    "ftp_proxy",
    "all_proxy",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "FTP_PROXY",
    "ALL_PROXY",
];
const READ_CHUNK: usize = 8192;
/// How long output is still collected after the child exits while a
/// background process keeps its pipes open.
pub const OUTPUT_DRAIN: Duration = Duration::from_millis(200);

const DENIED_BINARIES: &[(&str, &str)] = &[
    ("rm", "deletes files"),
    ("dd", "writes raw blocks"),
    ("mkfs", "formats devices"),
    ("fdisk", "rewrites partition tables"),
    ("sfdisk", "rewrites partition tables"),
    ("parted", "rewrites partition tables"),
    ("wipefs", "erases filesystem signatures"),
    ("mkswap", "formats devices"),
    ("shred", "destroys file contents"),
    ("chmod", "changes permissions"),
    ("chown", "changes ownership"),
];

const SHELLS: &[&str] = &["sh", "bash", "dash", "zsh", "fish", "ksh"];
const PSEUDO_DEVICES: &[&str] = &[
    "null", "zero", "full", "random", "urandom", "stdin", "stdout", "stderr", "tty", "fd", "shm",
];

/// Programs that run another program named in their arguments, with the
/// options of each that consume the following word.
const WRAPPERS: &[(&str, &[&str])] = &[
    (
        "sudo",
        &["-u", "-g", "-h", "-p", "-C", "-D", "-r", "-t", "-U", "--user", "--group", "--host", "--prompt", "--chdir"],
    ),
    ("doas", &["-u", "-C"]),
    ("env", &["-u", "-C", "-S", "--unset", "--chdir", "--split-string"]),
    ("nice", &["-n", "--adjustment"]),
    ("nohup", &[]),
    ("timeout", &["-s", "-k", "--signal", "--kill-after"]),
    (
        "xargs",
        &["-a", "-d", "-E", "-I", "-L", "-n", "-P", "-s", "--arg-file", "--delimiter", "--max-args", "--max-procs"],
    ),
    ("stdbuf", &["-i", "-o", "-e", "--input", "--output", "--error"]),
    ("setsid", &[]),
    ("exec", &["-a"]),
    ("command", &[]),
];
/// `find` actions that run a program.
const FIND_EXEC: &[&str] = &["-exec", "-execdir", "-ok", "-okdir"];

lazy_static::lazy_static! {
    static ref FORCE_RECURSIVE_DELETE: regex::Regex = regex::Regex::new(
        r"\brm\s+(?:-[a-zA-Z]*[rR][a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*[rR]|-[rR]\s+-f|-f\s+-[rR]|--recursive\s+--force|--force\s+--recursive)"
    ).unwrap();
    static ref DEVICE_PATH: regex::Regex =
        regex::Regex::new(r#"(?:^|[\s=<>'"(:,])/dev/([A-Za-z0-9_]+)"#).unwrap();
    static ref ROOT_DELETE: regex::Regex =
        regex::Regex::new(r"(?s)\bfind\s+/(?:\s.*)?\s-delete\b").unwrap();
    static ref FORK_BOMB: regex::Regex = regex::Regex::new(
        r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:|\bfork\s*\(\s*\)"
    ).unwrap();
    static ref SCRIPT_SEPARATOR: regex::Regex = regex::Regex::new(r"[;&|\n()`]|\$\(").unwrap();
}

/// Limits applied to one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    pub max_execution_time_ms: u64,
    /// Address-space ceiling for the child; applied where the platform
    /// allows it, zero disables it.
    pub max_memory_bytes: u64,
    pub max_output_bytes: usize,
    pub allow_network: bool,
    pub allow_file_write: bool,
    /// Parent directory for the per-call sandbox directory.
    pub working_directory: PathBuf,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 30_000,
            max_memory_bytes: 512 * 1024 * 1024,
            max_output_bytes: 10 * 1024 * 1024,
            allow_network: false,
            allow_file_write: false,
            working_directory: std::env::temp_dir(),
        }
    }
}

impl SandboxPolicy {
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.max_execution_time_ms == 0 {
            return Err(SandboxError::InvalidPolicy(
                "max_execution_time_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::InvalidPolicy(
                "max_output_bytes must be greater than zero".to_string(),
            ));
        }
        if self.working_directory.as_os_str().is_empty() {
            return Err(SandboxError::InvalidPolicy(
                "working_directory must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("{reason}")]
    Rejected { reason: String },
    #[error("invalid sandbox policy: {0}")]
    InvalidPolicy(String),
    #[error("failed to prepare sandbox directory: {0}")]
    Workspace(#[source] std::io::Error),
}

impl SandboxError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, SandboxError::Rejected { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the command timed out, was killed by a signal, or never
    /// started.
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub execution_time_ms: u64,
    pub sanitized_command: String,
    pub timed_out: bool,
    pub truncated: bool,
}

/// Check a command against the deny list and the dangerous-pattern rules.
///
/// Programs run through a wrapper (`sudo`, `env`, `xargs`, ...), a shell
/// `-c` script or `find -exec` are checked as well.
pub fn validate_command(command: &str, args: &[String]) -> Result<(), SandboxError> {
    let words: Vec<&str> = std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect();
    check_invocation(&words)?;

    let full = words.join(" ");
    if args.iter().any(|a| a == "/*" || a == "--no-preserve-root") {
        return Err(dangerous("operates on the filesystem root"));
    }
    if FORCE_RECURSIVE_DELETE.is_match(&full) {
        return Err(dangerous("force-recursive delete"));
    }
    if ROOT_DELETE.is_match(&full) {
        return Err(dangerous("deletes from the filesystem root"));
    }
    for caps in DEVICE_PATH.captures_iter(&full) {
        let device = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if !PSEUDO_DEVICES.contains(&device) {
            return Err(dangerous(&format!("access to device file /dev/{}", device)));
        }
    }
    if FORK_BOMB.is_match(&full) {
        return Err(dangerous("fork bomb"));
    }

    Ok(())
}

/// Deny-list check for one program invocation and everything it runs.
fn check_invocation(words: &[&str]) -> Result<(), SandboxError> {
    let Some(start) = words.iter().position(|w| !is_assignment(w)) else {
        return Ok(());
    };
    let name = program_name(words[start]);
    check_binary(name)?;
    let rest = &words[start + 1..];

    if let Some((_, value_options)) = WRAPPERS.iter().find(|(wrapper, _)| *wrapper == name) {
        let mut i = 0;
        while let Some(word) = rest.get(i) {
            if *word == "--" {
                i += 1;
                break;
            }
            if value_options.contains(word) {
                i += 2;
            } else if word.starts_with('-') || is_assignment(word) {
                i += 1;
            } else {
                break;
            }
        }
        if name == "timeout" {
            // duration
            i += 1;
        }
        return match rest.get(i..) {
            Some(wrapped) => check_invocation(wrapped),
            None => Ok(()),
        };
    }

    if SHELLS.contains(&name) {
        let script = rest
            .iter()
            .position(|a| is_command_option(a))
            .and_then(|i| rest.get(i + 1));
        if let Some(script) = script {
            for segment in SCRIPT_SEPARATOR.split(script) {
                let segment: Vec<&str> = segment.split_whitespace().collect();
                check_invocation(&segment)?;
            }
        }
    }

    if name == "find" {
        for (i, word) in rest.iter().enumerate() {
            if FIND_EXEC.contains(word) {
                check_invocation(&rest[i + 1..])?;
            }
        }
    }

    Ok(())
}

/// `NAME=value` prefix word.
fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// Shell option that takes the script, such as `-c` or `-lc`.
fn is_command_option(word: &str) -> bool {
    word.starts_with('-') && !word.starts_with("--") && word.contains('c')
}

fn program_name(command: &str) -> &str {
    Path::new(command)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(command)
}

fn check_binary(name: &str) -> Result<(), SandboxError> {
    let base = name.split('.').next().unwrap_or(name);
    match DENIED_BINARIES.iter().find(|(denied, _)| *denied == base) {
        Some((denied, why)) => Err(SandboxError::Rejected {
            reason: format!("Command '{}' is disallowed: {}", denied, why),
        }),
        None => Ok(()),
    }
}

fn dangerous(what: &str) -> SandboxError {
    SandboxError::Rejected {
        reason: format!("Dangerous pattern detected: {}", what),
    }
}

/// Environment handed to every child; nothing is inherited except NIX_PATH.
pub fn sandbox_environment(policy: &SandboxPolicy, home: &Path) -> Vec<(String, String)> {
    let home = home.display().to_string();
    let mut env = vec![
        ("PATH".to_string(), RESTRICTED_PATH.to_string()),
        ("HOME".to_string(), home.clone()),
        ("TMPDIR".to_string(), home),
        ("LANG".to_string(), "C.UTF-8".to_string()),
        ("LC_ALL".to_string(), "C.UTF-8".to_string()),
        ("TERM".to_string(), "dumb".to_string()),
        ("PAGER".to_string(), "cat".to_string()),
        ("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()),
        ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
    ];
    if let Ok(nix_path) = std::env::var("NIX_PATH") {
        env.push(("NIX_PATH".to_string(), nix_path));
    }
    if !policy.allow_network {
        for var in PROXY_VARS {
            env.push((var.to_string(), DISCARD_PROXY.to_string()));
        }
        env.push(("no_proxy".to_string(), String::new()));
        env.push(("NO_PROXY".to_string(), String::new()));
    }
    env
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Shared output budget for both streams.
struct OutputBuffer {
    limit: usize,
    used: usize,
    truncated: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            used: 0,
            truncated: false,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    fn push(&mut self, stream: Stream, chunk: &[u8]) {
        if self.truncated {
            return;
        }
        let take = chunk.len().min(self.limit - self.used);
        let buf = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        buf.extend_from_slice(&chunk[..take]);
        self.used += take;
        if take < chunk.len() {
            buf.extend_from_slice(TRUNCATION_MARKER.as_bytes());
            self.truncated = true;
        }
    }
}

#[derive(Default)]
struct ChildOutcome {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
    signal: Option<i32>,
    timed_out: bool,
    truncated: bool,
    spawn_error: Option<String>,
}

/// Per-call directory; deleted when dropped.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn create(policy: &SandboxPolicy, owner: Option<(u32, u32)>) -> Result<Self, SandboxError> {
        let dir = tempfile::Builder::new()
            .prefix("intent-sandbox-")
            .tempdir_in(&policy.working_directory)
            .map_err(SandboxError::Workspace)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mut private = true;
            if let Some((uid, gid)) = owner {
                if let Err(e) = std::os::unix::fs::chown(dir.path(), Some(uid), Some(gid)) {
                    private = false;
                    slog_warn!(
                        "SANDBOX",
                        "chown_failed",
                        json!({ "uid": uid, "error": e.to_string() })
                    );
                }
            }
            let mode = match (policy.allow_file_write, private) {
                (false, _) => 0o555,
                (true, true) => 0o700,
                (true, false) => 0o777,
            };
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(mode))
                .map_err(SandboxError::Workspace)?;
        }
        #[cfg(not(unix))]
        let _ = owner;

        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn close(self) {
        let path = self.dir.path().display().to_string();
        if let Err(e) = self.dir.close() {
            slog_warn!(
                "SANDBOX",
                "cleanup_failed",
                json!({ "dir": path, "error": e.to_string() })
            );
        }
    }
}

/// Runs commands under a [`SandboxPolicy`].
#[derive(Debug, Default)]
pub struct CommandSandbox {
    spawned: AtomicU64,
}

impl CommandSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of processes this sandbox has started.
    pub fn spawn_count(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn validate_command(&self, command: &str, args: &[String]) -> Result<(), SandboxError> {
        validate_command(command, args)
    }

    /// Run `command` under `policy`.
    ///
    /// Rejected commands and malformed policies are errors and never start
    /// a process. Everything that happens after validation, including a
    /// failure to start, a non-zero exit, or a timeout, is reported in the
    /// returned [`ExecutionResult`].
    pub async fn execute(
        &self,
        command: &str,
        args: &[String],
        policy: &SandboxPolicy,
    ) -> Result<ExecutionResult, SandboxError> {
        policy.validate()?;
        let sanitized = sanitize_command(command, args);

        if let Err(e) = validate_command(command, args) {
            slog_warn!(
                "SANDBOX",
                "rejected",
                json!({ "command": sanitized, "reason": e.to_string() })
            );
            return Err(e);
        }

        let secrets: Vec<&str> = args.iter().flat_map(|a| detect_secrets(a)).collect();
        if !secrets.is_empty() {
            slog_warn!(
                "SANDBOX",
                "secret_in_arguments",
                json!({ "command": sanitized, "kinds": secrets })
            );
        }

        let target = deescalation_target();
        let workspace = Workspace::create(policy, target)?;
        slog_info!(
            "SANDBOX",
            "execute",
            json!({
                "command": sanitized,
                "timeout_ms": policy.max_execution_time_ms,
                "network": policy.allow_network,
                "file_write": policy.allow_file_write,
                "deescalated": target.is_some(),
            })
        );

        let started = Instant::now();
        let outcome = self
            .run_child(command, args, workspace.path(), policy, target)
            .await;
        let execution_time_ms = started.elapsed().as_millis() as u64;
        workspace.close();

        let mut stderr = String::from_utf8_lossy(&outcome.stderr).into_owned();
        if let Some(err) = &outcome.spawn_error {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&format!("failed to start {}: {}", program_name(command), err));
        }
        if outcome.timed_out {
            stderr.push('\n');
            stderr.push_str(TIMEOUT_MARKER);
        }

        let result = ExecutionResult {
            success: !outcome.timed_out && outcome.exit_code == Some(0),
            stdout: String::from_utf8_lossy(&outcome.stdout).into_owned(),
            stderr,
            exit_code: if outcome.timed_out { None } else { outcome.exit_code },
            signal: outcome.signal,
            execution_time_ms,
            sanitized_command: sanitized,
            timed_out: outcome.timed_out,
            truncated: outcome.truncated,
        };

        slog_info!(
            "SANDBOX",
            "finished",
            json!({
                "command": result.sanitized_command,
                "success": result.success,
                "exit_code": result.exit_code,
                "signal": result.signal,
                "timed_out": result.timed_out,
                "truncated": result.truncated,
                "elapsed_ms": execution_time_ms,
            })
        );

        Ok(result)
    }

    async fn run_child(
        &self,
        command: &str,
        args: &[String],
        dir: &Path,
        policy: &SandboxPolicy,
        target: Option<(u32, u32)>,
    ) -> ChildOutcome {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(dir)
            .env_clear()
            .envs(sandbox_environment(policy, dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        restrict_child(&mut cmd, policy, target);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ChildOutcome {
                    spawn_error: Some(e.to_string()),
                    ..ChildOutcome::default()
                }
            }
        };
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let group = child.id();

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut output = OutputBuffer::new(policy.max_output_bytes);
        let mut out_chunk = vec![0u8; READ_CHUNK];
        let mut err_chunk = vec![0u8; READ_CHUNK];
        let mut status = None;
        let mut timed_out = false;

        let deadline = tokio::time::sleep(Duration::from_millis(policy.max_execution_time_ms));
        tokio::pin!(deadline);
        let drain = tokio::time::sleep(OUTPUT_DRAIN);
        tokio::pin!(drain);

        while status.is_none() || stdout.is_some() || stderr.is_some() {
            tokio::select! {
                read = read_chunk(&mut stdout, &mut out_chunk) => match read {
                    Ok(0) | Err(_) => stdout = None,
                    Ok(n) => output.push(Stream::Stdout, &out_chunk[..n]),
                },
                read = read_chunk(&mut stderr, &mut err_chunk) => match read {
                    Ok(0) | Err(_) => stderr = None,
                    Ok(n) => output.push(Stream::Stderr, &err_chunk[..n]),
                },
                exit = child.wait(), if status.is_none() => {
                    status = Some(exit);
                    drain.as_mut().reset(tokio::time::Instant::now() + OUTPUT_DRAIN);
                }
                _ = &mut drain, if status.is_some() => {
                    slog_info!(
                        "SANDBOX",
                        "pipes_held_after_exit",
                        json!({ "pid": group })
                    );
                    break;
                }
                _ = &mut deadline => {
                    timed_out = status.is_none();
                    break;
                }
            }
        }

        if timed_out {
            let exit = terminate(&mut child, group).await;
            if status.is_none() {
                status = exit.map(Ok);
            }
        } else {
            // leftovers from the exited command's process group
            signal_group(&mut child, group, GroupSignal::Kill);
        }

        let mut outcome = ChildOutcome {
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out,
            truncated: output.truncated,
            ..ChildOutcome::default()
        };
        match status {
            Some(Ok(exit)) => {
                outcome.exit_code = exit.code();
                outcome.signal = exit_signal(&exit);
            }
            Some(Err(e)) => outcome.spawn_error = Some(e.to_string()),
            None => {}
        }
        outcome
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(
    pipe: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match pipe {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Polite signal to the child's process group, then a hard kill once the
/// grace period is over.
async fn terminate(child: &mut Child, group: Option<u32>) -> Option<std::process::ExitStatus> {
    signal_group(child, group, GroupSignal::Terminate);
    match timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            // stragglers that inherited the group
            signal_group(child, group, GroupSignal::Kill);
            Some(status)
        }
        _ => {
            signal_group(child, group, GroupSignal::Kill);
            let _ = child.kill().await;
            child.try_wait().ok().flatten()
        }
    }
}

#[derive(Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

/// Signal the process group led by the child, and the child itself while it
/// has not been reaped. The group id outlives the leader.
#[cfg(unix)]
fn signal_group(child: &mut Child, group: Option<u32>, signal: GroupSignal) {
    let signo = match signal {
        GroupSignal::Terminate => libc::SIGTERM,
        GroupSignal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe {
        if let Some(pgid) = group {
            libc::kill(-(pgid as libc::pid_t), signo);
        }
        if let Some(pid) = child.id() {
            libc::kill(pid as libc::pid_t, signo);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _group: Option<u32>, _signal: GroupSignal) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Unprivileged identity for the child when this process runs as root:
/// the invoking sudo user if known, otherwise `nobody`.
#[cfg(unix)]
fn deescalation_target() -> Option<(u32, u32)> {
    const NOBODY: u32 = 65534;

    // SAFETY: geteuid(2) cannot fail and touches no memory.
    if unsafe { libc::geteuid() } != 0 {
        return None;
    }
    let id = |var: &str| {
        std::env::var(var)
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|id| *id != 0)
    };
    Some((id("SUDO_UID").unwrap_or(NOBODY), id("SUDO_GID").unwrap_or(NOBODY)))
}

#[cfg(not(unix))]
fn deescalation_target() -> Option<(u32, u32)> {
    None
}

#[cfg(unix)]
fn restrict_child(cmd: &mut Command, policy: &SandboxPolicy, target: Option<(u32, u32)>) {
    let memory_limit = policy.max_memory_bytes;
    let isolate_network = !policy.allow_network && target.is_some();

    // SAFETY: the closure runs between fork and exec and only calls
    // async-signal-safe libc functions on captured integers.
    unsafe {
        cmd.pre_exec(move || {
            libc::setpgid(0, 0);

            if memory_limit > 0 {
                let limit = libc::rlimit {
                    rlim_cur: memory_limit as libc::rlim_t,
                    rlim_max: memory_limit as libc::rlim_t,
                };
                libc::setrlimit(libc::RLIMIT_AS, &limit);
            }

            if isolate_network {
                enter_network_namespace();
            }

            if let Some((uid, gid)) = target {
                libc::setgroups(0, std::ptr::null());
                if libc::setgid(gid) != 0 {
                    unsupported_id_or_fail()?;
                }
                if libc::setuid(uid) != 0 {
                    unsupported_id_or_fail()?;
                }
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn restrict_child(_cmd: &mut Command, _policy: &SandboxPolicy, _target: Option<(u32, u32)>) {}

/// An id the kernel cannot map (EINVAL) means the platform cannot drop to
/// it; any other failure aborts the spawn.
#[cfg(unix)]
fn unsupported_id_or_fail() -> std::io::Result<()> {
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EINVAL) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(target_os = "linux")]
fn enter_network_namespace() {
    // SAFETY: unshare(2) only affects the calling (child) process. Failure
    // leaves the child in the parent's namespace.
    unsafe {
        libc::unshare(libc::CLONE_NEWNET);
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn enter_network_namespace() {}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn reason(result: Result<(), SandboxError>) -> String {
        match result {
            Err(SandboxError::Rejected { reason }) => reason,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_deny_list() {
        assert!(reason(validate_command("rm", &args(&["file"]))).contains("'rm' is disallowed"));
        assert!(reason(validate_command("/usr/bin/dd", &args(&["if=/dev/zero"]))).contains("'dd'"));
        assert!(reason(validate_command("mkfs.ext4", &args(&["/dev/sdb1"]))).contains("'mkfs'"));
    }

    #[test]
    fn test_device_write_is_dangerous() {
        let r = reason(validate_command("sh", &args(&["-c", "echo boom > /dev/sda"])));
        assert!(r.starts_with("Dangerous pattern detected"));
        assert!(r.contains("/dev/sda"));

        let r = reason(validate_command("tee", &args(&["/dev/sda"])));
        assert!(r.starts_with("Dangerous pattern detected"));
    }

    #[test]
    fn test_null_device_is_fine() {
        assert!(validate_command("sh", &args(&["-c", "echo hi > /dev/null"])).is_ok());
    }

    #[test]
    fn test_shell_script_segments_are_checked() {
        let r = reason(validate_command("bash", &args(&["-c", "cd /tmp && rm -r cache"])));
        assert!(r.contains("'rm' is disallowed"));
        let r = reason(validate_command("sh", &args(&["-c", "FOO=1 chmod 777 x"])));
        assert!(r.contains("'chmod'"));
        let r = reason(validate_command("bash", &args(&["-lc", "rm cache"])));
        assert!(r.contains("'rm'"));
    }

    #[test]
    fn test_wrapped_programs_are_checked() {
        assert!(reason(validate_command("env", &args(&["rm", "-r", "/tmp/x"]))).contains("'rm'"));
        assert!(reason(validate_command("env", &args(&["-i", "A=1", "rm", "x"]))).contains("'rm'"));
        assert!(reason(validate_command("sudo", &args(&["chmod", "-R", "777", "/home"]))).contains("'chmod'"));
        assert!(reason(validate_command("sudo", &args(&["-n", "-u", "root", "chown", "me", "x"]))).contains("'chown'"));
        assert!(reason(validate_command("nice", &args(&["-n", "10", "shred", "f"]))).contains("'shred'"));
        assert!(reason(validate_command("timeout", &args(&["-s", "KILL", "5", "rm", "x"]))).contains("'rm'"));
        assert!(reason(validate_command("xargs", &args(&["-0", "rm", "-r"]))).contains("'rm'"));
        assert!(reason(validate_command("sudo", &args(&["env", "nohup", "dd", "if=x"]))).contains("'dd'"));
        assert!(reason(validate_command("sh", &args(&["-c", "ls | xargs rm"]))).contains("'rm'"));
        assert!(reason(validate_command("find", &args(&["/tmp", "-exec", "rm", "{}", ";"]))).contains("'rm'"));
    }

    #[test]
    fn test_wrapped_safe_programs_pass() {
        assert!(validate_command("sudo", &args(&["-n", "nix-env", "-iA", "nixpkgs.firefox"])).is_ok());
        assert!(validate_command("sudo", &args(&["-n", "nixos-rebuild", "switch"])).is_ok());
        assert!(validate_command("timeout", &args(&["5", "rmdir", "x"])).is_ok());
        assert!(validate_command("env", &args(&["LANG=C", "ls"])).is_ok());
        assert!(validate_command("find", &args(&["/tmp", "-name", "x"])).is_ok());
    }

    #[test]
    fn test_any_block_device_argument_is_dangerous() {
        let r = reason(validate_command("cp", &args(&["img", "/dev/sda"])));
        assert!(r.contains("/dev/sda"));
        let r = reason(validate_command("sh", &args(&["-c", "cat img >/dev/nvme0n1"])));
        assert!(r.contains("/dev/nvme0n1"));
        assert!(validate_command("head", &args(&["-c", "16", "/dev/urandom"])).is_ok());
    }

    #[test]
    fn test_find_delete_from_root() {
        let r = reason(validate_command("find", &args(&["/", "-delete"])));
        assert!(r.contains("filesystem root"));
        let r = reason(validate_command("find", &args(&["/", "-name", "*.log", "-delete"])));
        assert!(r.contains("filesystem root"));
        assert!(validate_command("find", &args(&["/tmp/cache", "-delete"])).is_ok());
    }

    #[test]
    fn test_fork_bomb_and_root_wildcard() {
        let r = reason(validate_command("bash", &args(&["-c", ":(){ :|:& };:"])));
        assert!(r.contains("fork bomb"));
        let r = reason(validate_command("ls", &args(&["/*"])));
        assert!(r.contains("filesystem root"));
    }

    #[test]
    fn test_force_recursive_pattern() {
        let r = reason(validate_command("xargs", &args(&["rm", "-rf", "build"])));
        assert!(r.contains("disallowed") || r.contains("force-recursive"));
        let r = reason(validate_command("find", &args(&[".", "-exec", "rm", "-fr", "{}"])));
        assert!(r.contains("force-recursive"));
    }

    #[test]
    fn test_ordinary_commands_pass() {
        assert!(validate_command("nix-env", &args(&["-iA", "nixpkgs.firefox"])).is_ok());
        assert!(validate_command("ls", &args(&["/"])).is_ok());
        assert!(validate_command("df", &args(&["-h"])).is_ok());
    }

    #[test]
    fn test_policy_defaults_and_validation() {
        let policy = SandboxPolicy::default();
        assert_eq!(policy.max_execution_time_ms, 30_000);
        assert_eq!(policy.max_output_bytes, 10 * 1024 * 1024);
        assert!(!policy.allow_network);
        assert!(!policy.allow_file_write);
        assert!(policy.validate().is_ok());

        let broken = SandboxPolicy {
            max_execution_time_ms: 0,
            ..SandboxPolicy::default()
        };
        assert!(matches!(broken.validate(), Err(SandboxError::InvalidPolicy(_))));
    }

    #[test]
    fn test_policy_from_partial_yaml() {
        let policy: SandboxPolicy = serde_yaml::from_str("max_execution_time_ms: 500\nallow_network: true\n").unwrap();
        assert_eq!(policy.max_execution_time_ms, 500);
        assert!(policy.allow_network);
        assert_eq!(policy.max_output_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_output_buffer_marks_once() {
        let mut buf = OutputBuffer::new(10);
        buf.push(Stream::Stdout, b"12345678");
        buf.push(Stream::Stderr, b"abcdef");
        buf.push(Stream::Stdout, b"more");
        buf.push(Stream::Stderr, b"more");

        assert!(buf.truncated);
        assert_eq!(buf.stdout, b"12345678");
        assert_eq!(buf.stderr, [b"ab".as_slice(), TRUNCATION_MARKER.as_bytes()].concat());
    }

    #[test]
    fn test_environment_is_minimal() {
        let policy = SandboxPolicy::default();
        let env = sandbox_environment(&policy, Path::new("/tmp/box"));
        let get = |k: &str| env.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());

        assert_eq!(get("HOME"), Some("/tmp/box"));
        assert_eq!(get("DEBIAN_FRONTEND"), Some("noninteractive"));
        assert_eq!(get("https_proxy"), Some(DISCARD_PROXY));
        assert!(get("USER").is_none());

        let open = SandboxPolicy {
            allow_network: true,
            ..SandboxPolicy::default()
        };
        let env = sandbox_environment(&open, Path::new("/tmp/box"));
        assert!(env.iter().all(|(k, _)| k != "https_proxy"));
    }

    #[tokio::test]
    async fn test_rejected_command_never_spawns() {
        let sandbox = CommandSandbox::new();
        let err = sandbox
            .execute("rm", &args(&["-rf", "/tmp/x"]), &SandboxPolicy::default())
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(sandbox.spawn_count(), 0);
    }
}
