//! Spawning and terminating supervised subprocesses.
//!
//! Children are placed in their own session (unix) or process group
//! (Windows) at spawn time, so shell-wrapped commands like
//! `npm install && npm run dev` can be torn down as a whole tree: graceful
//! signal, bounded wait, then a forceful kill of the group.

use std::net::TcpListener;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// How long a terminated process gets to exit before the forceful kill.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A supervised subprocess with its assigned port.
#[derive(Debug)]
pub struct DevProcess {
    pub child: Child,
    pub pid: Option<u32>,
    pub port: u16,
}

/// Piped output streams taken from a freshly spawned child, consumed by the
/// log pump.
#[derive(Debug)]
pub struct ChildOutput {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

impl DevProcess {
    /// Whether the child is still alive (without reaping it on error paths).
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Terminate the whole process tree: graceful signal to the group,
    /// bounded wait, forceful kill on timeout.
    pub async fn shutdown(&mut self) -> Result<()> {
        terminate_tree(&mut self.child, STOP_TIMEOUT).await
    }
}

/// True when `command` needs a shell to interpret it.
fn needs_shell(command: &str) -> bool {
    command.contains("&&") || command.contains('|') || command.contains(';')
}

/// Build the command for a dev server: shell-wrapped when it contains shell
/// operators, plain argv otherwise; own process group either way.
fn build_command(dev_cmd: &str, cwd: &Path, port: u16) -> Result<Command> {
    let mut cmd = if needs_shell(dev_cmd) {
        #[cfg(unix)]
        {
            let mut c = Command::new("sh");
            c.arg("-c").arg(dev_cmd);
            c
        }
        #[cfg(windows)]
        {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(dev_cmd);
            c
        }
    } else {
        let mut parts = dev_cmd.split_whitespace();
        let program = parts
            .next()
            .context("dev command is empty")?;
        let mut c = Command::new(program);
        c.args(parts);
        c
    };

    cmd.current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("PORT", port.to_string())
        .env("VITE_PORT", port.to_string())
        .env("FORCE_COLOR", "1")
        .env("BROWSER", "none")
        .env("NPM_CONFIG_PROGRESS", "false")
        .env("npm_config_progress", "false")
        .env("NPM_CONFIG_FUND", "false")
        .env("npm_config_fund", "false");

    set_process_group(&mut cmd);
    Ok(cmd)
}

/// Spawn the dev command with its output piped.
pub fn spawn_dev(dev_cmd: &str, cwd: &Path, port: u16) -> Result<(DevProcess, ChildOutput)> {
    let mut cmd = build_command(dev_cmd, cwd, port)?;
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn `{dev_cmd}`"))?;

    let stdout = child.stdout.take().context("child stdout not piped")?;
    let stderr = child.stderr.take().context("child stderr not piped")?;
    let pid = child.id();

    Ok((
        DevProcess { child, pid, port },
        ChildOutput { stdout, stderr },
    ))
}

/// Spawn an arbitrary argv in its own process group with piped output
/// (used by the workspace setup pipeline for the fetch command).
pub fn spawn_grouped(program: &str, args: &[&str], cwd: &Path) -> Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_ASKPASS", "echo");
    set_process_group(&mut cmd);
    cmd.spawn()
        .with_context(|| format!("failed to spawn `{program}`"))
}

#[cfg(unix)]
fn set_process_group(cmd: &mut Command) {
    // New session -> new process group, so signaling -pid reaches the tree.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(windows)]
fn set_process_group(cmd: &mut Command) {
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

/// Terminate `child` and everything it spawned.
///
/// Unix: SIGTERM to the process group, bounded wait, SIGKILL to the group on
/// timeout. Windows: `taskkill /T /F` on the PID, which fells the whole tree.
pub async fn terminate_tree(child: &mut Child, timeout: Duration) -> Result<()> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGTERM);
            }
        }
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                status.context("waiting for terminated child")?;
            }
            Err(_) => {
                if let Some(pid) = child.id() {
                    unsafe {
                        libc::kill(-(pid as i32), libc::SIGKILL);
                    }
                }
                child.wait().await.context("waiting for killed child")?;
            }
        }
    }

    #[cfg(windows)]
    {
        if let Some(pid) = child.id() {
            let _ = Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T", "/F"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }
        if tokio::time::timeout(timeout, child.wait()).await.is_err() {
            let _ = child.kill().await;
            child.wait().await.context("waiting for killed child")?;
        }
    }

    Ok(())
}

/// Probe-bind `port` on localhost.
pub fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Find a free port in `[start, end)` by probe-binding.
pub fn alloc_port((start, end): (u16, u16)) -> Option<u16> {
    (start..end).find(|p| port_is_free(*p))
}
