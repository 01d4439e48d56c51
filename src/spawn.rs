//! Detached adapter process spawning.
//!
//! Adapters are spawned with all three stdio streams piped and `setsid()`
//! called between fork and exec, so the child starts its own session with
//! no controlling terminal.  A debug adapter sharing the proxy's
//! controlling terminal can call `tcsetpgrp` and steal foreground, which
//! delivers SIGTTIN to the proxy's parent; the new session makes that
//! impossible.
//!
//! Teardown signals the whole process group (the adapter plus anything it
//! spawned) with SIGTERM, then SIGKILLs the adapter pid itself.

use std::process::Stdio;

use log::{debug, warn};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::errors::DebugError;

/// A spawned adapter: pid plus owned stdio handles.
///
/// The stdout/stderr handles are `Option` so callers can move them into
/// readers; the process itself stays owned here so [`DetachedProcess::kill`]
/// can tear the group down.
#[derive(Debug)]
pub struct DetachedProcess {
    pid: u32,
    child: Option<Child>,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

impl DetachedProcess {
    /// Spawns `command args...` fully detached from the controlling
    /// terminal, with stdin/stdout/stderr piped back to the proxy.
    pub fn spawn(command: &str, args: &[String]) -> Result<Self, DebugError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // SAFETY: setsid() is async-signal-safe and called between fork
        // and exec.  Failure means we are already a session leader, which
        // cannot happen for a freshly forked child.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|source| DebugError::SpawnFailed {
            command: command.to_string(),
            source,
        })?;

        let pid = child.id().ok_or_else(|| DebugError::SpawnFailed {
            command: command.to_string(),
            source: std::io::Error::other("child exited before its pid could be read"),
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        debug!("spawned adapter {command:?} as pid {pid}");

        Ok(Self {
            pid,
            child: Some(child),
            stdin,
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// SIGTERM to the process group, SIGKILL to the pid.  Idempotent:
    /// repeated calls are no-ops once the child handle is gone.
    pub fn kill(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        let pid = self.pid as libc::pid_t;
        // SAFETY: plain kill(2) calls on a pid we spawned.  The negated
        // pid addresses the session/process group created by setsid.
        unsafe {
            if libc::kill(-pid, libc::SIGTERM) != 0 {
                debug!(
                    "SIGTERM to adapter group {pid} failed: {}",
                    std::io::Error::last_os_error()
                );
            }
            if libc::kill(pid, libc::SIGKILL) != 0 {
                debug!(
                    "SIGKILL to adapter {pid} failed: {}",
                    std::io::Error::last_os_error()
                );
            }
        }

        // Let the runtime reap the child in the background; start_kill is
        // a no-op if the process is already gone.
        let _ = child.start_kill();
        drop(child);

        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
    }

    /// Reads whatever the adapter has buffered on stderr and logs it.
    /// Best-effort; used when a launch step fails to surface adapter
    /// diagnostics.
    pub async fn drain_stderr(&mut self) {
        let Some(stderr) = self.stderr.as_mut() else {
            return;
        };
        let mut buf = vec![0u8; 8 * 1024];
        match tokio::time::timeout(std::time::Duration::from_millis(200), stderr.read(&mut buf))
            .await
        {
            Ok(Ok(n)) if n > 0 => {
                warn!(
                    "adapter {} stderr: {}",
                    self.pid,
                    String::from_utf8_lossy(&buf[..n]).trim_end()
                );
            }
            _ => {}
        }
    }
}

impl Drop for DetachedProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_pipes_and_kill() {
        let mut proc = DetachedProcess::spawn("cat", &[]).unwrap();
        assert!(proc.pid() > 0);
        assert!(proc.stdin.is_some());
        assert!(proc.stdout.is_some());
        assert!(proc.stderr.is_some());

        proc.kill();
        // Killing twice must be safe.
        proc.kill();
        assert!(proc.stdin.is_none());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let err = DetachedProcess::spawn("/nonexistent/definitely-not-a-debugger", &[])
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, DebugError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_child_runs_in_its_own_session() {
        let proc = DetachedProcess::spawn("sleep", &["5".to_string()]).unwrap();

        // /proc/<pid>/stat, after the parenthesized comm field:
        // state ppid pgrp session ...
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", proc.pid())).unwrap();
        let after_comm = stat.rsplit_once(')').unwrap().1;
        let child_sid: i64 = after_comm
            .split_whitespace()
            .nth(3)
            .unwrap()
            .parse()
            .unwrap();

        // SAFETY: getsid(0) only queries the calling process.
        let own_sid = unsafe { libc::getsid(0) } as i64;
        assert_ne!(child_sid, own_sid);
    }
}
