//! Process-backed executor.
//!
//! Without a prefix commands run locally through `sh -c`. With a prefix such
//! as `["ssh", "-o", "BatchMode=yes", "root@dut"]` the command string is
//! appended as the final argument, so the same code drives a remote target.

use futures::future::BoxFuture;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::{never_cancel, wait_cancelled, CancelRx, CommandOutput, LineSink, RemoteExecutor};
use crate::config::TargetConfig;
use crate::error::ExecError;

/// How long a terminated process group gets before it is killed outright.
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// ssh reserves 255 for its own failures.
const TRANSPORT_EXIT_CODE: i32 = 255;

static TRANSPORT_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(connection refused|connection timed out|connection reset|connection closed|no route to host|could not resolve hostname|network is unreachable|host key verification failed|permission denied \(publickey)",
    )
    .expect("Invalid transport error regex")
});

#[derive(Clone, Debug)]
pub struct ShellExecutor {
    prefix: Vec<String>,
    kill_grace: Duration,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::local()
    }
}

impl ShellExecutor {
    pub fn local() -> Self {
        ShellExecutor {
            prefix: Vec::new(),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_prefix(prefix: Vec<String>) -> Self {
        ShellExecutor {
            prefix,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn from_target(target: &TargetConfig) -> Self {
        Self::with_prefix(target.command_prefix.clone())
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn is_remote(&self) -> bool {
        !self.prefix.is_empty()
    }

    fn build_command(&self, command: &str) -> Command {
        let mut cmd = match self.prefix.split_first() {
            Some((program, args)) => {
                let mut cmd = Command::new(program);
                cmd.args(args).arg(command);
                cmd
            }
            None => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                cmd
            }
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            // own process group so termination reaches every descendant
            .process_group(0);
        cmd
    }

    /// SIGTERM the process group, then SIGKILL if it outlives the grace period.
    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
                        log::debug!("[Exec] process group {} exited after SIGTERM", pid);
                        return;
                    }
                    log::warn!("[Exec] process group {} ignored SIGTERM, killing", pid);
                }
                Err(e) => log::debug!("[Exec] SIGTERM to {} failed: {}", pid, e),
            }
        }
        let _ = child.kill().await;
    }

    fn classify(&self, output: CommandOutput) -> Result<CommandOutput, ExecError> {
        if self.is_remote()
            && output.exit_code != 0
            && (output.exit_code == TRANSPORT_EXIT_CODE || TRANSPORT_ERROR_RE.is_match(&output.stderr))
        {
            return Err(ExecError::Connectivity(
                output.stderr.trim().lines().last().unwrap_or("transport failure").to_string(),
            ));
        }
        Ok(output)
    }

    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        mut cancel: CancelRx,
        on_line: LineSink<'_>,
    ) -> Result<CommandOutput, ExecError> {
        let mut child = self.build_command(command).spawn().map_err(|e| {
            if self.is_remote() {
                ExecError::Connectivity(format!("failed to launch {}: {}", self.prefix[0], e))
            } else {
                ExecError::Io(format!("failed to spawn sh: {}", e))
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Io("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Io("Failed to capture stderr".to_string()))?;
        // partial lines stay in the buffers across select iterations
        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();

        let mut out = String::new();
        let mut err = String::new();
        let mut stdout_closed = false;
        let mut stderr_closed = false;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let interrupted = loop {
            if stdout_closed && stderr_closed {
                break None;
            }
            tokio::select! {
                read = stdout.read_until(b'\n', &mut out_buf), if !stdout_closed => match read {
                    Ok(0) if out_buf.is_empty() => stdout_closed = true,
                    Ok(_) => {
                        let line = take_line(&mut out_buf);
                        on_line(&line);
                        out.push_str(&line);
                        out.push('\n');
                    }
                    Err(e) => {
                        log::warn!("[Exec] stdout read failed: {}", e);
                        stdout_closed = true;
                    }
                },
                read = stderr.read_until(b'\n', &mut err_buf), if !stderr_closed => match read {
                    Ok(0) if err_buf.is_empty() => stderr_closed = true,
                    Ok(_) => {
                        err.push_str(&take_line(&mut err_buf));
                        err.push('\n');
                    }
                    Err(e) => {
                        log::warn!("[Exec] stderr read failed: {}", e);
                        stderr_closed = true;
                    }
                },
                _ = &mut deadline => break Some(ExecError::Timeout(timeout)),
                _ = wait_cancelled(&mut cancel) => break Some(ExecError::Cancelled),
            }
        };

        let status = match interrupted {
            Some(e) => {
                self.terminate(&mut child).await;
                return Err(e);
            }
            None => tokio::select! {
                status = child.wait() => status?,
                _ = &mut deadline => {
                    self.terminate(&mut child).await;
                    return Err(ExecError::Timeout(timeout));
                }
                _ = wait_cancelled(&mut cancel) => {
                    self.terminate(&mut child).await;
                    return Err(ExecError::Cancelled);
                }
            },
        };

        self.classify(CommandOutput {
            stdout: out,
            stderr: err,
            // killed by a signal
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

/// Drain one buffered line, without its terminator, replacing invalid UTF-8.
fn take_line(buf: &mut Vec<u8>) -> String {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    line
}

impl RemoteExecutor for ShellExecutor {
    fn execute_streaming<'a>(
        &'a self,
        command: &'a str,
        timeout: Duration,
        cancel: CancelRx,
        on_line: LineSink<'a>,
    ) -> BoxFuture<'a, Result<CommandOutput, ExecError>> {
        Box::pin(self.run(command, timeout, cancel, on_line))
    }

    fn check_connectivity(&self, timeout: Duration) -> BoxFuture<'_, Result<(), ExecError>> {
        Box::pin(async move {
            match self.run("true", timeout, never_cancel(), &|_: &str| {}).await {
                Ok(output) if output.success() => Ok(()),
                Ok(output) => Err(ExecError::Connectivity(format!(
                    "probe command exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ))),
                Err(ExecError::Timeout(t)) => Err(ExecError::Connectivity(format!(
                    "no answer within {:?}",
                    t
                ))),
                Err(ExecError::Connectivity(msg)) => Err(ExecError::Connectivity(msg)),
                Err(e) => Err(ExecError::Connectivity(e.to_string())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let exec = ShellExecutor::local();
        let out = exec
            .execute("echo hello; echo oops >&2; exit 3", Duration::from_secs(5), never_cancel())
            .await
            .unwrap();
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn test_streaming_delivers_each_line() {
        let exec = ShellExecutor::local();
        let seen = Mutex::new(Vec::new());
        let sink = |line: &str| seen.lock().unwrap().push(line.to_string());
        exec.execute_streaming("printf 'a\\nb\\nc\\n'", Duration::from_secs(5), never_cancel(), &sink)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_stdout() {
        // a binary byte, then more than a pipe buffer, then the metric line
        let exec = ShellExecutor::local();
        let out = exec
            .execute(
                "printf '\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; echo; echo ops=5",
                Duration::from_secs(10),
                never_cancel(),
            )
            .await
            .expect("command should finish, not time out");
        assert!(out.success());
        assert!(out.stdout.starts_with('\u{FFFD}'));
        assert_eq!(out.stdout.lines().last(), Some("ops=5"));
        assert!(out.stdout.len() > 300000);
    }

    #[test]
    fn test_take_line_strips_terminators() {
        let mut buf = b"temp_c=50\r\n".to_vec();
        assert_eq!(take_line(&mut buf), "temp_c=50");
        assert!(buf.is_empty());

        let mut partial = b"no newline".to_vec();
        assert_eq!(take_line(&mut partial), "no newline");
    }

    #[tokio::test]
    async fn test_timeout_terminates_command() {
        let exec = ShellExecutor::local().kill_grace(Duration::from_millis(200));
        let start = std::time::Instant::now();
        let res = exec
            .execute("sleep 30", Duration::from_millis(200), never_cancel())
            .await;
        assert_eq!(res, Err(ExecError::Timeout(Duration::from_millis(200))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_terminates_command() {
        let exec = ShellExecutor::local();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            exec.execute("sleep 30", Duration::from_secs(60), rx).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let res = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res, Err(ExecError::Cancelled));
    }

    #[tokio::test]
    async fn test_local_connectivity() {
        assert!(ShellExecutor::local()
            .check_connectivity(Duration::from_secs(5))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_prefix_transport_failure_is_connectivity() {
        // stand-in for ssh: a prefix whose last argument is the command
        let exec = ShellExecutor::with_prefix(vec![
            "sh".into(),
            "-c".into(),
            "echo 'ssh: connect to host dut port 22: Connection refused' >&2; exit 255".into(),
        ]);
        let res = exec.execute("uptime", Duration::from_secs(5), never_cancel()).await;
        assert!(matches!(res, Err(ExecError::Connectivity(msg)) if msg.contains("Connection refused")));
    }

    #[tokio::test]
    async fn test_missing_prefix_binary_is_connectivity() {
        let exec = ShellExecutor::with_prefix(vec!["/nonexistent/ssh-binary".into()]);
        let res = exec.check_connectivity(Duration::from_secs(2)).await;
        assert!(matches!(res, Err(ExecError::Connectivity(_))));
    }
}
