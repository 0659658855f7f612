//! Remote execution boundary.
//!
//! The core never talks to the target directly; every workload command, probe
//! read and connectivity check goes through a `RemoteExecutor`. Calls are
//! bounded by a timeout and can be cancelled through a `watch` channel, and
//! the implementation is responsible for terminating whatever it started.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::ExecError;

pub mod scripted;
pub mod shell;

pub use scripted::{ScriptedExecutor, ScriptedResponse};
pub use shell::ShellExecutor;

/// Cancellation signal: the sender flips the value to `true`.
pub type CancelRx = watch::Receiver<bool>;

/// Callback invoked with every stdout line as it arrives.
pub type LineSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Captured result of a command that ran to completion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit status into `ExecError::CommandFailed`.
    pub fn into_result(self) -> Result<CommandOutput, ExecError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecError::CommandFailed {
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

pub trait RemoteExecutor: Send + Sync {
    /// Run `command`, forwarding each stdout line to `on_line` as it arrives.
    fn execute_streaming<'a>(
        &'a self,
        command: &'a str,
        timeout: Duration,
        cancel: CancelRx,
        on_line: LineSink<'a>,
    ) -> BoxFuture<'a, Result<CommandOutput, ExecError>>;

    /// Verify the target is reachable at all.
    fn check_connectivity(&self, timeout: Duration) -> BoxFuture<'_, Result<(), ExecError>>;

    /// Run `command` and capture its output.
    fn execute<'a>(
        &'a self,
        command: &'a str,
        timeout: Duration,
        cancel: CancelRx,
    ) -> BoxFuture<'a, Result<CommandOutput, ExecError>> {
        Box::pin(async move {
            let discard = |_: &str| {};
            self.execute_streaming(command, timeout, cancel, &discard)
                .await
        })
    }
}

/// A receiver that never signals cancellation.
pub fn never_cancel() -> CancelRx {
    watch::channel(false).1
}

/// Resolve once `cancel` has been set to `true`. A dropped sender means
/// nobody can cancel any more, so this then pends forever.
pub async fn wait_cancelled(cancel: &mut CancelRx) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}
