//! Deterministic executor for tests and dry runs.
//!
//! Rules are matched in insertion order by command substring. Each rule holds
//! a queue of responses; the last one repeats once the queue is drained, so a
//! telemetry probe can be scripted as "these five readings, then this one
//! forever". Every invocation is recorded for later inspection.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{wait_cancelled, CancelRx, CommandOutput, LineSink, RemoteExecutor};
use crate::error::ExecError;

#[derive(Clone, Debug, PartialEq)]
pub enum ScriptedResponse {
    /// Completes with the given stdout and exit code
    Output { stdout: String, exit_code: i32 },
    /// Completes with a non-zero exit and stderr text
    Fail { exit_code: i32, stderr: String },
    /// Transport failure
    Unreachable(String),
    /// Never completes; resolves only through timeout or cancellation
    Hang,
    /// Takes `delay` of (tokio) time, then behaves like the inner response
    Delayed(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    pub fn output(stdout: impl Into<String>) -> Self {
        ScriptedResponse::Output {
            stdout: stdout.into(),
            exit_code: 0,
        }
    }

    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        ScriptedResponse::Fail {
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn after(self, delay: Duration) -> Self {
        ScriptedResponse::Delayed(delay, Box::new(self))
    }
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    responses: Vec<ScriptedResponse>,
    served: usize,
}

impl Rule {
    fn next_response(&mut self) -> ScriptedResponse {
        let idx = self.served.min(self.responses.len().saturating_sub(1));
        self.served += 1;
        self.responses
            .get(idx)
            .cloned()
            .unwrap_or_else(|| ScriptedResponse::output(""))
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    rules: Vec<Rule>,
    invocations: Vec<String>,
    unreachable: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ScriptedExecutor {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer commands containing `pattern` with `response`.
    pub fn on(self, pattern: impl Into<String>, response: ScriptedResponse) -> Self {
        self.on_sequence(pattern, vec![response])
    }

    /// Answer successive matching commands with `responses` in order.
    pub fn on_sequence(self, pattern: impl Into<String>, responses: Vec<ScriptedResponse>) -> Self {
        self.lock().rules.push(Rule {
            pattern: pattern.into(),
            responses,
            served: 0,
        });
        self
    }

    /// Make the target unreachable (or reachable again).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    pub fn unreachable(self) -> Self {
        self.set_unreachable(true);
        self
    }

    pub fn invocations(&self) -> Vec<String> {
        self.lock().invocations.clone()
    }

    pub fn invocation_count(&self, pattern: &str) -> usize {
        self.lock()
            .invocations
            .iter()
            .filter(|cmd| cmd.contains(pattern))
            .count()
    }

    fn respond_to(&self, command: &str) -> ScriptedResponse {
        let mut state = self.lock();
        state.invocations.push(command.to_string());
        if state.unreachable {
            return ScriptedResponse::Unreachable("target unreachable".to_string());
        }
        state
            .rules
            .iter_mut()
            .find(|rule| command.contains(&rule.pattern))
            .map(Rule::next_response)
            .unwrap_or_else(|| ScriptedResponse::output(""))
    }
}

async fn resolve(
    response: ScriptedResponse,
    timeout: Duration,
    mut cancel: CancelRx,
    on_line: LineSink<'_>,
) -> Result<CommandOutput, ExecError> {
    let (delay, response) = match response {
        ScriptedResponse::Delayed(delay, inner) => (Some(delay), *inner),
        ScriptedResponse::Hang => (None, ScriptedResponse::Hang),
        other => (Some(Duration::ZERO), other),
    };

    if delay != Some(Duration::ZERO) {
        let wait = async {
            match delay {
                Some(d) => tokio::time::sleep(d).await,
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = wait => {}
            _ = tokio::time::sleep(timeout) => return Err(ExecError::Timeout(timeout)),
            _ = wait_cancelled(&mut cancel) => return Err(ExecError::Cancelled),
        }
    }

    match response {
        ScriptedResponse::Output { stdout, exit_code } => {
            for line in stdout.lines() {
                on_line(line);
            }
            Ok(CommandOutput {
                stdout,
                stderr: String::new(),
                exit_code,
            })
        }
        ScriptedResponse::Fail { exit_code, stderr } => Ok(CommandOutput {
            stdout: String::new(),
            stderr,
            exit_code,
        }),
        ScriptedResponse::Unreachable(msg) => Err(ExecError::Connectivity(msg)),
        // nested delays collapse into the outer one
        ScriptedResponse::Hang | ScriptedResponse::Delayed(..) => {
            futures::future::pending::<()>().await;
            Err(ExecError::Cancelled)
        }
    }
}

impl RemoteExecutor for ScriptedExecutor {
    fn execute_streaming<'a>(
        &'a self,
        command: &'a str,
        timeout: Duration,
        cancel: CancelRx,
        on_line: LineSink<'a>,
    ) -> BoxFuture<'a, Result<CommandOutput, ExecError>> {
        let response = self.respond_to(command);
        Box::pin(resolve(response, timeout, cancel, on_line))
    }

    fn check_connectivity(&self, _timeout: Duration) -> BoxFuture<'_, Result<(), ExecError>> {
        let unreachable = self.lock().unreachable;
        Box::pin(async move {
            if unreachable {
                Err(ExecError::Connectivity("target unreachable".to_string()))
            } else {
                Ok(())
            }
        })
    }
}
