//! Pluggable units of stress work.
//!
//! A `Workload` runs for a requested duration against the target and produces
//! one `Metric`. The scheduler and scorer only see this trait; stress kernels
//! (prime search, GEMM, pattern fill, video encode) are either shell commands
//! (`CommandWorkload`) or closures (`FnWorkload`).

pub mod command;

pub use command::{CommandWorkload, MetricParser};

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::HarnessConfig;
use crate::error::{ConfigError, Result};
use crate::models::Metric;
use crate::target::{CancelRx, RemoteExecutor};

/// Everything a single workload invocation needs.
#[derive(Clone)]
pub struct WorkloadContext {
    pub executor: Arc<dyn RemoteExecutor>,
    pub phase: String,
    /// Index of this copy when a workload runs several instances
    pub instance: u32,
    /// Requested run time
    pub duration: Duration,
    /// Hard deadline after which the scheduler cancels the run
    pub deadline: Instant,
    pub cancel: CancelRx,
}

impl WorkloadContext {
    /// Time left before the hard deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

pub trait Workload: Send + Sync {
    fn name(&self) -> &str;

    /// Expected metric value; `None` for pure pass/fail workloads.
    fn baseline(&self) -> Option<f64> {
        None
    }

    fn run(&self, ctx: WorkloadContext) -> BoxFuture<'static, Result<Metric>>;
}

type RunFn = dyn Fn(WorkloadContext) -> BoxFuture<'static, Result<Metric>> + Send + Sync;

/// Closure-backed workload.
pub struct FnWorkload {
    name: String,
    baseline: Option<f64>,
    run: Box<RunFn>,
}

impl FnWorkload {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(WorkloadContext) -> BoxFuture<'static, Result<Metric>> + Send + Sync + 'static,
    {
        FnWorkload {
            name: name.into(),
            baseline: None,
            run: Box::new(run),
        }
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = Some(baseline);
        self
    }
}

impl Workload for FnWorkload {
    fn name(&self) -> &str {
        &self.name
    }

    fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    fn run(&self, ctx: WorkloadContext) -> BoxFuture<'static, Result<Metric>> {
        (self.run)(ctx)
    }
}

/// Phase name to the workloads that run in it.
#[derive(Clone, Default)]
pub struct WorkloadRegistry {
    phases: BTreeMap<String, Vec<Arc<dyn Workload>>>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, phase: impl Into<String>, workload: Arc<dyn Workload>) {
        self.phases.entry(phase.into()).or_default().push(workload);
    }

    pub fn with(mut self, phase: impl Into<String>, workload: Arc<dyn Workload>) -> Self {
        self.register(phase, workload);
        self
    }

    /// Workloads for `phase`, in registration order.
    pub fn workloads(&self, phase: &str) -> Vec<Arc<dyn Workload>> {
        self.phases.get(phase).cloned().unwrap_or_default()
    }

    pub fn phase_names(&self) -> impl Iterator<Item = &str> {
        self.phases.keys().map(String::as_str)
    }

    /// One `CommandWorkload` per configured instance.
    pub fn from_config(config: &HarnessConfig) -> std::result::Result<Self, ConfigError> {
        let mut registry = WorkloadRegistry::new();
        for phase in &config.phases {
            for workload in &phase.workloads {
                for instance in 0..workload.instances {
                    let cmd = CommandWorkload::from_config(workload, instance)?;
                    registry.register(phase.name.clone(), Arc::new(cmd));
                }
            }
        }
        Ok(registry)
    }
}
