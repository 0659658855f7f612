//! Workloads defined by a shell command run on the target.

use futures::future::BoxFuture;
use regex::Regex;
use std::collections::HashMap;

use super::{Workload, WorkloadContext};
use crate::config::{MetricKind, ParserConfig, WorkloadConfig};
use crate::error::{ConfigError, ExecError, HarnessError, Result};
use crate::models::Metric;
use crate::target::CommandOutput;

/// Turns command output into a `Metric`.
#[derive(Clone, Debug)]
pub enum MetricParser {
    ExitStatus,
    Pattern {
        regex: Regex,
        kind: MetricKind,
        unit: String,
    },
    KeyValue {
        result_key: String,
        pass_value: String,
        value_key: Option<String>,
        unit: String,
    },
}

impl MetricParser {
    pub fn from_config(config: &ParserConfig) -> std::result::Result<Self, ConfigError> {
        Ok(match config {
            ParserConfig::ExitStatus => MetricParser::ExitStatus,
            ParserConfig::Pattern {
                pattern,
                metric,
                unit,
            } => MetricParser::Pattern {
                regex: Regex::new(pattern).map_err(|e| {
                    ConfigError::ValidationFailed(format!("Invalid metric pattern '{}': {}", pattern, e))
                })?,
                kind: *metric,
                unit: unit.clone(),
            },
            ParserConfig::KeyValue {
                result_key,
                pass_value,
                value_key,
                unit,
            } => MetricParser::KeyValue {
                result_key: result_key.clone(),
                pass_value: pass_value.clone(),
                value_key: value_key.clone(),
                unit: unit.clone(),
            },
        })
    }

    /// `Err(reason)` when the output does not satisfy the parser.
    pub fn parse(&self, output: &CommandOutput) -> std::result::Result<Metric, String> {
        match self {
            MetricParser::ExitStatus => Ok(Metric::success(output.success())),
            MetricParser::Pattern { regex, kind, unit } => {
                if !output.success() {
                    return Err(exit_reason(output));
                }
                let caps = regex
                    .captures(&output.stdout)
                    .ok_or_else(|| format!("no match for /{}/ in output", regex.as_str()))?;
                let raw = caps
                    .get(1)
                    .map(|m| m.as_str())
                    .ok_or_else(|| "pattern has no capture group".to_string())?;
                match kind {
                    MetricKind::Counter => raw
                        .parse::<u64>()
                        .map(|v| Metric::counter(v, unit.clone()))
                        .map_err(|_| format!("'{}' is not a count", raw)),
                    MetricKind::Rate => raw
                        .parse::<f64>()
                        .map(|v| Metric::rate(v, unit.clone()))
                        .map_err(|_| format!("'{}' is not a number", raw)),
                }
            }
            MetricParser::KeyValue {
                result_key,
                pass_value,
                value_key,
                unit,
            } => {
                let values = parse_key_values(&output.stdout);
                let result = values
                    .get(result_key.as_str())
                    .ok_or_else(|| format!("{} missing from output ({})", result_key, exit_reason(output)))?;
                let detail = value_key
                    .as_deref()
                    .and_then(|key| values.get(key).map(|v| format!(" ({}={})", key, v)))
                    .unwrap_or_default();
                if *result != pass_value.as_str() {
                    return Err(format!("{}={}{}", result_key, result, detail));
                }
                match value_key.as_deref().and_then(|key| values.get(key)) {
                    Some(raw) => raw
                        .parse::<u64>()
                        .map(|v| Metric::counter(v, unit.clone()))
                        .map_err(|_| format!("'{}' is not a count", raw)),
                    None => Ok(Metric::success(true)),
                }
            }
        }
    }
}

fn exit_reason(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("exit status {}", output.exit_code)
    } else {
        format!("exit status {}: {}", output.exit_code, stderr)
    }
}

/// `KEY=VALUE` lines; blank lines and `#` comments are skipped.
fn parse_key_values(text: &str) -> HashMap<&str, &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

pub struct CommandWorkload {
    name: String,
    template: String,
    parser: MetricParser,
    baseline: Option<f64>,
    instance: u32,
}

impl CommandWorkload {
    pub fn new(name: impl Into<String>, template: impl Into<String>, parser: MetricParser) -> Self {
        CommandWorkload {
            name: name.into(),
            template: template.into(),
            parser,
            baseline: None,
            instance: 0,
        }
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Build instance `instance` of a configured workload. Multi-instance
    /// workloads get `#<instance>` appended to their name.
    pub fn from_config(
        config: &WorkloadConfig,
        instance: u32,
    ) -> std::result::Result<Self, ConfigError> {
        let name = if config.instances > 1 {
            format!("{}#{}", config.name, instance)
        } else {
            config.name.clone()
        };
        Ok(CommandWorkload {
            name,
            template: config.command.clone(),
            parser: MetricParser::from_config(&config.parser)?,
            baseline: config.baseline,
            instance,
        })
    }

    /// Substitute `{duration}` (whole seconds, at least 1) and `{instance}`.
    pub fn render(&self, ctx: &WorkloadContext) -> String {
        let secs = ctx.duration.as_secs().max(1);
        self.template
            .replace("{duration}", &secs.to_string())
            .replace("{instance}", &ctx.instance.to_string())
    }
}

impl Workload for CommandWorkload {
    fn name(&self) -> &str {
        &self.name
    }

    fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    fn run(&self, mut ctx: WorkloadContext) -> BoxFuture<'static, Result<Metric>> {
        ctx.instance = self.instance;
        let command = self.render(&ctx);
        let name = self.name.clone();
        let parser = self.parser.clone();
        Box::pin(async move {
            log::debug!("[Workload] {} ({}): {}", name, ctx.phase, command);
            let timeout = ctx.remaining();
            let output = match ctx.executor.execute(&command, timeout, ctx.cancel.clone()).await {
                Ok(output) => output,
                // the scheduler's deadline is the allotment, not the transport timeout
                Err(ExecError::Timeout(_)) => {
                    return Err(HarnessError::WorkloadTimeout {
                        workload: name,
                        allotted: ctx.duration,
                    })
                }
                Err(e) => return Err(HarnessError::from_exec(&name, e)),
            };
            parser
                .parse(&output)
                .map_err(|reason| HarnessError::WorkloadFailure { workload: name, reason })
        })
    }
}
