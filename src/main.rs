use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

use goatd_validator::config::loader::load_or_default;
use goatd_validator::{
    log_parsed, LogCollector, PhaseScheduler, Session, ShellExecutor, WorkloadRegistry,
};

async fn run(log_collector: &LogCollector) -> anyhow::Result<i32> {
    // a single positional argument: the config file
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_or_default(config_path.as_deref()).context("Failed to load configuration")?;

    let registry = WorkloadRegistry::from_config(&config).context("Invalid workload table")?;
    let session = Session::from_config(&config, &registry).context("Invalid session")?;
    let executor = Arc::new(ShellExecutor::from_target(&config.target));

    if executor.is_remote() {
        log_parsed!(
            "[Main] Validating {} via `{}`",
            config.target.address,
            config.target.command_prefix.join(" ")
        );
    } else {
        log_parsed!("[Main] Validating {} locally", config.target.address);
    }

    let report = PhaseScheduler::new(executor).run(session).await;

    match report.write_json(&config.report_dir) {
        Ok(path) => log::info!("[Main] Report written to {}", path.display()),
        Err(e) => log::error!("[Main] Failed to write report: {}", e),
    }
    log_parsed!("[Main] {}", report.summary_line());
    println!("{}", report.summary_line());

    if let Err(e) = log_collector.flush() {
        eprintln!("[Main] WARNING: Failed to flush logs: {}", e);
    }
    Ok(report.exit_code())
}

#[tokio::main]
async fn main() {
    let log_collector = match LogCollector::new(PathBuf::from("logs"), true) {
        Ok(collector) => collector,
        Err(e) => {
            eprintln!("[Main] ERROR: LogCollector initialization failed: {}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = log_collector.install(log::LevelFilter::Info) {
        eprintln!("[Main] WARNING: Failed to set LogCollector as global logger: {}", e);
    }
    log::info!("GOATd Validator {} starting", goatd_validator::VERSION);

    let code = match run(&log_collector).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("[Main] {:#}", e);
            eprintln!("[Main] ERROR: {:#}", e);
            let _ = log_collector.flush();
            2
        }
    };
    std::process::exit(code);
}
