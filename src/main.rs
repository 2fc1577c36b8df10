//! Fastly Power Tools - edge dictionary and ACL maintenance

mod cli;
mod config;
mod dispatch;
mod fastly;
mod logger;
mod operation;
mod output;
mod registry;
mod site;

use clap::Parser;
use serde_json::json;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::Settings;
use logger::{Logger, END_SCRIPT, START_SCRIPT};
use operation::{Context, Param};
use output::{Output, ToolError};
use registry::Registry;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let registry = Registry::fastly();

    // Handle --manifest before anything else
    if cli.manifest {
        output::print_manifest(&registry);
        return ExitCode::SUCCESS;
    }

    let out = Output::new(cli.agent);
    match run(&cli, &registry, &out).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => out.error(err),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fastly_tools={}", level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cli: &Cli, registry: &Registry, out: &Output) -> Result<(), ToolError> {
    let settings = Settings::load().map_err(|e| ToolError::sys("CONFIG", &format!("{:#}", e)))?;
    debug!(?settings, "loaded settings");

    let log = Logger::open(&settings.log_file)
        .map_err(|e| {
            ToolError::sys(
                "LOG_OPEN",
                &format!("Failed to open log file {:?}: {}", settings.log_file, e),
            )
        })?
        .with_echo(!cli.agent);
    let log_failed = |e: std::io::Error| ToolError::sys("LOG_WRITE", &format!("Failed to write script log: {}", e));

    let name = cli.operation.as_deref().unwrap_or_default();
    let request = cli.request();
    debug!(
        operation = name,
        supplied = ?Param::ALL
            .iter()
            .filter(|p| request.value(**p).is_some())
            .map(|p| p.name())
            .collect::<Vec<_>>(),
        "received arguments"
    );

    log.write_line(START_SCRIPT).map_err(log_failed)?;
    log.mark_start().map_err(log_failed)?;
    out.log(
        "info",
        &format!("Running {} on service {}", name, cli.service_name.as_deref().unwrap_or_default()),
    );

    let ctx = Context {
        log: &log,
        settings: &settings,
    };
    dispatch::dispatch(registry, &ctx, name, &request)
        .await
        .map_err(|e| ToolError::from_dispatch(&e).with_op(name))?;

    log.mark_end().map_err(log_failed)?;
    log.write_line(END_SCRIPT).map_err(log_failed)?;

    out.result(json!({
        "success": true,
        "operation": name,
        "service": cli.service_name,
        "log_file": log.path(),
    }));
    Ok(())
}
