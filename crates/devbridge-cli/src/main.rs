use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use devbridge_core::config::host_arch;
use devbridge_core::session::{DEFAULT_INFO_PLIST, DEFAULT_PROCESS_PATTERN};
use devbridge_core::{
    BridgeConfig, Controller, ControllerConfig, DEFAULT_CDP_PORT, FixedTargets, FridaCli,
    Orchestrator, PgrepLocator, ProcessLocator, ProtobufCodec, ScriptTemplate, ShutdownSignal,
    config_path_for_version, load_offset_config, probe_app_version,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "devbridge")]
#[command(about = "Chrome DevTools bridge for the WeChat mini program runtime")]
#[command(version)]
struct Args {
    /// Port for DevTools to connect to
    #[arg(long, env = "DEVBRIDGE_CDP_PORT", default_value_t = DEFAULT_CDP_PORT)]
    cdp_port: u16,

    /// Offset config file (overrides --config-dir and --app-version)
    #[arg(short, long, env = "DEVBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding addresses.<version>.json files
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Application version to load offsets for (probed when omitted)
    #[arg(long)]
    app_version: Option<String>,

    /// Architecture key to resolve offsets for (defaults to the host)
    #[arg(long)]
    arch: Option<String>,

    /// Instrumentation script template (defaults to the built-in script)
    #[arg(long)]
    script: Option<PathBuf>,

    /// frida executable
    #[arg(long, env = "DEVBRIDGE_FRIDA", default_value = "frida")]
    frida: PathBuf,

    /// Command line pattern used to find target processes
    #[arg(long, default_value = DEFAULT_PROCESS_PATTERN)]
    process_pattern: String,

    /// Info.plist to read the application version from
    #[arg(long, default_value = DEFAULT_INFO_PLIST)]
    info_plist: PathBuf,

    /// Attach to these PIDs instead of searching
    #[arg(long = "pid")]
    pids: Vec<u32>,

    /// Seconds allowed for each attach or teardown step
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    step_timeout: u64,
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("devbridge=info".parse()?)
                .add_directive("devbridge_core=info".parse()?),
        )
        .init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error starting services: {:#}", e);
            if e
                .downcast_ref::<devbridge_core::Error>()
                .is_some_and(|e| e.is_config_error())
            {
                error!("Check the offset config for this application version and architecture");
            }
            ExitCode::FAILURE
        }
    }
}

/// Name the application version when its versioned offset file is missing.
fn offsets_error(
    error: devbridge_core::Error,
    path: &Path,
    version: Option<&str>,
) -> anyhow::Error {
    match version {
        Some(version) if error.is_not_found() => anyhow!(
            "no offset config for application version {}: {} does not exist",
            version,
            path.display()
        ),
        _ => anyhow::Error::new(error)
            .context(format!("failed to load offsets from {}", path.display())),
    }
}

async fn run(args: Args) -> Result<()> {
    info!("devbridge {}", env!("CARGO_PKG_VERSION"));

    // Setup graceful shutdown handlers
    let shutdown = Arc::new(ShutdownSignal::new());
    let shutdown_ctrlc = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        if shutdown_ctrlc.trigger() {
            info!("Received shutdown signal, stopping...");
        }
    })?;

    let shutdown_panic = Arc::clone(&shutdown);
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        error!("Unexpected panic, shutting down");
        shutdown_panic.trigger();
    }));

    let locator: Box<dyn ProcessLocator> = if args.pids.is_empty() {
        Box::new(PgrepLocator::new(&args.process_pattern, &args.info_plist))
    } else {
        Box::new(FixedTargets::new(args.pids.clone(), args.app_version.clone()))
    };

    let arch = args.arch.clone().unwrap_or_else(|| host_arch().to_string());
    let (config_path, version) = match &args.config {
        Some(path) => (path.clone(), None),
        None => {
            let version = match &args.app_version {
                Some(version) => version.clone(),
                None => probe_app_version(locator.as_ref()).await,
            };
            (config_path_for_version(&args.config_dir, &version), Some(version))
        }
    };
    let offsets = load_offset_config(&config_path, &arch)
        .map_err(|e| offsets_error(e, &config_path, version.as_deref()))?;

    let template = match &args.script {
        Some(path) => ScriptTemplate::from_file(path)
            .with_context(|| format!("failed to load script {}", path.display()))?,
        None => ScriptTemplate::builtin(),
    };

    let step_timeout = Duration::from_secs(args.step_timeout);
    let config = ControllerConfig {
        bridge: BridgeConfig::with_cdp_port(args.cdp_port),
        step_timeout,
    };
    let engine = FridaCli::new(&args.frida).fit_to_step_timeout(step_timeout);
    let orchestrator = Orchestrator::new(engine, locator, template, step_timeout);
    let mut controller = Controller::new(config, Arc::new(ProtobufCodec), orchestrator);

    controller.start(&offsets).await?;

    info!("Servers started. Press Ctrl+C to stop.");
    if let Some(bridge) = controller.bridge() {
        info!("Debug endpoint: ws://{}", bridge.debug().local_addr());
        info!("CDP endpoint:   ws://{}", bridge.inspector().local_addr());
    }

    shutdown.wait().await;

    if let Some(report) = controller.shutdown().await {
        for failure in &report.detach.failures {
            warn!("PID {} ({}): {}", failure.pid, failure.state, failure.error);
        }
        for failure in &report.endpoint_failures {
            warn!("{}", failure);
        }
    }
    info!("Shutdown complete. Exiting.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_versioned_config_names_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_version(dir.path(), "99999");
        let error = load_offset_config(&path, "arm64").unwrap_err();

        let message = offsets_error(error, &path, Some("99999")).to_string();
        assert!(message.contains("application version 99999"));
        assert!(message.contains("does not exist"));
    }

    #[test]
    fn test_missing_explicit_config_keeps_cause() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");
        let error = load_offset_config(&path, "arm64").unwrap_err();

        let error = offsets_error(error, &path, None);
        assert!(error.to_string().starts_with("failed to load offsets from"));
        assert!(error.downcast_ref::<devbridge_core::Error>().is_some());
    }

    #[test]
    fn test_step_timeout_must_be_positive() {
        assert!(Args::try_parse_from(["devbridge", "--step-timeout", "0"]).is_err());
        let args = Args::try_parse_from(["devbridge", "--step-timeout", "1"]).unwrap();
        assert_eq!(args.step_timeout, 1);
    }
}
