//! `iop-server` command line: `serve` (default) and `check-content`

use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use iop_core::config::ENV_PREFIX;
use iop_core::ServiceConfig;
use iop_rules::RuleCatalog;
use iop_server::{telemetry, AppState, SERVICE_NAME, VERSION};
use std::path::PathBuf;
use std::process::ExitCode;

/// Flags that override config keys, as (flag, `IOP_*` suffix, help)
const OVERRIDES: [(&str, &str, &str); 11] = [
    ("listen", "LISTEN", "Address to listen on"),
    ("api-prefix", "API_PREFIX", "Path prefix of the upload route"),
    ("max-upload-size", "MAX_UPLOAD_SIZE", "Largest accepted upload in bytes"),
    ("unpacked-size-limit", "UNPACKED_SIZE_LIMIT", "Largest unpacked archive in bytes (0 derives it from the upload limit)"),
    ("staging-dir", "STAGING_DIR", "Directory for staged uploads"),
    ("content-dir", "CONTENT_DIR", "Rule content root"),
    ("database", "DATABASE", "SQLite database path or :memory:"),
    ("request-timeout-secs", "REQUEST_TIMEOUT_SECS", "Per-request budget in seconds"),
    ("workers", "WORKERS", "Blocking worker threads"),
    ("log-level", "LOG_LEVEL", "Log filter, e.g. info or iop_core=debug"),
    ("log-format", "LOG_FORMAT", "Log output: text or json"),
];

fn cli() -> Command {
    let serve = OVERRIDES.iter().fold(
        Command::new("serve").about("Run the HTTP ingress (default)"),
        |cmd, (flag, _, help)| cmd.arg(Arg::new(*flag).long(*flag).help(*help)),
    );

    Command::new("iop-server")
        .version(VERSION)
        .about("Insights on-premise ingress: archive upload, rule evaluation, result persistence")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .subcommand(serve)
        .subcommand(
            Command::new("check-content")
                .about("Load the rule content tree and report what was skipped")
                .arg(
                    Arg::new("content-dir")
                        .long("content-dir")
                        .help("Rule content root"),
                ),
        )
}

/// defaults <- TOML file <- `IOP_*` environment <- flags
fn load_config(matches: &ArgMatches, flags: Option<&ArgMatches>) -> anyhow::Result<ServiceConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ServiceConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    config.apply_env().context("applying environment overrides")?;
    if let Some(flags) = flags {
        config
            .apply_overrides(|key| {
                let suffix = key.strip_prefix(ENV_PREFIX)?;
                let (flag, _, _) = OVERRIDES.iter().find(|(_, name, _)| *name == suffix)?;
                flags.try_get_one::<String>(flag).ok().flatten().cloned()
            })
            .context("applying command line overrides")?;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    telemetry::init(&config.log_level, config.log_format)?;
    let addr = config.listen_addr()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .max_blocking_threads(config.workers)
        .enable_all()
        .build()
        .context("building runtime")?;

    tracing::info!(
        version = VERSION,
        %addr,
        upload_path = %config.upload_path(),
        workers = config.workers,
        staging_dir = %config.staging_dir.display(),
        "starting {SERVICE_NAME}"
    );
    let state = AppState::from_config(config)?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        iop_server::serve(listener, state).await.context("serving")
    })
}

fn check_content(config: &ServiceConfig) -> ExitCode {
    let catalog = RuleCatalog::load(&config.content_dir);
    println!("Rule content: {}", config.content_dir.display());
    println!("  Evaluable rules: {}", catalog.size());
    println!("  Error keys with content: {}", catalog.content_len());
    println!("  Skipped: {}", catalog.warnings().len());
    for warning in catalog.warnings() {
        println!("    - {warning}");
    }
    if catalog.warnings().is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("check-content", args)) => {
            let mut config = load_config(&matches, None)?;
            if let Some(dir) = args.get_one::<String>("content-dir") {
                config.content_dir = PathBuf::from(dir);
            }
            Ok(check_content(&config))
        }
        Some(("serve", args)) => {
            serve(load_config(&matches, Some(args))?)?;
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            serve(load_config(&matches, None)?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
