mod cli;
mod config;
mod identity;
mod inspect;
mod passthrough;
mod supervisor;

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use audit_log::{AuditSink, AuditTarget, AuditWriter, CloudLoggingWriter, DryRunWriter};

use crate::cli::Cli;
use crate::config::Config;
use crate::identity::Identity;
use crate::passthrough::PassthroughSink;
use crate::supervisor::{Supervisor, SupervisorConfig, SHUTDOWN_TIMEOUT};

const EXIT_USAGE: u8 = 2;
const EXIT_IDENTITY: u8 = 3;
const EXIT_SINK: u8 = 4;
const EXIT_RUNTIME: u8 = 5;

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Parse CLI args. Help and version requests exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    // 2. Load config; logging comes up with its level before errors are
    //    reported.
    let loaded = config::load(&cli.config);
    let level = match &loaded {
        Ok(Some(cfg)) => cfg.logging.level.clone(),
        _ => config::default_log_level(),
    };
    init_tracing(&level);

    let cfg = match loaded {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            warn!(
                path = %cli.config.display(),
                "configuration file not found; using defaults"
            );
            Config::default()
        }
        Err(err) => return fail(EXIT_USAGE, "invalid configuration", err),
    };
    if let Err(err) = cfg.validate() {
        return fail(EXIT_USAGE, "invalid configuration", err);
    }

    info!(
        config_file = %cli.config.display(),
        log_file = %cli.log_file,
        dry_run = cli.dry_run,
        "pgaudit-relay starting"
    );

    // 3. Debug mode: dump the newest entries and exit.
    if let Some(n) = cli.test_last_n {
        return print_last_entries(&cli.log_file, n).await;
    }

    // 4. Cancel everything on SIGINT or SIGTERM, including startup lookups.
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    // 5. Resolve who the records belong to.
    let resolved = tokio::select! {
        _ = cancel.cancelled() => return ExitCode::SUCCESS,
        resolved = Identity::resolve(cli.project_id.as_deref()) => resolved,
    };
    let identity = match resolved {
        Ok(identity) => identity,
        Err(err) => return fail(EXIT_IDENTITY, "failed to resolve identity", err.into()),
    };
    let target = AuditTarget::new(
        identity.project_id.clone(),
        identity.cluster_name.clone(),
        cfg.cloud_logging.location.clone(),
    );
    info!(
        project_id = %identity.project_id,
        namespace = %identity.namespace,
        cluster = %identity.cluster_name,
        "sending audit logs"
    );

    // 6. Pick the audit writer and run the pipeline.
    if cli.dry_run {
        info!("dry-run mode: audit records and log lines go to stdout");
        return run(&cli, &cfg, DryRunWriter::stdout(), target, cancel).await;
    }

    let cloud_logging = cfg.cloud_logging();
    let connected = tokio::select! {
        _ = cancel.cancelled() => return ExitCode::SUCCESS,
        connected = CloudLoggingWriter::connect(&cloud_logging, &target) => connected,
    };
    match connected {
        Ok(writer) => run(&cli, &cfg, writer, target, cancel).await,
        Err(err) => fail(EXIT_SINK, "failed to create logging client", err.into()),
    }
}

async fn run<W>(
    cli: &Cli,
    cfg: &Config,
    writer: W,
    target: AuditTarget,
    cancel: CancellationToken,
) -> ExitCode
where
    W: AuditWriter + 'static,
{
    let supervisor = Supervisor::new(
        SupervisorConfig {
            watcher: cfg.watcher(&cli.log_file, cli.from_beginning),
            channel_capacity: cfg.dispatch.channel_capacity,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        },
        cancel,
    );

    let result = supervisor
        .run(
            AuditSink::new(writer, target),
            PassthroughSink::stdout(cli.dry_run),
        )
        .await;

    match result {
        Ok(()) => {
            info!("pgaudit-relay shutting down");
            ExitCode::SUCCESS
        }
        Err(err) => fail(EXIT_RUNTIME, "fatal error", err),
    }
}

async fn print_last_entries(pattern: &str, n: u64) -> ExitCode {
    let path = match inspect::first_match(pattern) {
        Ok(path) => path,
        Err(err) => return fail(EXIT_USAGE, "cannot inspect log file", err),
    };
    let mut stdout = tokio::io::stdout();
    match inspect::print_last_entries(&path, n, &mut stdout).await {
        Ok(printed) => {
            info!(printed, path = %path.display(), "done");
            ExitCode::SUCCESS
        }
        Err(err) => fail(EXIT_USAGE, "cannot inspect log file", err),
    }
}

fn init_tracing(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // stdout is reserved for passthrough output.
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(code: u8, what: &str, err: anyhow::Error) -> ExitCode {
    error!(error = %format!("{err:#}"), code, "{}", what);
    ExitCode::from(code)
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                info!("received SIGINT (ctrl-c)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received SIGINT (ctrl-c)");
    }

    cancel.cancel();
}
