use crate::admission::QueryValidator;
use crate::config::types::SandboxConfig;
use crate::config::validator::validate_config;
use crate::core::assignments::AssignmentCatalog;
use crate::core::engine::{SubmissionEngine, SubmissionRequest};
use crate::exec::postgres::PgBackend;
use crate::observability::audit::{AuditLogRecorder, LogRecorder, SubmissionRecorder};
use crate::observability::metrics::get_metrics;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "Admission and sandboxed execution of learner SQL", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./querybox.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the admission checks on a query without executing it
    Validate {
        /// Query text
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        query: Option<String>,
        /// Read the query from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Submit a query for an assignment and print the graded result
    Execute {
        /// Assignment id
        #[arg(long)]
        assignment: String,
        /// Submitting user id
        #[arg(long, default_value = "cli")]
        user: String,
        /// Query text
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        query: Option<String>,
        /// Read the query from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Assignment catalog (overrides assignments_path from config)
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Print Prometheus metrics to stderr afterwards
        #[arg(long)]
        print_metrics: bool,
    },
    /// Validate configuration and optionally check database connectivity
    CheckConfig {
        /// Open a connection and run a round-trip query
        #[arg(long)]
        ping: bool,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = SandboxConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Validate { query, file } => {
            let text = read_query(query, file.as_deref())?;
            let validator = QueryValidator::new(config.admission.max_query_length);
            let verdict = validator.validate(&text);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if !verdict.admitted {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Execute {
            assignment,
            user,
            query,
            file,
            catalog,
            print_metrics,
        } => {
            let text = read_query(query, file.as_deref())?;
            let code = execute(
                &config,
                SubmissionRequest::new(user, assignment, text),
                catalog.as_deref(),
                print_metrics,
            )?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::CheckConfig { ping } => {
            let code = check_config(config, ping)?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}

fn read_query(query: Option<String>, file: Option<&Path>) -> Result<String> {
    match (query, file) {
        (Some(query), _) => Ok(query),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading query from {}", path.display())),
        (None, None) => Err(anyhow::anyhow!("either --query or --file is required")),
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("querybox-worker")
        .build()
        .context("starting async runtime")
}

fn report_validation(config: &SandboxConfig) -> Result<crate::config::validator::ValidationResult> {
    let report = validate_config(config)?;
    for warning in &report.warnings {
        warn!("Config: {}", warning);
    }
    Ok(report)
}

fn execute(
    config: &SandboxConfig,
    request: SubmissionRequest,
    catalog: Option<&Path>,
    print_metrics: bool,
) -> Result<i32> {
    report_validation(config)?;

    let catalog_path = catalog
        .map(Path::to_path_buf)
        .or_else(|| config.assignments_path.clone())
        .ok_or_else(|| anyhow::anyhow!("no assignment catalog: pass --catalog or set assignments_path"))?;
    let assignments = Arc::new(AssignmentCatalog::from_file(&catalog_path)?);

    let recorder: Arc<dyn SubmissionRecorder> = match &config.audit.path {
        Some(path) => Arc::new(AuditLogRecorder::open(path, config.audit.queue_capacity)?),
        None => Arc::new(LogRecorder),
    };

    let runtime = build_runtime()?;
    let code = runtime.block_on(async {
        let backend = PgBackend::connect_lazy(&config.database)?;
        let engine = SubmissionEngine::from_config(
            config,
            Arc::new(backend.clone()),
            assignments,
            recorder,
        );

        let code = match engine.submit(&request).await {
            Ok(response) => {
                println!("{}", response.to_json()?);
                0
            }
            Err(e) => {
                println!("{}", e.to_payload().to_json()?);
                1
            }
        };
        drop(engine);
        backend.close().await;
        Ok::<i32, anyhow::Error>(code)
    })?;

    if print_metrics {
        eprint!("{}", get_metrics().export_prometheus());
    }
    Ok(code)
}

fn check_config(config: SandboxConfig, ping: bool) -> Result<i32> {
    let report = match validate_config(&config) {
        Ok(report) => report,
        Err(e) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "valid": false,
                    "error": e.to_string(),
                }))?
            );
            return Ok(1);
        }
    };

    let mut reachable = None;
    if ping {
        let runtime = build_runtime()?;
        reachable = Some(runtime.block_on(async {
            let backend = PgBackend::connect_lazy(&config.database)?;
            let result = backend.ping().await;
            backend.close().await;
            match result {
                Ok(()) => {
                    info!("Database reachable");
                    Ok::<bool, anyhow::Error>(true)
                }
                Err(e) => {
                    warn!("Database ping failed: {}", e);
                    Ok(false)
                }
            }
        })?);
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "valid": report.is_valid(),
            "errors": report.errors,
            "warnings": report.warnings,
            "databaseReachable": reachable,
        }))?
    );

    let ok = report.is_valid() && reachable.unwrap_or(true);
    Ok(if ok { 0 } else { 1 })
}
