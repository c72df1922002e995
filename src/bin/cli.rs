//! wasm-sandbox CLI
//!
//! Thin front end over the engine API: run code, validate it, and manage
//! session workspaces and configuration.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use humantime_serde::re::humantime;
use tracing::info;
use wasm_sandbox::config::{config_path, save_config, validate_config, Config};
use wasm_sandbox::factory::delete_session;
use wasm_sandbox::runtime::check_balance;
use wasm_sandbox::sandbox::PolicyBuilder;
use wasm_sandbox::telemetry::{init_logging, LogFormat};
use wasm_sandbox::{
    create_sandbox, prune_sessions, ExecuteOptions, Language, RetentionPolicy, Runtime,
    SandboxRequest, SandboxResult, VERSION,
};

#[derive(Parser)]
#[command(
    name = "wasm-sandbox",
    version = VERSION,
    about = "Run untrusted code inside a metered WebAssembly sandbox",
    long_about = None
)]
struct Cli {
    /// Log format (pretty or json)
    #[arg(long, global = true, default_value = "pretty", env = "SANDBOX_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code in a session
    Run(RunArgs),

    /// Statically check code without running it
    Validate {
        /// Guest language
        #[arg(short, long)]
        language: Language,
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Remove sessions idle for longer than a threshold
    Prune {
        /// Maximum idle age, e.g. "24h" (defaults to the configured value)
        #[arg(long, value_parser = humantime::parse_duration)]
        max_age: Option<Duration>,
        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete one session workspace
    DeleteSession {
        /// Session identifier
        session_id: String,
    },

    /// Write a default configuration file and report validation issues
    InitConfig {
        /// Destination (defaults to the standard config path)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Inline source code
    #[arg(short, long, conflicts_with = "file")]
    code: Option<String>,
    /// Read source from a file (reads stdin when neither is given)
    #[arg(short, long)]
    file: Option<PathBuf>,
}

impl SourceArgs {
    fn read(&self) -> Result<String> {
        match (&self.code, &self.file) {
            (Some(code), _) => Ok(code.clone()),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display())),
            (None, None) => {
                let mut source = String::new();
                std::io::stdin().read_to_string(&mut source)?;
                Ok(source)
            }
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Guest language
    #[arg(short, long)]
    language: Language,
    #[command(flatten)]
    source: SourceArgs,
    /// Session to run in (a new one is created when omitted)
    #[arg(short, long)]
    session: Option<String>,
    /// Instruction budget
    #[arg(long)]
    fuel: Option<u64>,
    /// Linear memory ceiling in bytes
    #[arg(long)]
    memory: Option<u64>,
    /// Wall-clock fallback in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// File whose contents are fed to the guest's stdin
    #[arg(long)]
    stdin_file: Option<PathBuf>,
    /// Inject the language setup prelude
    #[arg(long)]
    setup: bool,
    /// Persist globals across executions in this session
    #[arg(long)]
    persist: bool,
    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    match cli.command {
        Commands::Run(args) => run_code(args).await,
        Commands::Validate { language, source } => validate(language, &source),
        Commands::Prune { max_age, dry_run } => prune(max_age, dry_run),
        Commands::DeleteSession { session_id } => delete(&session_id),
        Commands::InitConfig { path, force } => init_config(path, force),
    }
}

async fn run_code(args: RunArgs) -> Result<()> {
    let config = Config::from_env()?;
    let source = args.source.read()?;

    let mut policy = PolicyBuilder::from(config.sandbox.default_policy()?);
    if let Some(fuel) = args.fuel {
        policy = policy.fuel_budget(fuel);
    }
    if let Some(memory) = args.memory {
        policy = policy.memory_bytes(memory);
    }
    if args.timeout.is_some() {
        policy = policy.timeout_seconds(args.timeout);
    }

    let mut request = SandboxRequest::new(args.language).with_policy(policy.build()?);
    if let Some(session) = args.session {
        request = request.with_session(session);
    }
    let sandbox = create_sandbox(request, &config.sandbox).context("Failed to create sandbox")?;

    let mut options = ExecuteOptions::new();
    options.inject_setup = args.setup;
    if args.persist {
        options.auto_persist_globals = Some(true);
    }
    if let Some(path) = args.stdin_file {
        options.stdin = Some(
            std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }

    let result = sandbox.execute(&source, options).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(sandbox.session_id(), &result);
    }

    if !result.success {
        std::process::exit(result.exit_code.filter(|c| *c != 0).unwrap_or(1));
    }
    Ok(())
}

fn print_summary(session_id: &str, result: &SandboxResult) {
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }
    eprintln!();
    eprintln!("session:  {}", session_id);
    eprintln!("state:    {:?}", result.state);
    if let Some(trap) = &result.trap {
        eprintln!("trap:     {} ({})", trap.kind, trap.message);
    } else if let Some(code) = result.exit_code {
        eprintln!("exit:     {}", code);
    }
    eprintln!("fuel:     {}", result.fuel_consumed);
    eprintln!("memory:   {} bytes", result.memory_used_bytes);
    eprintln!("time:     {} ms", result.duration_ms);
    if result.stdout_truncated || result.stderr_truncated {
        eprintln!("output was truncated");
    }
    for file in &result.files_created {
        eprintln!("created:  {}", file);
    }
    for file in &result.files_modified {
        eprintln!("modified: {}", file);
    }
    if let Some(guidance) = result.metadata.get("error_guidance") {
        if let Some(items) = guidance["actionable_guidance"].as_array() {
            for item in items.iter().filter_map(|i| i.as_str()) {
                eprintln!("hint:     {}", item);
            }
        }
    }
}

fn validate(language: Language, source: &SourceArgs) -> Result<()> {
    let source = source.read()?;
    match check_balance(&source, language) {
        Ok(()) => {
            println!("valid");
            Ok(())
        }
        Err(e) => bail!("{} source is not well formed: {}", language, e),
    }
}

fn prune(max_age: Option<Duration>, dry_run: bool) -> Result<()> {
    let config = Config::from_env()?;
    let retention = RetentionPolicy {
        max_age: max_age.unwrap_or(config.sandbox.session_max_age),
        dry_run,
    };
    let report = prune_sessions(&config.sandbox, retention)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn delete(session_id: &str) -> Result<()> {
    let config = Config::from_env()?;
    if delete_session(&config.sandbox, session_id)? {
        info!(session_id, "Session deleted");
        Ok(())
    } else {
        bail!("Session not found: {}", session_id)
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(config_path);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let config = Config::default();
    save_config(&config, &path)?;
    println!("Wrote {}", path.display());

    let report = validate_config(&config);
    for issue in report.errors.iter().chain(report.warnings.iter()) {
        println!("  - {}", issue);
    }
    Ok(())
}
