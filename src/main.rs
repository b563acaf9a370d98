use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crucible_audit::{AuditFilter, AuditLog};
use crucible_codegen::Language;
use crucible_core::{
    ApprovalDecision, ApprovalRequest, Approver, BackendProvider, EngineConfig, ExecuteRequest,
    Orchestrator,
};
use crucible_index::{ToolIndex, load_descriptor_root};
use crucible_validate::RiskLevel;

mod init;

#[derive(Parser)]
#[command(name = "crucible", version, about = "MCP code execution engine")]
struct Cli {
    /// Config file; falls back to CRUCIBLE_CONFIG, then ./crucible.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an intent through the full pipeline.
    Run {
        intent: String,
        #[arg(long, default_value = "python")]
        language: String,
        /// JSON input handed to the generated code.
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        user: Option<String>,
        /// Prompt even for auto-approvable risk levels.
        #[arg(long)]
        force_approval: bool,
        /// Approve without prompting. Critical risk still prompts.
        #[arg(long)]
        yes: bool,
    },
    /// Validate a source file without executing it.
    Validate { file: PathBuf },
    /// Inspect the audit log.
    Audit {
        #[command(subcommand)]
        action: AuditCommand,
    },
    /// Manage the tool index.
    Index {
        #[command(subcommand)]
        action: IndexCommand,
    },
    /// Interactively write a starter config file.
    Init,
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Print matching entries as JSON lines.
    Query {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        risk: Option<String>,
        #[arg(long)]
        outcome: Option<String>,
        /// RFC 3339 lower bound (inclusive).
        #[arg(long)]
        since: Option<String>,
        /// RFC 3339 upper bound (exclusive).
        #[arg(long)]
        until: Option<String>,
    },
    /// Aggregate a time range into a compliance report.
    Report {
        #[arg(long, default_value_t = 7)]
        last_days: i64,
    },
    /// Drop entries older than the retention window.
    Compact,
}

#[derive(Subcommand)]
enum IndexCommand {
    /// Load and check every descriptor under a directory.
    Sync { dir: Option<PathBuf> },
}

/// Prompts on the terminal; `--yes` short-circuits everything except
/// critical risk, which always prompts.
struct ConsoleApprover {
    assume_yes: bool,
}

impl Approver for ConsoleApprover {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        if self.assume_yes && request.risk_level != RiskLevel::Critical {
            return ApprovalDecision::Approve;
        }
        let summary = request.summary();
        tokio::task::spawn_blocking(move || {
            println!("{summary}");
            let choice = dialoguer::Select::new()
                .with_prompt("allow this execution?")
                .items(&["approve", "approve for session", "deny"])
                .default(2)
                .interact();
            match choice {
                Ok(0) => ApprovalDecision::Approve,
                Ok(1) => ApprovalDecision::ApproveForSession,
                _ => ApprovalDecision::Deny,
            }
        })
        .await
        .unwrap_or(ApprovalDecision::Deny)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_subscriber();
    let config_path = resolve_config_path(cli.config);

    match cli.command {
        Command::Run {
            intent,
            language,
            input,
            session,
            user,
            force_approval,
            yes,
        } => {
            let run_args = RunArgs {
                intent,
                language,
                input,
                session,
                user,
                force_approval,
                yes,
            };
            run(&config_path, run_args).await
        }
        Command::Validate { file } => validate(&file),
        Command::Audit { action } => audit(&config_path, &action),
        Command::Index { action } => index_cmd(&config_path, &action),
        Command::Init => init::run(&config_path),
    }
}

struct RunArgs {
    intent: String,
    language: String,
    input: String,
    session: Option<String>,
    user: Option<String>,
    force_approval: bool,
    yes: bool,
}

async fn run(config_path: &Path, args: RunArgs) -> anyhow::Result<()> {
    let config = EngineConfig::load(config_path)?;
    let language: Language = args.language.parse().map_err(anyhow::Error::msg)?;
    let input: serde_json::Value =
        serde_json::from_str(&args.input).context("--input must be valid JSON")?;

    let descriptors = load_descriptor_root(
        &config.index.descriptor_root,
        config.index.max_schema_depth,
    )
    .with_context(|| {
        format!(
            "failed to load tool descriptors from {}",
            config.index.descriptor_root.display()
        )
    })?;
    let audit = Arc::new(AuditLog::open(&config.audit.path)?);
    let provider = BackendProvider::new(config.vm_assets());
    let engine = Orchestrator::new(
        config,
        Arc::new(ToolIndex::new(descriptors)),
        audit,
        provider,
        ConsoleApprover {
            assume_yes: args.yes,
        },
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let mut request = ExecuteRequest::new(args.intent, language, input);
    if let Some(session) = args.session {
        request.session_id = session;
    }
    request.user_id = args.user;
    request.options.force_approval = args.force_approval;

    let envelope = engine.execute(request, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    if !envelope.ok() {
        std::process::exit(1);
    }
    Ok(())
}

fn validate(file: &Path) -> anyhow::Result<()> {
    let language = language_for(file)?;
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let report = crucible_validate::validate(&source, language)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.blocked() {
        std::process::exit(1);
    }
    Ok(())
}

fn audit(config_path: &Path, action: &AuditCommand) -> anyhow::Result<()> {
    let config = EngineConfig::load(config_path)?;
    let log = AuditLog::open(&config.audit.path)?;
    match action {
        AuditCommand::Query {
            session,
            user,
            risk,
            outcome,
            since,
            until,
        } => {
            let filter = AuditFilter {
                session_id: session.clone(),
                user_id: user.clone(),
                risk_level: risk
                    .as_deref()
                    .map(str::parse)
                    .transpose()
                    .map_err(anyhow::Error::msg)?,
                outcome: outcome
                    .as_deref()
                    .map(str::parse)
                    .transpose()
                    .map_err(anyhow::Error::msg)?,
                since: since.as_deref().map(parse_timestamp).transpose()?,
                until: until.as_deref().map(parse_timestamp).transpose()?,
            };
            for entry in log.query(&filter)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        AuditCommand::Report { last_days } => {
            let until = Utc::now();
            let since = until - chrono::Duration::days(*last_days);
            let report = log.report(since, until)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        AuditCommand::Compact => {
            let cutoff =
                Utc::now() - chrono::Duration::days(i64::from(config.audit.retention_days));
            let dropped = log.compact(cutoff)?;
            println!("dropped {dropped} expired entries");
        }
    }
    Ok(())
}

fn index_cmd(config_path: &Path, action: &IndexCommand) -> anyhow::Result<()> {
    let config = EngineConfig::load(config_path)?;
    match action {
        IndexCommand::Sync { dir } => {
            let root = dir.as_deref().unwrap_or(&config.index.descriptor_root);
            let descriptors = load_descriptor_root(root, config.index.max_schema_depth)
                .with_context(|| format!("failed to load descriptors from {}", root.display()))?;
            for d in &descriptors {
                println!("{}", d.qualified_name());
            }
            println!(
                "{} tool(s) indexed from {}",
                descriptors.len(),
                root.display()
            );
        }
    }
    Ok(())
}

fn language_for(file: &Path) -> anyhow::Result<Language> {
    match file.extension().and_then(|e| e.to_str()) {
        Some("ts") => Ok(Language::TypeScript),
        Some("py") => Ok(Language::Python),
        other => bail!(
            "cannot infer language from extension {other:?}; expected .ts or .py"
        ),
    }
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("'{raw}' is not an RFC 3339 timestamp"))
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("CRUCIBLE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("crucible.toml")
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
