//! Reclaim Agent - CI automation agent.
//!
//! Environment-variable driven: every knob binds to an env var so the same
//! binary runs unchanged from a workflow step or an operator shell.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use reclaim_agent::config::{env_flag, AgentConfig, AgentMode, RunContext};
use reclaim_agent::error::AgentError;
use reclaim_agent::github::GitHubClient;
use reclaim_agent::knowledge_base::KnowledgeBaseGenerator;
use reclaim_agent::milestone::MilestoneStore;
use reclaim_agent::model::OpenAiResponsesClient;
use reclaim_agent::runner::Runner;

/// Filename of the generated knowledge base inside the config dir.
const KB_FILENAME: &str = "knowledge_base.md";

#[derive(Parser)]
#[command(name = "reclaim-agent")]
#[command(version = "0.1.0")]
#[command(about = "Keeps a repository green and advances declarative milestones via model-generated patches", long_about = None)]
struct Cli {
    /// Local checkout of the target repository
    #[arg(long, env = "RECLAIM_REPO_PATH")]
    repo_path: Option<PathBuf>,

    /// Remote repository as owner/repo
    #[arg(long, env = "RECLAIM_REPO", default_value = "IoTWazPresales/Reclaim")]
    repo: String,

    /// Default branch PRs target
    #[arg(long, env = "RECLAIM_DEFAULT_BRANCH", default_value = "main")]
    default_branch: String,

    /// Directory holding default.yaml and reclaim.yaml
    #[arg(long, env = "AGENT_CONFIG_DIR", default_value = "agent_config")]
    config_dir: PathBuf,

    /// Run mode
    #[arg(long, value_enum, env = "AGENT_MODE", default_value_t = AgentMode::Auto)]
    mode: AgentMode,

    /// Verbose output (also enabled by AGENT_DEBUG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent once (the default when no subcommand is given)
    Run,

    /// Generate the knowledge-base markdown for the target repository
    Kb,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let debug = cli.verbose || env_flag("AGENT_DEBUG");
    let filter = if debug {
        "reclaim_agent=debug,info"
    } else {
        "reclaim_agent=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let exit_code = match cli.command {
        Some(Commands::Kb) => run_kb(&cli).await,
        Some(Commands::Run) | None => run_agent(&cli).await,
    };
    std::process::exit(exit_code);
}

/// Validate the startup environment; everything here is fatal before any
/// work begins.
fn validate_environment(cli: &Cli) -> Result<(PathBuf, String), AgentError> {
    let repo_path = cli
        .repo_path
        .clone()
        .ok_or_else(|| AgentError::MissingEnv {
            var: "RECLAIM_REPO_PATH".to_string(),
        })?;
    if !repo_path.is_dir() {
        return Err(AgentError::RepoNotFound { path: repo_path });
    }

    let gh_token = std::env::var("RECLAIM_GH_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AgentError::MissingEnv {
            var: "RECLAIM_GH_TOKEN".to_string(),
        })?;

    if std::env::var("OPENAI_API_KEY")
        .map(|k| k.trim().is_empty())
        .unwrap_or(true)
    {
        return Err(AgentError::MissingEnv {
            var: "OPENAI_API_KEY".to_string(),
        });
    }

    if which::which("git").is_err() {
        return Err(AgentError::config("git is not installed or not in PATH"));
    }

    Ok((repo_path, gh_token))
}

async fn run_agent(cli: &Cli) -> i32 {
    println!("Reclaim Agent starting...");

    let (repo_path, gh_token) = match validate_environment(cli) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("{} {}", "ERROR:".red().bold(), e);
            return e.exit_code();
        }
    };

    let config = match AgentConfig::load(&cli.config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} failed to load config: {}", "ERROR:".red().bold(), e);
            return e.exit_code();
        }
    };

    let strict = env_flag("AGENT_STRICT");
    let ctx = match RunContext::new(
        repo_path,
        cli.repo.clone(),
        cli.default_branch.clone(),
        cli.mode,
        strict,
        &config,
    ) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("{} {}", "ERROR:".red().bold(), e);
            return e.exit_code();
        }
    };

    println!("Repository: {}", cli.repo);
    println!("Repository path: {}", ctx.repo_path.display());
    println!("Default branch: {}", ctx.default_branch);
    println!("Mode: {}", ctx.mode);

    let store = MilestoneStore::new(
        config.milestones.clone(),
        AgentConfig::override_path(&cli.config_dir),
    );
    let model = OpenAiResponsesClient::from_env();
    let remote = GitHubClient::new(gh_token, cli.repo.clone());
    let kb_path = cli.config_dir.join(KB_FILENAME);

    let mut runner = Runner::new(
        ctx,
        &config,
        store,
        Box::new(model),
        Box::new(remote),
        kb_path,
    );

    match runner.run().await {
        Ok(Some(pr_url)) => {
            println!(
                "{} PR: {}",
                "Agent completed successfully -".green(),
                pr_url
            );
            finish(&runner, &[pr_url]).await
        }
        Ok(None) => {
            println!("Agent completed - no work needed");
            finish(&runner, &[]).await
        }
        Err(e) => {
            eprintln!("{} {}", "Agent failed:".red().bold(), e);
            e.exit_code()
        }
    }
}

/// Post the end-of-day summary; a summary failure never fails the run.
async fn finish(runner: &Runner, prs: &[String]) -> i32 {
    if let Err(e) = runner.maybe_post_daily_summary(prs).await {
        eprintln!("Failed to post daily summary: {e}");
    }
    0
}

async fn run_kb(cli: &Cli) -> i32 {
    let Some(repo_path) = cli.repo_path.clone().filter(|p| p.is_dir()) else {
        eprintln!(
            "{} RECLAIM_REPO_PATH not set or invalid",
            "ERROR:".red().bold()
        );
        return 7;
    };

    let config = AgentConfig::load(&cli.config_dir).unwrap_or_default();
    println!("Generating knowledge base for: {}", repo_path.display());

    let generator = KnowledgeBaseGenerator::new(repo_path, &config.build_dir);
    let output = cli.config_dir.join(KB_FILENAME);
    match generator.save(&output) {
        Ok(()) => {
            println!("Knowledge base generated: {}", output.display());
            0
        }
        Err(e) => {
            eprintln!("{} {}", "ERROR:".red().bold(), e);
            e.exit_code()
        }
    }
}
