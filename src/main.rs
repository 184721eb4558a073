//! Vigil - unattended agent supervisor loop
//!
//! Repeatedly invokes an external autonomous coding agent, classifies its
//! output, and decides whether to continue, throttle, halt, or stop.

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

use vigil::breaker::CircuitBreaker;
use vigil::config::{LoopConfig, OutputFormat};
use vigil::orchestrator::{operations, LoopOrchestrator, StatusWriter};
use vigil::session::SessionLifecycleManager;
use vigil::VigilError;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version = "0.1.0")]
#[command(about = "Unattended supervisor loop for an autonomous coding agent", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor loop until it stops, halts, or is interrupted
    Run {
        /// Prompt file fed to the agent each iteration
        #[arg(long, default_value = "PROMPT.md")]
        prompt: PathBuf,

        /// Maximum agent invocations per hour
        #[arg(long, default_value = "100")]
        max_calls_per_hour: u32,

        /// Per-iteration deadline in minutes (1-120)
        #[arg(short, long, default_value = "15")]
        timeout: u64,

        /// Output format requested from the agent
        #[arg(long, value_enum, default_value = "structured")]
        format: FormatArg,

        /// Disable session continuity (fresh agent context every iteration)
        #[arg(long)]
        no_resume: bool,

        /// Hours after which a continuation token expires
        #[arg(long, default_value = "24")]
        session_expiry: i64,

        /// Comma-separated whitelist of tools the agent may use
        #[arg(long, value_delimiter = ',')]
        allowed_tools: Vec<String>,
    },

    /// Show the last status snapshot and breaker state
    Status,

    /// Reset the circuit breaker (and optionally the session) after a halt
    Reset {
        /// Also reset the continuation session
        #[arg(long)]
        session: bool,

        /// Reason recorded in the transition history
        #[arg(long, default_value = "manual_reset")]
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Structured,
    Freeform,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Structured => OutputFormat::Structured,
            FormatArg::Freeform => OutputFormat::Freeform,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "vigil=debug,info"
    } else {
        "vigil=info,warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());
    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Run {
            prompt,
            max_calls_per_hour,
            timeout,
            format,
            no_resume,
            session_expiry,
            allowed_tools,
        } => {
            let prompt_path = if prompt.is_absolute() {
                prompt
            } else {
                project_path.join(prompt)
            };

            let mut config = LoopConfig::new(&project_path)
                .with_prompt_path(prompt_path)
                .with_max_calls_per_hour(max_calls_per_hour)
                .with_timeout_minutes(timeout)
                .with_output_format(format.into())
                .with_session_continuity(!no_resume)
                .with_session_expiry_hours(session_expiry);
            config.allowed_tools = allowed_tools;

            run_loop(config).await
        }
        Commands::Status => show_status(&project_path),
        Commands::Reset { session, reason } => reset_state(&project_path, session, &reason),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run_loop(config: LoopConfig) -> Result<(), VigilError> {
    let collaborators = operations::standard(&config)?;
    let mut orchestrator = LoopOrchestrator::new(config, collaborators)?;

    let outcome = tokio::select! {
        result = orchestrator.run() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(Ok(reason)) => {
            println!(
                "{} Loop stopped gracefully after {} iterations: {}",
                "Done:".green().bold(),
                orchestrator.loop_count(),
                reason
            );
            Ok(())
        }
        Some(Err(e)) => {
            orchestrator.shutdown();
            Err(e)
        }
        None => {
            println!("\n{} Interrupted, cleaning up", "Info:".blue());
            orchestrator.shutdown();
            Ok(())
        }
    }
}

fn show_status(project_path: &std::path::Path) -> Result<(), VigilError> {
    let state_dir = project_path.join(vigil::STATE_DIR_NAME);

    match StatusWriter::new(&state_dir).read()? {
        Some(snapshot) => {
            println!("{}", "Loop status".bold());
            println!("  status:     {}", snapshot.status);
            println!("  loops:      {}", snapshot.loop_count);
            println!(
                "  calls:      {}/{} this hour (resets {})",
                snapshot.calls_made_this_hour,
                snapshot.max_calls_per_hour,
                snapshot.next_reset.format("%H:%M UTC")
            );
            println!("  last:       {}", snapshot.last_action);
            if let Some(reason) = &snapshot.exit_reason {
                println!("  exit:       {reason}");
            }
            println!("  as of:      {}", snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => println!("No status recorded yet."),
    }

    let breaker = CircuitBreaker::load(&state_dir)?;
    let state = breaker.state();
    println!("{}", "Circuit breaker".bold());
    println!("  state:      {}", breaker.circuit_state());
    if !state.reason.is_empty() {
        println!("  reason:     {}", state.reason);
    }
    println!("  opens:      {}", state.total_opens);

    Ok(())
}

fn reset_state(project_path: &std::path::Path, session: bool, reason: &str) -> Result<(), VigilError> {
    let state_dir = project_path.join(vigil::STATE_DIR_NAME);

    let mut breaker = CircuitBreaker::load(&state_dir)?;
    let was = breaker.circuit_state();
    breaker.reset(reason)?;
    println!(
        "{} Circuit breaker reset ({} -> {})",
        "Done:".green().bold(),
        was,
        breaker.circuit_state()
    );

    if session {
        let mut manager = SessionLifecycleManager::load(&state_dir, 24)?;
        manager.reset(reason, 0)?;
        println!("{} Session reset", "Done:".green().bold());
    }

    Ok(())
}
