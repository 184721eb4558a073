//! Real implementations of the collaborator traits.
//!
//! These are the production counterparts of the mocks in [`crate::testing`]:
//! the `claude` CLI process, a `git`-backed change counter, a markdown
//! checklist reader, and console display/operator endpoints.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::{LoopConfig, OutputFormat};
use crate::error::{Result, VigilError};
use crate::orchestrator::Collaborators;
use crate::testing::{
    AgentOutput, AgentRunner, ChangeCounter, ChecklistCounts, OperatorChoice, OperatorPrompt,
    ProgressDisplay, TaskListSource,
};

/// Wires the production collaborator set for the given configuration.
///
/// # Errors
///
/// Returns [`VigilError::MissingTool`] when the agent binary is not on PATH.
pub fn standard(config: &LoopConfig) -> Result<Collaborators> {
    Ok(Collaborators {
        agent: Arc::new(ClaudeCliRunner::discover(config)?),
        changes: Arc::new(GitChangeCounter::new(&config.project_dir)),
        tasks: Arc::new(PlanChecklist::new(config.project_dir.join("PLAN.md"))),
        display: Arc::new(ConsoleDisplay::new()),
        operator: Arc::new(ConsoleOperator),
    })
}

/// Runs the `claude` CLI as the external agent.
#[derive(Debug)]
pub struct ClaudeCliRunner {
    binary: PathBuf,
    project_dir: PathBuf,
    output_format: OutputFormat,
    allowed_tools: Vec<String>,
}

impl ClaudeCliRunner {
    /// Discovers the agent binary on PATH and builds a runner.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::MissingTool`] when the binary is absent.
    pub fn discover(config: &LoopConfig) -> Result<Self> {
        let binary = which::which("claude").map_err(|_| VigilError::MissingTool {
            tool: "claude".to_string(),
        })?;
        Ok(Self {
            binary,
            project_dir: config.project_dir.clone(),
            output_format: config.output_format,
            allowed_tools: config.allowed_tools.clone(),
        })
    }
}

#[async_trait]
impl AgentRunner for ClaudeCliRunner {
    async fn run_iteration(&self, prompt: &str, resume: Option<&str>) -> Result<AgentOutput> {
        let mut args: Vec<String> = vec!["-p".to_string()];
        if self.output_format == OutputFormat::Structured {
            args.push("--output-format".to_string());
            args.push("json".to_string());
        }
        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.allowed_tools.join(","));
        }
        if let Some(token) = resume {
            args.push("--resume".to_string());
            args.push(token.to_string());
        }

        debug!("Spawning {} {:?}", self.binary.display(), args);

        // kill_on_drop lets the deadline wrapper reap the worker by simply
        // dropping this future.
        let mut child = tokio::process::Command::new(&self.binary)
            .args(&args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.flush().await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            stdout = String::from_utf8_lossy(&output.stderr).into_owned();
        }

        Ok(AgentOutput {
            stdout,
            exit_code: output.status.code().unwrap_or(1),
        })
    }
}

/// Counts changed files via `git status --porcelain`.
#[derive(Debug)]
pub struct GitChangeCounter {
    project_dir: PathBuf,
}

impl GitChangeCounter {
    /// Creates a counter for the given project directory.
    #[must_use]
    pub fn new<P: AsRef<Path>>(project_dir: P) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
        }
    }
}

impl ChangeCounter for GitChangeCounter {
    fn changed_files(&self) -> Result<u32> {
        let output = std::process::Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(&self.project_dir)
            .output();

        match output {
            Ok(out) if out.status.success() => {
                let count = String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .count() as u32;
                Ok(count)
            }
            Ok(_) | Err(_) => {
                // Not a git repo, or git unavailable: no progress signal.
                debug!("git status unavailable in {}", self.project_dir.display());
                Ok(0)
            }
        }
    }
}

/// Reads `- [ ]` / `- [x]` checklist items from a markdown plan file.
#[derive(Debug)]
pub struct PlanChecklist {
    plan_path: PathBuf,
}

impl PlanChecklist {
    /// Creates a reader for the given plan file.
    #[must_use]
    pub fn new<P: AsRef<Path>>(plan_path: P) -> Self {
        Self {
            plan_path: plan_path.as_ref().to_path_buf(),
        }
    }
}

impl TaskListSource for PlanChecklist {
    fn checklist(&self) -> Result<Option<ChecklistCounts>> {
        if !self.plan_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.plan_path)?;
        let mut total = 0u32;
        let mut checked = 0u32;
        for line in content.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("- [ ]") {
                total += 1;
            } else if trimmed.starts_with("- [x]") || trimmed.starts_with("- [X]") {
                total += 1;
                checked += 1;
            }
        }
        Ok(Some(ChecklistCounts { total, checked }))
    }
}

/// Console display: colored status lines plus a spinner for waits.
#[derive(Debug)]
pub struct ConsoleDisplay {
    spinner: ProgressBar,
}

impl ConsoleDisplay {
    /// Creates the display.
    #[must_use]
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { spinner }
    }
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressDisplay for ConsoleDisplay {
    fn status_line(&self, message: &str) {
        self.spinner.suspend(|| {
            println!("   {} {}", "Info:".blue(), message);
        });
    }

    fn wait_tick(&self, remaining_secs: u64, message: &str) {
        self.spinner.tick();
        self.spinner.set_message(format!(
            "{} ({}m{:02}s remaining)",
            message,
            remaining_secs / 60,
            remaining_secs % 60
        ));
    }
}

/// Operator prompt on the controlling terminal.
///
/// When stdin is closed (truly unattended runs), the answer defaults to
/// waiting rather than aborting.
#[derive(Debug, Default)]
pub struct ConsoleOperator;

impl OperatorPrompt for ConsoleOperator {
    fn wait_or_abort(&self, message: &str) -> Result<OperatorChoice> {
        println!("   {} {}", "Attention:".yellow(), message);
        println!("   [w]ait for the window to reset, or [a]bort? ");

        let mut line = String::new();
        let stdin = std::io::stdin();
        match stdin.lock().read_line(&mut line) {
            Ok(_) if line.trim().eq_ignore_ascii_case("a") => Ok(OperatorChoice::Abort),
            _ => Ok(OperatorChoice::Wait),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn checklist_counts_items() {
        let temp = TempDir::new().unwrap();
        let plan = temp.path().join("PLAN.md");
        std::fs::write(
            &plan,
            "# Plan\n- [x] first\n- [ ] second\n  - [X] nested\nprose line\n",
        )
        .unwrap();

        let counts = PlanChecklist::new(&plan).checklist().unwrap().unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.checked, 2);
        assert!(!counts.all_complete());
    }

    #[test]
    fn missing_plan_is_none() {
        let temp = TempDir::new().unwrap();
        let checklist = PlanChecklist::new(temp.path().join("PLAN.md"));
        assert!(checklist.checklist().unwrap().is_none());
    }

    #[test]
    fn change_counter_outside_repo_is_zero() {
        let temp = TempDir::new().unwrap();
        let counter = GitChangeCounter::new(temp.path());
        assert_eq!(counter.changed_files().unwrap(), 0);
    }
}
