//! Command-line surface.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::ai;
use crate::autofix::{parse_script, AutoFixReport, AutoFixer, ATTEMPTS_EXHAUSTED};
use crate::config::Config;
use crate::executor::{CommandRunner, ShellRunner};
use crate::fixer::{CheckpointedFixer, FixResult};
use crate::journal::FixJournal;
use crate::knowledge::{embeddings, KnowledgeIndex};
use crate::search::{Explanation, SolutionAggregator};

/// Explain and repair failing shell commands
#[derive(Parser, Debug)]
#[command(name = "shellmend")]
#[command(version)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command and try to repair it when it fails
    Fix {
        command: String,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Apply fixes without git checkpoints
        #[arg(long)]
        no_git: bool,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Run every command of a script file with auto-fix
    FixScript {
        file: PathBuf,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        #[arg(long)]
        no_git: bool,
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Run a command and explain its failure without fixing anything
    Explain {
        command: String,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Add an entry to the knowledge base
    Learn {
        content: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        url: Option<String>,
        /// Command that resolves the problem described by the entry
        #[arg(long)]
        command: Option<String>,
    },
    /// Show recent fix attempts
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

/// Runs the parsed command. `Ok(false)` means the work itself failed.
pub async fn run(cli: Cli, config: Config) -> Result<bool> {
    match cli.command {
        Commands::Fix {
            command,
            project_dir,
            no_git,
            max_attempts,
        } => {
            let max_attempts = max_attempts.unwrap_or(config.fixer.max_attempts);
            let mut auto_fixer = auto_fixer(&config, &project_dir, !no_git).await?;
            println!("{} {}", "Running:".bold(), command);
            let report = auto_fixer.run_with_report(&command, max_attempts).await;
            print_report(&command, &report);
            Ok(report.success)
        }
        Commands::FixScript {
            file,
            project_dir,
            no_git,
            continue_on_error,
        } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read script {}", file.display()))?;
            let commands = parse_script(&text);
            if commands.is_empty() {
                return Err(anyhow!("No commands found in {}", file.display()));
            }

            let mut auto_fixer = auto_fixer(&config, &project_dir, !no_git).await?;
            let results = auto_fixer
                .run_script(&commands, continue_on_error, config.fixer.max_attempts)
                .await;

            println!();
            println!("{}", "Summary:".bold());
            for (command, success) in &results {
                let status = if *success { "ok".green() } else { "failed".red() };
                println!("  [{}] {}", status, command);
            }
            let succeeded = results.iter().filter(|(_, success)| *success).count();
            println!(
                "Commands: {}, Succeeded: {}, Failed: {}",
                results.len(),
                succeeded,
                results.len() - succeeded
            );
            Ok(results.len() == commands.len() && succeeded == results.len())
        }
        Commands::Explain {
            command,
            project_dir,
        } => {
            let project_dir = resolve_dir(&project_dir)?;
            let runner = ShellRunner::from_config(&config);
            let result = runner
                .run(&command, &project_dir)
                .await
                .unwrap_or_else(Into::into);
            if result.success {
                println!("{}", "Command succeeded, nothing to explain.".green());
                return Ok(true);
            }

            let knowledge = open_knowledge(&config).await?.map(Arc::new);
            let aggregator = SolutionAggregator::from_config(&config, knowledge);
            let record = aggregator
                .analyze(&command, result.return_code, result.error_output())
                .await;
            print_explanation(&aggregator.explain(&record).await);
            Ok(false)
        }
        Commands::Learn {
            content,
            title,
            url,
            command,
        } => {
            let mut index = open_knowledge(&config)
                .await?
                .ok_or_else(|| anyhow!("The knowledge base is disabled in the config"))?;
            let mut metadata = Map::new();
            for (key, value) in [("title", title), ("url", url), ("command", command)] {
                if let Some(value) = value {
                    metadata.insert(key.to_string(), Value::String(value));
                }
            }
            let item_id = index.add_item(content, metadata).await?;
            index.flush()?;
            println!("{} {}", "Stored".green().bold(), item_id);
            Ok(true)
        }
        Commands::History { limit } => {
            let journal = FixJournal::new(config.journal_dir()?);
            let entries = journal.recent(limit).await?;
            if entries.is_empty() {
                println!("No fix attempts recorded yet.");
            }
            for entry in entries {
                let status = if entry.result.success {
                    "succeeded".green()
                } else {
                    format!("{:?}", entry.result.attempt.status).to_lowercase().yellow()
                };
                println!(
                    "{}  {}  [{}]  {}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.command.bold(),
                    status,
                    entry.result.description
                );
            }
            Ok(true)
        }
    }
}

fn resolve_dir(dir: &Path) -> Result<PathBuf> {
    dir.canonicalize()
        .with_context(|| format!("Project directory {} does not exist", dir.display()))
}

async fn auto_fixer(config: &Config, project_dir: &Path, use_git: bool) -> Result<AutoFixer> {
    let project_dir = resolve_dir(project_dir)?;
    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::from_config(config));
    let fixer = CheckpointedFixer::from_config(config, &project_dir, runner.clone(), use_git)
        .await?
        .with_language_model(ai::from_config(config));
    info!(dir = %project_dir.display(), git = fixer.git_enabled(), "auto-fixer ready");

    Ok(AutoFixer::new(runner, fixer)
        .with_backoff(Duration::from_millis(config.fixer.retry_backoff_ms))
        .with_journal(FixJournal::new(config.journal_dir()?)))
}

async fn open_knowledge(config: &Config) -> Result<Option<KnowledgeIndex>> {
    if !config.knowledge.enabled {
        return Ok(None);
    }
    let index = KnowledgeIndex::open(
        config.knowledge_dir()?,
        embeddings::from_config(config),
        config.knowledge.flush_batch,
    )
    .await?;
    Ok(Some(index))
}

fn print_fix(index: usize, fix: &FixResult) {
    let label = format!("Fix attempt {}:", index + 1);
    if fix.success {
        println!("{} {}", label.green().bold(), fix.description);
        if let Some(hash) = &fix.attempt.commit_hash {
            println!("  Changes committed: {}", hash);
        }
        for file in &fix.attempt.modified_files {
            println!("  - {}", file.display());
        }
    } else {
        println!("{} {}", label.red().bold(), fix.description);
    }
    if let Some(command) = &fix.command {
        println!("  Fix command: {}", command);
    }
}

fn print_report(command: &str, report: &AutoFixReport) {
    for (i, fix) in report.attempts.iter().enumerate() {
        print_fix(i, fix);
    }
    if report.success {
        let message = if report.attempts.is_empty() {
            "Command succeeded!"
        } else {
            "Command succeeded after auto-fix!"
        };
        println!("{}", message.green().bold());
        return;
    }

    eprintln!("{} {}", "Auto-fix failed:".red().bold(), ATTEMPTS_EXHAUSTED);
    eprintln!("{} {}", "Command:".bold(), command);
    if let Some(error) = &report.last_error {
        eprintln!("{}", error.trim_end());
    }
}

fn print_explanation(explanation: &Explanation) {
    println!("{}", explanation.title.red().bold());
    println!();
    println!("{}", explanation.explanation);

    if !explanation.common_causes.is_empty() {
        println!();
        println!("{}", "Common causes:".bold());
        for cause in &explanation.common_causes {
            println!("  - {}", cause);
        }
    }

    if !explanation.solutions.is_empty() {
        println!();
        println!("{}", "Suggested solutions:".bold());
        for (i, solution) in explanation.solutions.iter().enumerate() {
            println!("  {}. {}", i + 1, solution.description);
            if let Some(command) = solution.command_text() {
                let rendered = if solution.is_executable() {
                    command.cyan()
                } else {
                    command.dimmed()
                };
                println!("     $ {}", rendered);
            }
        }
    }

    if !explanation.sources.is_empty() {
        println!();
        println!("{}", "Sources:".bold());
        for source in &explanation.sources {
            println!(
                "  [{:.1}] {} ({}) {}",
                source.metrics.composite,
                source.title,
                source.source,
                source.url.blue()
            );
        }
    }

    for notice in &explanation.notices {
        println!(
            "{} {}: {}",
            "note:".yellow(),
            notice.provider,
            notice.reason
        );
    }
}
