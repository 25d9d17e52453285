use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::source_edit::{guard_property_access, hoist_conditional_hook};
use super::strategy::{FixStrategy, StrategyOutcome};
use super::workspace::WorkspaceJournal;
use crate::ai::prompts::{syntax_fix_prompt, SYNTAX_FIX_TEMPERATURE};
use crate::ai::{extract_code_block, LanguageModel};
use crate::diagnosis::extract::{DIRECTORY_PATH, FILE_PATH, LINE_NUMBER, PROPERTY_NAME, SOURCE_FILE};
use crate::diagnosis::templates::install_template;
use crate::diagnosis::{ErrorRecord, VariableResolver};
use crate::executor::CommandRunner;

const SYNTAX_FIX_TOKEN_CEILING: usize = 8192;
const SYNTAX_FIX_TOKEN_HEADROOM: usize = 500;

/// Everything a strategy handler may touch.
pub struct HandlerContext<'a> {
    pub project_dir: &'a Path,
    pub record: &'a ErrorRecord,
    pub runner: &'a dyn CommandRunner,
    pub llm: Option<&'a dyn LanguageModel>,
    pub resolver: &'a VariableResolver,
    pub journal: &'a mut WorkspaceJournal,
    pub pip_program: &'a str,
}

impl HandlerContext<'_> {
    fn variable(&self, name: &str) -> Option<String> {
        self.record.variable(name).map(str::to_string).or_else(|| {
            crate::diagnosis::ExtractionTable::shared().extract(
                name,
                &self.record.command,
                &self.record.raw_text,
            )
        })
    }

    fn line_number(&self) -> Result<usize> {
        let raw = self
            .variable(LINE_NUMBER)
            .ok_or_else(|| anyhow!("could not find a line number in the error output"))?;
        raw.parse()
            .with_context(|| format!("invalid line number '{}'", raw))
    }
}

pub async fn run(strategy: FixStrategy, ctx: HandlerContext<'_>) -> Result<StrategyOutcome> {
    debug!(%strategy, error_type = %ctx.record.error_type, "dispatching strategy");
    match strategy {
        FixStrategy::InstallDependency => install_dependency(ctx).await,
        FixStrategy::CreateMissingFileOrDir => create_missing(ctx),
        FixStrategy::FixPermissions => fix_permissions(ctx),
        FixStrategy::FixReactHook => fix_react_hook(ctx),
        FixStrategy::AddNullCheck => add_null_check(ctx),
        FixStrategy::FixSyntax => fix_syntax(ctx).await,
        FixStrategy::InitGitRepo => init_git_repo(ctx).await,
    }
}

async fn install_dependency(ctx: HandlerContext<'_>) -> Result<StrategyOutcome> {
    let record = ctx.record;
    let template = install_template(record.error_type)
        .ok_or_else(|| anyhow!("no install template for {}", record.error_type))?;

    let Some(command) = ctx
        .resolver
        .resolve_template(template, &record.command, &record.raw_text)
    else {
        return Ok(StrategyOutcome::failed(format!(
            "could not determine the package to install from '{}'",
            template
        )));
    };
    let command = match command.strip_prefix("pip ") {
        Some(rest) if ctx.pip_program != "pip" => format!("{} {}", ctx.pip_program, rest),
        _ => command,
    };

    info!(%command, "installing dependency");
    let result = ctx.runner.run(&command, ctx.project_dir).await?;
    if !result.success {
        return Ok(StrategyOutcome::failed(format!(
            "'{}' exited with {}: {}",
            command,
            result.return_code,
            result.error_output().trim()
        ))
        .with_command(command));
    }

    let modified_files = if command.starts_with("npm ") {
        ["package.json", "package-lock.json"]
            .into_iter()
            .filter(|name| ctx.project_dir.join(name).exists())
            .map(PathBuf::from)
            .collect()
    } else {
        Vec::new()
    };
    Ok(StrategyOutcome::succeeded(format!("Ran {}", command), modified_files).with_command(command))
}

fn create_missing(mut ctx: HandlerContext<'_>) -> Result<StrategyOutcome> {
    let raw = ctx
        .variable(DIRECTORY_PATH)
        .ok_or_else(|| anyhow!("could not find the missing path in the error output"))?;
    let path = Path::new(&raw);
    let wants_directory = raw.ends_with('/') || raw.ends_with('\\') || path.extension().is_none();

    let relative = ctx.journal.relative(path);
    if wants_directory {
        ctx.journal.create_dir_all(path)?;
        Ok(StrategyOutcome::succeeded(
            format!("Created directory {}", relative.display()),
            vec![relative],
        ))
    } else {
        ctx.journal.create_file(path)?;
        Ok(StrategyOutcome::succeeded(
            format!("Created file {}", relative.display()),
            vec![relative],
        ))
    }
}

fn fix_permissions(mut ctx: HandlerContext<'_>) -> Result<StrategyOutcome> {
    let raw = ctx
        .variable(FILE_PATH)
        .ok_or_else(|| anyhow!("could not find the affected path in the error output"))?;
    let target = ctx.journal.resolve(&raw);
    let relative = ctx.journal.relative(&raw);
    let metadata = std::fs::metadata(&target)
        .with_context(|| format!("{} does not exist", target.display()))?;

    if metadata.is_dir() {
        let entries: Vec<PathBuf> = WalkDir::new(&target)
            .into_iter()
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|entry| entry.into_path())
            .collect();
        for entry in &entries {
            ctx.journal.set_mode(entry, 0o755)?;
        }
        Ok(StrategyOutcome::succeeded(
            format!("Set {} to 755 recursively ({} entries)", relative.display(), entries.len()),
            vec![relative],
        ))
    } else {
        let mode = current_mode(&metadata) | 0o111;
        ctx.journal.set_mode(&target, mode)?;
        Ok(StrategyOutcome::succeeded(
            format!("Made {} executable", relative.display()),
            vec![relative],
        ))
    }
}

#[cfg(unix)]
fn current_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn current_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

fn source_location(ctx: &HandlerContext<'_>) -> Result<(String, usize)> {
    let file = ctx
        .variable(SOURCE_FILE)
        .ok_or_else(|| anyhow!("could not find the source file in the error output"))?;
    Ok((file, ctx.line_number()?))
}

fn fix_react_hook(mut ctx: HandlerContext<'_>) -> Result<StrategyOutcome> {
    let (file, line) = source_location(&ctx)?;
    let source = ctx.journal.read_to_string(&file)?;
    let Some(fixed) = hoist_conditional_hook(&source, line) else {
        return Ok(StrategyOutcome::failed(format!(
            "no conditional hook call found near {}:{}",
            file, line
        )));
    };

    ctx.journal.write(&file, fixed)?;
    let relative = ctx.journal.relative(&file);
    Ok(StrategyOutcome::succeeded(
        format!("Moved hook call out of conditional in {}", relative.display()),
        vec![relative],
    ))
}

fn add_null_check(mut ctx: HandlerContext<'_>) -> Result<StrategyOutcome> {
    let (file, line) = source_location(&ctx)?;
    let property = ctx
        .variable(PROPERTY_NAME)
        .ok_or_else(|| anyhow!("could not find the property name in the error output"))?;
    let source = ctx.journal.read_to_string(&file)?;
    let Some((fixed, object)) = guard_property_access(&source, line, &property) else {
        return Ok(StrategyOutcome::failed(format!(
            "no access to '{}' found near {}:{}",
            property, file, line
        )));
    };

    ctx.journal.write(&file, fixed)?;
    let relative = ctx.journal.relative(&file);
    Ok(StrategyOutcome::succeeded(
        format!("Guarded {}.{} in {}", object, property, relative.display()),
        vec![relative],
    ))
}

async fn fix_syntax(mut ctx: HandlerContext<'_>) -> Result<StrategyOutcome> {
    let Some(llm) = ctx.llm else {
        bail!("fixing syntax errors needs a language model");
    };
    let (file, line) = source_location(&ctx)?;
    let source = ctx.journal.read_to_string(&file)?;

    let prompt = syntax_fix_prompt(&ctx.record.raw_text, &source, line);
    let max_tokens = (source.len() + SYNTAX_FIX_TOKEN_HEADROOM).min(SYNTAX_FIX_TOKEN_CEILING) as u32;
    let reply = llm
        .complete(&prompt, None, SYNTAX_FIX_TEMPERATURE, max_tokens)
        .await
        .context("language model could not fix the syntax error")?;

    let mut fixed = extract_code_block(&reply);
    if fixed.trim().is_empty() {
        bail!("language model returned an empty file");
    }
    if source.ends_with('\n') && !fixed.ends_with('\n') {
        fixed.push('\n');
    }

    ctx.journal.write(&file, fixed)?;
    let relative = ctx.journal.relative(&file);
    Ok(StrategyOutcome::succeeded(
        format!("Rewrote {} to fix the syntax error on line {}", relative.display(), line),
        vec![relative],
    ))
}

async fn init_git_repo(ctx: HandlerContext<'_>) -> Result<StrategyOutcome> {
    let command = "git init";
    let result = ctx.runner.run(command, ctx.project_dir).await?;
    if !result.success {
        return Ok(StrategyOutcome::failed(format!(
            "git init failed: {}",
            result.error_output().trim()
        ))
        .with_command(command));
    }
    Ok(StrategyOutcome::succeeded("Initialized a git repository", vec![PathBuf::from(".git")])
        .with_command(command))
}
