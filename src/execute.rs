use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use keg::error::KegError;
use keg::fetch::Fetcher;
use keg::formula::Formula;
use keg::install;
use keg::orchestrator::{Options, Orchestrator, PipelineError};
use keg::platform::Platform;
use keg::smoke::TestStatus;
use time::format_description::well_known::Rfc3339;

use crate::cli::{Cli, KegCommand};

/// Dispatches a parsed command line and returns the process exit code.
pub fn execute(cli: Cli) -> Result<i32> {
    match cli.command {
        KegCommand::Install {
            formula,
            prefix,
            staging,
            platform,
            keep_sandbox,
            quiet,
        } => execute_install(formula, prefix, staging, platform, keep_sandbox, quiet),
        KegCommand::Uninstall { name, prefix } => execute_uninstall(&name, prefix),
        KegCommand::List { prefix, verbose } => execute_list(prefix, verbose),
        KegCommand::Which { name, prefix } => execute_which(&name, prefix),
        KegCommand::Info { formula } => execute_info(formula),
    }
}

fn execute_install(
    formula_path: PathBuf,
    prefix: Option<PathBuf>,
    staging: Option<PathBuf>,
    platform: Option<String>,
    keep_sandbox: bool,
    quiet: bool,
) -> Result<i32> {
    let formula = match Formula::load(&formula_path) {
        Ok(f) => f,
        Err(e) => return Ok(report_error(&e)),
    };
    let platform = match platform {
        Some(key) => match Platform::parse(&key) {
            Ok(p) => p,
            Err(e) => return Ok(report_error(&e)),
        },
        None => Platform::current(),
    };
    let options = Options {
        prefix: match prefix {
            Some(p) => p,
            None => install::default_prefix().context("no installation prefix available")?,
        },
        staging: match staging {
            Some(s) => s,
            None => Fetcher::default_staging().context("no staging directory available")?,
        },
        keep_sandbox,
        quiet,
    };

    let orchestrator = match Orchestrator::new(formula, platform, options) {
        Ok(o) => o,
        Err(e) => return Ok(report_error(&e)),
    };
    match orchestrator.run() {
        Ok(outcome) => {
            match &outcome.test {
                TestStatus::Passed => {
                    println!(
                        "{} {} {} installed ({})",
                        "ok:".green().bold(),
                        outcome.record.name,
                        outcome.record.version,
                        outcome.record.kind
                    );
                }
                TestStatus::Failed { status, tail } => {
                    println!(
                        "{} {} {} installed, but the smoke test failed ({status})",
                        "degraded:".yellow().bold(),
                        outcome.record.name,
                        outcome.record.version
                    );
                    for line in tail {
                        println!("  {line}");
                    }
                    println!("  keep it, or remove it with `keg uninstall {}`", outcome.record.name);
                }
            }
            Ok(outcome.exit_code())
        }
        Err(e) => Ok(report_pipeline_error(&e)),
    }
}

fn execute_uninstall(name: &str, prefix: Option<PathBuf>) -> Result<i32> {
    let prefix = resolve_prefix(prefix)?;
    match install::uninstall(&prefix, name) {
        Ok(Some(record)) => {
            println!("Uninstalled {} {}", record.name, record.version);
            Ok(0)
        }
        Ok(None) => {
            println!("{} is not installed", name);
            Ok(0)
        }
        Err(e) => Ok(report_error(&e)),
    }
}

fn execute_list(prefix: Option<PathBuf>, verbose: bool) -> Result<i32> {
    let prefix = resolve_prefix(prefix)?;
    let records = match install::list(&prefix) {
        Ok(r) => r,
        Err(e) => return Ok(report_error(&e)),
    };
    if records.is_empty() {
        println!("Nothing installed in {}", prefix.display());
        return Ok(0);
    }
    for record in records {
        println!("{}: {} ({})", record.name, record.version, record.kind);
        if verbose {
            println!("  # checksum: {}", record.checksum);
            if let Ok(ts) = record.installed_at.format(&Rfc3339) {
                println!("  installed at: {ts}");
            }
        }
    }
    Ok(0)
}

fn execute_which(name: &str, prefix: Option<PathBuf>) -> Result<i32> {
    let prefix = resolve_prefix(prefix)?;
    match install::current_dir(&prefix, name) {
        Some(current) => {
            println!("{}", current.display());
            Ok(0)
        }
        None => {
            println!("{} is not installed", name);
            Ok(1)
        }
    }
}

fn execute_info(formula_path: PathBuf) -> Result<i32> {
    let formula = match Formula::load(&formula_path) {
        Ok(f) => f,
        Err(e) => return Ok(report_error(&e)),
    };
    println!("{} {}", formula.name.bold(), formula.version);
    if !formula.description.is_empty() {
        println!("{}", formula.description);
    }
    if !formula.homepage.is_empty() {
        println!("{}", formula.homepage);
    }
    if !formula.license.is_empty() {
        println!("license: {}", formula.license);
    }
    println!("source: {}", formula.source.url);
    if formula.bottles.is_empty() {
        println!("bottles: none (always builds from source)");
    } else {
        println!("bottles:");
        for (key, bottle) in &formula.bottles {
            let marker = if bottle.any_os_version { " (any OS version)" } else { "" };
            println!("  {key}: {}{marker}", bottle.sha256);
        }
    }
    if !formula.build_dependencies.is_empty() {
        println!("build dependencies: {}", formula.build_dependencies.join(", "));
    }
    Ok(0)
}

fn resolve_prefix(prefix: Option<PathBuf>) -> Result<PathBuf> {
    match prefix {
        Some(p) => Ok(p),
        None => install::default_prefix().context("no installation prefix available"),
    }
}

fn report_error(error: &KegError) -> i32 {
    eprintln!("{} {error}", "error:".red().bold());
    for line in error.tail() {
        eprintln!("  {line}");
    }
    error.exit_code()
}

fn report_pipeline_error(error: &PipelineError) -> i32 {
    eprintln!("{} {error}", "error:".red().bold());
    for line in error.error.tail() {
        eprintln!("  {line}");
    }
    error.exit_code()
}
