//! Staged solution-architecture generator.
//!
//! `inceptor run` expands a problem statement into a multi-level solution by
//! prompting the configured backend; `inceptor context` shows the context tags
//! detected in a text; `inceptor init-config` writes a default `inceptor.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;

use inceptor::core::context::{ContextOverrides, extract_context};
use inceptor::core::types::Solution;
use inceptor::exit_codes;
use inceptor::io::config::{DEFAULT_CONFIG_FILE, InceptorConfig, load_config, write_config};
use inceptor::logging;
use inceptor::pipeline::Inceptor;

#[derive(Parser)]
#[command(
    name = "inceptor",
    version,
    about = "Staged solution-architecture generator"
)]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a layered solution for a problem statement.
    Run {
        problem: String,
        /// Number of levels to run (1-5); defaults to `pipeline.default_levels`.
        #[arg(short, long)]
        levels: Option<u8>,
        /// Extra context, e.g. `scale=enterprise` or `technology=["rust","redis"]`.
        #[arg(long = "context", value_name = "KEY=VALUE", value_parser = parse_context_pair)]
        context: Vec<(String, Value)>,
        /// Write the solution JSON here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the context tags detected in a text.
    Context { text: String },
    /// Write a default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            process::exit(parse_exit_code(&err));
        }
    };
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            process::exit(exit_codes::INVALID);
        }
    }
}

/// Usage errors exit `INVALID`; clap's own code 2 would read as a partial run.
fn parse_exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() {
        exit_codes::INVALID
    } else {
        exit_codes::OK
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            problem,
            levels,
            context,
            output,
        } => cmd_run(&cli.config, &problem, levels, context, output.as_deref()),
        Command::Context { text } => cmd_context(&text),
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
    }
}

fn cmd_run(
    config_path: &Path,
    problem: &str,
    levels: Option<u8>,
    context: Vec<(String, Value)>,
    output: Option<&Path>,
) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let levels = levels.unwrap_or(cfg.pipeline.default_levels);
    let overrides: ContextOverrides = context.into_iter().collect();

    let inceptor = Inceptor::from_config(&cfg).context("build backend")?;
    let solution = inceptor.inception(problem, levels, Some(&overrides))?;

    let json = solution.to_json_pretty().context("serialize solution")?;
    match output {
        Some(path) => {
            write_output(path, &json)?;
            eprintln!("wrote {}", path.display());
        }
        None => print!("{json}"),
    }
    report(&solution);

    if solution.is_complete() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::PARTIAL)
    }
}

fn cmd_context(text: &str) -> Result<i32> {
    let tags = extract_context(text);
    let json = serde_json::to_string_pretty(&tags).context("serialize context")?;
    println!("{json}");
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &InceptorConfig::default())?;
    eprintln!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// One-line summary plus recorded problems, on stderr.
fn report(solution: &Solution) {
    let reached = solution
        .reached()
        .map(|level| level.to_string())
        .unwrap_or_else(|| "none".to_string());
    eprintln!(
        "levels: {} requested, reached {reached}; tasks: {}",
        solution.metadata.max_levels,
        solution.tasks.len()
    );
    for failure in &solution.metadata.failures {
        eprintln!(
            "failed: {} {}: {}",
            failure.level,
            failure.task_id.as_deref().unwrap_or("-"),
            failure.message
        );
    }
    for fallback in &solution.metadata.fallbacks {
        eprintln!(
            "fallback: {} {}: {}",
            fallback.level,
            fallback.task_id.as_deref().unwrap_or("-"),
            fallback.error
        );
    }
    if let Some(error) = &solution.metadata.error {
        eprintln!("halted: {error}");
    }
}

/// Parse `KEY=VALUE`; the value is read as JSON when it parses, else as a string.
fn parse_context_pair(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_run_with_context_pairs() {
        let cli = Cli::parse_from([
            "inceptor",
            "run",
            "Build a logging system",
            "--levels",
            "2",
            "--context",
            "scale=enterprise",
            "--context",
            "technology=[\"rust\",\"redis\"]",
        ]);
        match cli.command {
            Command::Run {
                problem,
                levels,
                context,
                output,
            } => {
                assert_eq!(problem, "Build a logging system");
                assert_eq!(levels, Some(2));
                assert_eq!(
                    context,
                    vec![
                        ("scale".to_string(), json!("enterprise")),
                        ("technology".to_string(), json!(["rust", "redis"])),
                    ]
                );
                assert!(output.is_none());
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["inceptor", "init-config", "--force", "--config", "x.toml"]);
        assert!(matches!(cli.command, Command::InitConfig { force: true }));
        assert_eq!(cli.config, PathBuf::from("x.toml"));
    }

    #[test]
    fn usage_errors_exit_invalid_but_help_does_not() {
        let err = Cli::try_parse_from(["inceptor", "bogus"]).err().expect("unknown command");
        assert_eq!(parse_exit_code(&err), exit_codes::INVALID);
        let err = Cli::try_parse_from(["inceptor", "run", "x", "--levels", "abc"])
            .err()
            .expect("bad levels");
        assert_eq!(parse_exit_code(&err), exit_codes::INVALID);
        let err = Cli::try_parse_from(["inceptor", "--help"]).err().expect("help");
        assert_eq!(parse_exit_code(&err), exit_codes::OK);
    }

    #[test]
    fn context_pair_requires_key() {
        assert!(parse_context_pair("novalue").is_err());
        assert!(parse_context_pair("=x").is_err());
        assert_eq!(
            parse_context_pair("budget=5").expect("pair"),
            ("budget".to_string(), json!(5))
        );
    }
}
