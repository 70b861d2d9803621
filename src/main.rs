use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use logos_author::agent::{ConsoleAgent, SessionOutcome};
use logos_author::cli::{Cli, Command};
use logos_author::config::render::{render_config_human, render_config_json};
use logos_author::config::{ProjectConfig, ProviderKind};
use logos_author::log::ExecutionLog;
use logos_author::provider::provider_from_config;
use logos_author::tasks::{ResearchProps, ResearchState, research_workflow};

fn main() {
    let code = match real_main() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("\x1b[31m[logos]\x1b[0m error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn real_main() -> Result<i32> {
    let cli = Cli::parse();
    let quiet_by_default = matches!(
        &cli.command,
        Command::Config { .. } | Command::Workflow { .. }
    );

    let filter = match cli.verbose {
        0 if quiet_by_default => "logos_author=warn",
        0 => "logos_author=info",
        1 => "logos_author=debug",
        _ => "logos_author=trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to determine current directory")?;
    let (mut config, config_path) = ProjectConfig::load(&cwd)?;
    if let Some(path) = &config_path {
        info!(path = %path.display(), "loaded config");
    }

    match cli.command {
        Command::Run {
            provider,
            model,
            command,
        } => {
            if let Some(kind) = provider {
                config.provider.kind = kind;
            }
            if let Some(model) = model {
                config.provider.set_model(model);
            }
            if let Some((program, args)) = command.split_first() {
                config.session.program = program.clone();
                config.session.args = args.to_vec();
            }
            run_console(&config, config_path.as_deref(), &cwd)
        }
        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", render_config_human(&config, config_path.as_deref()));
            }
            Ok(0)
        }
        Command::Workflow { targets, prompt } => {
            walk_research(&targets, prompt)?;
            Ok(0)
        }
    }
}

fn run_console(config: &ProjectConfig, config_path: Option<&Path>, cwd: &Path) -> Result<i32> {
    let detector = config.prompt.detector()?;
    let provider = provider_from_config(&config.provider)?;

    let log_path = config.log_path(config_path, cwd);
    let log = match ExecutionLog::new(&log_path) {
        Ok(log) => Some(Arc::new(log)),
        Err(e) => {
            warn!("execution log disabled: {e:#}");
            None
        }
    };

    let provider_label = match config.provider.kind {
        ProviderKind::Openai => "hosted",
        ProviderKind::Ollama => "self-hosted",
    };
    eprintln!(
        "\x1b[36m[logos]\x1b[0m {} driven by {} ({provider_label})",
        config.session.program,
        provider.name()
    );
    if let Some(log) = &log {
        eprintln!("\x1b[36m[logos]\x1b[0m log: {}", log.path().display());
    }

    let mut agent = ConsoleAgent::new(config.session.clone(), detector, Arc::from(provider));
    if let Some(log) = log {
        agent = agent.with_log(log);
    }

    let outcome = agent.run()?;
    match &outcome {
        SessionOutcome::Success => eprintln!("\r\n\x1b[32m[logos]\x1b[0m console exited cleanly"),
        SessionOutcome::Failure { code, signal } => match signal {
            Some(sig) => eprintln!("\r\n\x1b[31m[logos]\x1b[0m console killed by {sig}"),
            None => eprintln!("\r\n\x1b[31m[logos]\x1b[0m console exited with code {code}"),
        },
        SessionOutcome::Interrupted => eprintln!("\r\n\x1b[33m[logos]\x1b[0m interrupted"),
    }
    Ok(outcome.exit_code())
}

fn walk_research(targets: &[ResearchState], prompt: String) -> Result<()> {
    let mut workflow = research_workflow(ResearchProps {
        prompt,
        context: String::new(),
    })?;
    println!("start: {}", workflow.current());

    for target in targets {
        let from = *workflow.current();
        workflow
            .transition(*target)
            .with_context(|| format!("cannot move research task from {from} to {target}"))?;
        println!("{from} -> {target}");
    }

    let next: Vec<String> = workflow.targets().iter().map(|s| s.to_string()).collect();
    if next.is_empty() {
        println!("done: {} is final", workflow.current());
    } else {
        println!("next: {}", next.join(" | "));
    }
    Ok(())
}
