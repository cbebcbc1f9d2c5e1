use anyhow::{Context as _, Result};
use flowline::cli::commands::{param_value, RunCommand, ValidateCommand};
use flowline::cli::output::*;
use flowline::cli::{Cli, Command};
use flowline::{Factory, FlowConfig};
use std::time::Duration;
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new(Level::DEBUG.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.as_str()))
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_flow(cmd).await?,
        Command::Validate(cmd) => validate_flow(cmd)?,
    }

    Ok(())
}

async fn run_flow(cmd: &RunCommand) -> Result<()> {
    let config = FlowConfig::from_file(&cmd.file).context("Failed to load flow config")?;

    println!("{} Loaded flow: {}", INFO, style(&config.name).bold());

    let factory = Factory::new();
    let line = factory
        .new_line(config.to_handlers())
        .context("Failed to register flow stages")?;

    let mut params = config.initial_params();
    for (key, value) in &cmd.param {
        params.insert(key.clone(), param_value(value));
        println!(
            "{} Parameter override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let runs = cmd.runs.unwrap_or(config.runs);
    println!(
        "{} Starting {} run(s) of {} stages",
        ROCKET,
        style(runs).cyan(),
        style(config.stages.len()).cyan()
    );

    let mut run_ids = Vec::with_capacity(runs);
    for _ in 0..runs {
        run_ids.push(factory.start(line, params.clone())?);
    }

    let finished = tokio::time::timeout(Duration::from_secs(cmd.timeout_secs), factory.wait_all())
        .await
        .is_ok();

    println!();
    for run in &run_ids {
        let ctx = factory.context(*run)?;
        println!("{}", format_run(*run, &ctx));
        print!("{}", format_params(&ctx));
        print!("{}", format_errors(&ctx));
    }

    if !finished {
        let stalled = run_ids
            .iter()
            .filter(|run| !factory.is_stopped(**run).unwrap_or(true))
            .count();
        factory.destroy();
        println!(
            "\n{} {} run(s) still active after {}s, aborted",
            WARN,
            style(stalled).yellow(),
            cmd.timeout_secs
        );
        error!("Flow '{}' timed out", config.name);
        std::process::exit(1);
    }

    println!(
        "\n{} {} finished {}",
        CHECK,
        style(&config.name).bold(),
        style("all runs").green()
    );
    Ok(())
}

fn validate_flow(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating flow...", INFO);

    match FlowConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Flow configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Runs: {}", style(config.runs).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}
