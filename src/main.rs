use anyhow::{Context, Result};
use botdialog::config::HarnessConfig;
use botdialog::logging::init_tracing;
use botdialog::{FailurePolicy, ScriptParser};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "botdialog",
    about = "Validate botdialog scenario scripts and print their step plan",
    version
)]
struct Args {
    /// Scenario script files
    #[arg(required = true)]
    scripts: Vec<PathBuf>,

    /// Default step timeout in seconds (overrides DEFAULT_TIMEOUT)
    #[arg(short = 't', long)]
    default_timeout: Option<f64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = HarnessConfig::from_env().context("Failed to load configuration")?;

    init_tracing(args.log_level.as_deref().unwrap_or(&config.log_level))?;

    let default_timeout = match args.default_timeout {
        Some(secs) => Duration::try_from_secs_f64(secs).context("Invalid --default-timeout")?,
        None => config.default_timeout,
    };
    let parser = ScriptParser::new(default_timeout);

    for path in &args.scripts {
        let scenario = parser
            .parse_file(path)
            .with_context(|| format!("Failed to parse script file: {}", path.display()))?;

        let policy = match scenario.policy {
            FailurePolicy::FailFast => "fail-fast",
            FailurePolicy::ContinueOnFailure => "continue",
        };
        println!(
            "{} ({} steps, {policy})",
            scenario.name,
            scenario.steps.len()
        );
        for (i, step) in scenario.steps.iter().enumerate() {
            println!("  {:>3}. {}", i + 1, step);
        }
    }

    Ok(())
}
