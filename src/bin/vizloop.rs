use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use vizloop::{AgentConfig, DataAnalysisAgent, RunOutcome};

/// Generate a visualization from a natural-language data-analysis request
#[derive(Debug, Parser)]
#[command(name = "vizloop", version)]
struct Cli {
    /// The analysis request, e.g. "scatter plot of sepal length vs width"
    task: String,

    /// JSON config file; environment variables and flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    max_iterations: Option<u32>,

    /// Per-execution timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Where produced artifacts are stored
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    model: Option<String>,

    /// Python interpreter to run generated code with
    #[arg(long)]
    python: Option<PathBuf>,

    /// Print the full run report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_file(path)?,
            None => AgentConfig::default(),
        };
        config.apply_env()?;

        if let Some(v) = self.max_iterations {
            config.max_iterations = v;
        }
        if let Some(v) = self.timeout {
            config.execution_timeout_secs = v;
        }
        if let Some(v) = &self.output_dir {
            config.output_dir = v.clone();
        }
        if let Some(v) = &self.model {
            config.reasoner.model = v.clone();
        }
        if let Some(v) = &self.python {
            config.python_path = Some(v.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vizloop=info".to_string()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.load_config().context("failed to load configuration")?;
    let agent = DataAnalysisAgent::from_config(&config).context("failed to set up agent")?;

    let report = agent.run(&cli.task).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    let code = match &report.outcome {
        RunOutcome::Success {
            artifact_path,
            iterations,
        } => {
            if !cli.json {
                println!("Plot saved to {}", artifact_path.display());
                println!("Total iterations: {iterations}");
            }
            ExitCode::SUCCESS
        }
        RunOutcome::Exhausted { iterations } => {
            if !cli.json {
                println!("Could not complete the task in {iterations} iterations");
            }
            ExitCode::from(1)
        }
        RunOutcome::Fatal { error } => {
            eprintln!("Reasoning failed: {error}");
            ExitCode::from(2)
        }
    };
    Ok(code)
}
