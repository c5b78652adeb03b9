use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};

use deep_search::sources::{collect_sources, render_sources, uncited};
use deep_search::{Config, LlmClient, ResearchAgent, TavilyClient, TextGenerator};

/// Deep web research from the command line
#[derive(Parser, Debug)]
#[command(name = "deep-search", version, about, long_about = None)]
struct Cli {
    /// Research query
    #[arg(required_unless_present_any = ["resume", "show_config"])]
    query: Option<String>,

    /// Continue from a saved state file
    #[arg(long, value_name = "STATE_JSON")]
    resume: Option<PathBuf>,

    /// Reflection passes per section (overrides MAX_REFLECTIONS)
    #[arg(long)]
    max_reflections: Option<u32>,

    /// Do not write the report to the output directory
    #[arg(long)]
    no_save: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(max) = cli.max_reflections {
        config.max_reflections = max;
    }

    if cli.show_config {
        println!("{}", config.summary());
        return Ok(());
    }
    config.validate().context("invalid configuration")?;

    let api_key = config.llm_api_key().unwrap_or_default().to_string();
    let llm = LlmClient::new(
        config.provider,
        api_key,
        Some(config.llm_model().to_string()),
        config.llm_base_url.clone(),
    )
    .context("failed to create LLM client")?;
    info!(provider = %config.provider, model = config.llm_model(), "LLM client initialized");
    info!("Using LLM: {}", llm.model_info());

    let tavily_key = config.tavily_api_key.clone().unwrap_or_default();
    let search = TavilyClient::new(tavily_key).context("failed to create search client")?;

    let save_report = !cli.no_save;
    let mut agent = ResearchAgent::new(config, Arc::new(llm), Arc::new(search));

    let outcome = match (&cli.resume, &cli.query) {
        (Some(path), _) => agent
            .resume_from(path, save_report)
            .await
            .with_context(|| format!("failed to resume from {}", path.display()))?,
        (None, Some(query)) => agent
            .research(query, save_report)
            .await
            .with_context(|| format!("research failed for '{}'", query))?,
        (None, None) => anyhow::bail!("a query or --resume is required"),
    };

    let progress = agent.progress();
    println!(
        "Sections: {}/{} complete ({:.0}%)",
        progress.completed_sections, progress.total_sections, progress.progress_percentage
    );
    if let Some(path) = &outcome.report_path {
        println!("Report saved to {}", path.display());
    } else {
        println!("\n{}", outcome.report);
    }
    if let Some(path) = &outcome.state_path {
        println!("State saved to {}", path.display());
    }

    if !outcome.degradations.is_empty() {
        warn!(count = outcome.degradations.len(), "Some stages used fallback output");
        println!("\nFallbacks used:");
        for degradation in &outcome.degradations {
            println!("  - {}", degradation);
        }
    }

    let sources = collect_sources(agent.state());
    let missing: Vec<_> = uncited(&sources, &outcome.report).into_iter().cloned().collect();
    if !missing.is_empty() {
        println!("\nSources ({}):\n{}", missing.len(), render_sources(&missing));
    }

    Ok(())
}
