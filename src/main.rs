//! covermatch - Main CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use covermatch::{
    cli::{self, Args, Commands, ConfigAction, Verbosity},
    config::{Config, EmbeddingBackend},
    providers::{Embedder, LocalEmbedder, OllamaClient, QdrantSearch},
    search::{SearchOrchestrator, SearchOutcome},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbosity());

    match &args.command {
        Commands::Search {
            profile,
            scope,
            json,
        } => {
            run_search(&args, profile, scope, *json).await?;
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            show_config(&args)?;
        }
        Commands::Config {
            action: ConfigAction::Init { force },
        } => {
            init_config(&args, *force)?;
        }
        Commands::Health => {
            run_health(&args).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(args: &Args) -> Result<Config> {
    Config::load(args.config.clone()).context("Failed to load configuration")
}

fn config_path(args: &Args) -> Result<PathBuf> {
    args.config
        .clone()
        .or_else(Config::default_path)
        .context("Could not determine home directory")
}

async fn run_search(args: &Args, profile_path: &Path, scope: &[String], json: bool) -> Result<()> {
    let config = load_config(args)?;
    let profile = cli::load_profile(profile_path)?;
    let scope = cli::normalize_scope(scope);

    let ollama = Arc::new(OllamaClient::with_config(
        &config.ollama.url,
        &config.ollama.model,
        &config.ollama.embedding_model,
    )?);
    let search = Arc::new(QdrantSearch::new(&config.qdrant.url, &config.qdrant.collection)?);

    let embedder: Arc<dyn Embedder> = match config.embedding.backend {
        EmbeddingBackend::Ollama => ollama.clone(),
        EmbeddingBackend::Local => {
            let model_id = config.embedding.local_model.clone();
            let local = tokio::task::spawn_blocking(move || LocalEmbedder::load(&model_id))
                .await
                .context("Embedding model loader panicked")??;
            Arc::new(local)
        }
    };

    let orchestrator = SearchOrchestrator::new(embedder, search, ollama, config.pipeline.clone());

    let spinner = if json || args.verbosity() == Verbosity::Quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} [{elapsed}]")
                .context("Invalid progress template")?,
        );
        pb.set_message(format!("Searching {} document(s)...", scope.len()));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    };

    let outcome = orchestrator.run_search(&profile, &scope).await;
    spinner.finish_and_clear();
    let outcome = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    Ok(())
}

fn print_outcome(outcome: &SearchOutcome) {
    let meta = &outcome.metadata;

    println!();
    if meta.limited_results {
        let reason = meta
            .limit_reason
            .map(|r| r.as_str())
            .unwrap_or("unknown");
        println!(
            "{} {} relevant document(s), limited by {}",
            "!".yellow().bold(),
            meta.relevant_count,
            reason.yellow()
        );
    } else {
        println!(
            "{} {} relevant document(s)",
            "✓".green().bold(),
            meta.relevant_count
        );
    }
    println!();

    for (rank, doc) in outcome.results.iter().enumerate() {
        let label = outcome
            .graded
            .iter()
            .find(|g| g.id() == doc.id)
            .map(|g| g.label.as_str())
            .unwrap_or("ungraded");
        let heading = match (doc.operator(), doc.plan_code()) {
            (Some(op), Some(code)) => format!("{} {}", op, code),
            (Some(op), None) => op.to_string(),
            (None, Some(code)) => code.to_string(),
            (None, None) => doc.id.clone(),
        };

        println!(
            "{:>2}. {} {} {}",
            rank + 1,
            heading.bold(),
            format!("(rrf {:.4}, sim {:.2})", doc.rrf_score, doc.similarity).dimmed(),
            label.cyan()
        );
        println!("    {}", snippet(&doc.content, 160));
    }

    println!();
    println!("{}", "Search summary".bold());
    println!("  Search id:      {}", meta.search_id);
    println!("  Queries:        {}", meta.query_count);
    println!("  Rounds:         {}", meta.retrieval_rounds);
    println!("  Rewrites:       {}", meta.rewrite_count);
    for (query, problem) in meta.rewritten_queries.iter().zip(&meta.rewrite_problems) {
        println!("    {} {}", format!("[{}]", problem).dimmed(), query);
    }
    println!(
        "  Candidates:     {} general, {} specific, {} fused",
        meta.general_candidates, meta.specific_candidates, meta.fused_count
    );
    println!(
        "  Graded:         {} ({} relevant, {} irrelevant)",
        meta.graded_count, meta.relevant_count, meta.irrelevant_count
    );
    println!("  Elapsed:        {} ms", meta.elapsed_ms);
}

fn snippet(content: &str, max_chars: usize) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

fn show_config(args: &Args) -> Result<()> {
    let config = load_config(args)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;

    if let Ok(path) = config_path(args) {
        let note = if path.exists() { "" } else { " (not found, using defaults)" };
        println!("{}", format!("# {}{}", path.display(), note).dimmed());
    }
    println!("{}", rendered);
    Ok(())
}

fn init_config(args: &Args, force: bool) -> Result<()> {
    let path = config_path(args)?;

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, use --force to overwrite",
            path.display()
        );
    }

    Config::default().save(&path)?;
    println!("{} Wrote {}", "✓".green().bold(), path.display());
    Ok(())
}

async fn run_health(args: &Args) -> Result<()> {
    let config = load_config(args)?;
    let client = OllamaClient::with_config(
        &config.ollama.url,
        &config.ollama.model,
        &config.ollama.embedding_model,
    )?;

    if client.health_check().await.unwrap_or(false) {
        println!("{} Ollama reachable at {}", "✓".green().bold(), client.base_url());
        Ok(())
    } else {
        eprintln!("{} Ollama is not reachable at {}", "✗".red().bold(), client.base_url());
        eprintln!("\nStart Ollama with: ollama serve");
        std::process::exit(2);
    }
}
