//! TAAR Lite - add-on to add-on recommendations
//!
//! Main entry point for the taarlite CLI.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use taarlite::config::{validate_config_result, TaarLiteConfig};
use taarlite::engine::{Capabilities, CoinstallCache, RankingCache};
use taarlite::server::RecommendationServer;
use taarlite::RecommendationEngine;

/// Tolerance used when reporting asymmetric co-install pairs
const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// TAAR Lite - add-on recommendations from co-installation data
#[derive(Parser, Debug)]
#[command(name = "taarlite")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/taarlite/config.yaml)
    #[arg(short, long, env = "TAARLITE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve recommendations over HTTP
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Print ranked recommendations for one add-on
    Recommend {
        /// Add-on GUID
        guid: String,

        /// Variant name (none, degree, total-relevance, proportional-total-relevance)
        #[arg(short, long)]
        variant: Option<String>,

        /// Number of results (default: server.max_results)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Force-expire both resources in the shared cache
    ClearCache,

    /// Load both resources once and report on them
    Check,
}

#[tokio::main]
async fn main() {
    if let Err(e) = taarlite::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let path = cli.config.unwrap_or_else(TaarLiteConfig::default_path);
    let config = TaarLiteConfig::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await,
        Commands::Recommend {
            guid,
            variant,
            limit,
        } => recommend(&config, &guid, variant.as_deref(), limit).await,
        Commands::ClearCache => clear_cache(&config).await,
        Commands::Check => check(&config).await,
    }
}

async fn serve(config: TaarLiteConfig, bind: Option<String>) -> anyhow::Result<()> {
    let engine = RecommendationEngine::from_config(&config)
        .await
        .context("starting recommendation engine")?;

    let addr = bind.unwrap_or_else(|| config.server.bind.clone());
    RecommendationServer::new(Arc::new(engine), config.server.max_results)
        .run(&addr)
        .await
        .with_context(|| format!("serving on {}", addr))?;
    Ok(())
}

async fn recommend(
    config: &TaarLiteConfig,
    guid: &str,
    variant: Option<&str>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let engine = RecommendationEngine::from_config(config).await?;
    let limit = limit.unwrap_or(config.server.max_results);

    let results = engine.recommend(guid, variant, limit).await;
    if results.is_empty() {
        println!("No recommendations for {}", guid);
        return Ok(());
    }

    let variant = variant.unwrap_or(engine.options().default_variant.as_str());
    println!("Recommendations for {} ({}):", guid, variant);
    for (i, r) in results.iter().enumerate() {
        println!(
            "  {:>2}. {:<48} weight={:.6} installs={}",
            i + 1,
            r.key,
            r.weight,
            r.popularity
        );
    }
    Ok(())
}

fn caches(config: &TaarLiteConfig) -> anyhow::Result<(CoinstallCache, RankingCache)> {
    validate_config_result(config)?;
    let capabilities = Capabilities::from_config(config)?;
    Ok((
        capabilities.cache(config, &config.source.coinstall_key),
        capabilities.cache(config, &config.source.ranking_key),
    ))
}

async fn clear_cache(config: &TaarLiteConfig) -> anyhow::Result<()> {
    let (coinstall, ranking) = caches(config)?;
    coinstall.force_expiry().await?;
    ranking.force_expiry().await?;

    println!(
        "Cleared {} and {} from the shared cache",
        config.source.coinstall_key, config.source.ranking_key
    );
    Ok(())
}

async fn check(config: &TaarLiteConfig) -> anyhow::Result<()> {
    let (coinstall, ranking) = caches(config)?;

    let Some(graph) = coinstall.get().await.0 else {
        bail!(
            "could not load {}/{}",
            config.source.bucket,
            config.source.coinstall_key
        );
    };
    let Some(table) = ranking.get().await.0 else {
        bail!(
            "could not load {}/{}",
            config.source.bucket,
            config.source.ranking_key
        );
    };

    graph.validate().context("co-installation graph")?;
    let asymmetric = graph.asymmetric_pairs(SYMMETRY_TOLERANCE);

    println!("Co-installation graph: {}", config.source.coinstall_key);
    println!("  rows:  {}", graph.len());
    println!("  edges: {}", graph.edge_count());
    println!("  asymmetric pairs: {}", asymmetric.len());
    for (a, b) in asymmetric.iter().take(5) {
        println!("    {} -> {}", a, b);
    }
    println!("Install ranking: {}", config.source.ranking_key);
    println!("  add-ons: {}", table.len());
    println!("  min-install floor: {:.2}", table.min_install_floor());
    Ok(())
}
