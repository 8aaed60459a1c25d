// CommentLens CLI
// Commands: analyze, chat, categorize, health

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commentlens_core::actors::AnalysisOrchestrator;
use commentlens_core::models::{FullReport, InsightSection};
use commentlens_core::{telemetry, AppConfig, GeminiClient};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::info;

type Orchestrator = AnalysisOrchestrator<GeminiClient>;

#[derive(Parser)]
#[command(name = "commentlens")]
#[command(version, about = "Sentiment, themes and controversy for viewer comments")]
struct Cli {
    /// Emit logs as bunyan JSON instead of compact text
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze comments, one per line, from a file or stdin
    Analyze {
        /// Input file (default: stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Also generate recommendations for the creator
        #[arg(long)]
        insights: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Chat about the audience, one message per line on stdin
    Chat {
        /// Session identifier (default: a fresh one)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Categorize a query
    Categorize {
        query: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check credential, service reachability and caches
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init(cli.log_json)?;

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let model = Arc::new(GeminiClient::new(&config));
    let orchestrator = AnalysisOrchestrator::new(model, &config);
    info!(model = %config.model, "commentlens ready");

    match cli.command {
        Commands::Analyze {
            file,
            insights,
            json,
        } => analyze(&orchestrator, file, insights, json).await,
        Commands::Chat { session } => chat(&orchestrator, session).await,
        Commands::Categorize { query, json } => {
            let category = orchestrator.categorize(&query).await;
            if json {
                print_json(&serde_json::json!({ "query": query, "category": category }))
            } else {
                println!("{}", category);
                Ok(())
            }
        }
        Commands::Health { json } => {
            let report = orchestrator.health_check().await;
            if json {
                print_json(&report)?;
            } else {
                println!("status: {:?}", report.status);
                for (name, component) in &report.components {
                    println!("  {:<20} {:?}  {}", name, component.status, component.detail);
                }
            }
            if !report.is_healthy() {
                std::process::exit(2);
            }
            Ok(())
        }
    }
}

async fn read_comments(file: Option<PathBuf>) -> Result<Vec<String>> {
    let raw = match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read stdin")?;
            buf
        }
    };

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

async fn analyze(orchestrator: &Orchestrator, file: Option<PathBuf>, insights: bool, json: bool) -> Result<()> {
    let comments = read_comments(file).await?;
    let report = orchestrator.full_analysis(comments.as_slice(), insights).await?;

    if json {
        return print_json(&report);
    }
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &FullReport) {
    let aggregate = &report.batch.aggregate;
    println!(
        "{} comments: {} analyzed, {} failed{}",
        aggregate.total,
        aggregate.succeeded,
        aggregate.failed,
        if report.batch.cached { " (cached)" } else { "" }
    );
    match (aggregate.mean_sentiment, aggregate.mean_controversy) {
        (Some(sentiment), Some(controversy)) => {
            println!("mean sentiment:   {:+.2}", sentiment);
            println!("mean controversy: {:.1}/10", controversy);
        }
        _ => println!("no successful analyses, no averages"),
    }
    for (theme, count) in aggregate.top_themes(5) {
        println!("  {:<24} {}", theme, count);
    }

    match &report.insights {
        InsightSection::NotRequested => {}
        InsightSection::Generated { recommendations } => {
            println!("insights:");
            for (i, line) in recommendations.iter().enumerate() {
                println!("  {}. {}", i + 1, line);
            }
        }
        InsightSection::Unavailable { error } => println!("insights unavailable: {}", error),
    }
}

async fn chat(orchestrator: &Orchestrator, session: Option<String>) -> Result<()> {
    let session = session.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout.write_all(b"> ").await?;
    stdout.flush().await?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/clear" {
            orchestrator.clear_chat_history(&session);
            stdout.write_all(b"(history cleared)\n").await?;
        } else {
            match orchestrator.chat(&session, line).await {
                Ok(reply) => stdout.write_all(format!("{}\n", reply).as_bytes()).await?,
                Err(e) => stdout.write_all(format!("error: {}\n", e).as_bytes()).await?,
            }
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
