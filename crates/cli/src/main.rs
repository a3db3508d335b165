//! # carerag: appointment chat over a clinic database
//!
//! This is the main entry point for the `carerag` command-line interface:
//! ask a question in plain language, inspect the schema the pipeline is
//! grounded on, or force a schema refresh.

mod config;

use anyhow::{Context, Result};
use carerag::providers::ai::embedding::ApiEmbedder;
use carerag::providers::db::sqlite::SqliteProvider;
use carerag::providers::factory::create_ai_provider;
use carerag::{ChatPipeline, ResponseStatus};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

// --- CLI Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a configuration file (defaults to ./config.yml when present)
    #[arg(long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask one question and print the answer
    Ask(AskArgs),
    /// Inspect or refresh the schema the pipeline is grounded on
    Schema(SchemaArgs),
}

#[derive(Parser, Debug)]
struct AskArgs {
    /// The question, in plain language
    question: String,
    /// Session identifier attached to traces and logs
    #[arg(long, default_value = "cli")]
    session: String,
    /// Print the reasoning trace after the answer
    #[arg(long)]
    trace: bool,
    /// Print the full response as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct SchemaArgs {
    #[command(subcommand)]
    command: SchemaCommands,
}

#[derive(Subcommand, Debug)]
enum SchemaCommands {
    /// Show the catalog and retrieval index status
    Show,
    /// Re-introspect the database and rebuild the index
    Refresh,
}

// --- Main Application Entry ---

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so answers on stdout stay pipeable.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let app_config = config::get_config(cli.config.as_deref())?;
    let pipeline = build_pipeline(&app_config).await?;

    match cli.command {
        Commands::Ask(args) => ask(&pipeline, args).await,
        Commands::Schema(args) => match args.command {
            SchemaCommands::Show => schema_show(&pipeline).await,
            SchemaCommands::Refresh => schema_refresh(&pipeline).await,
        },
    }
}

/// Wires the pipeline from the loaded configuration: SQLite storage, the
/// optional AI provider and embedder, and an optional DDL grounding file.
async fn build_pipeline(app: &config::AppConfig) -> Result<ChatPipeline> {
    let storage = SqliteProvider::new(&app.db_url)
        .await
        .with_context(|| format!("Failed to open the database at '{}'", app.db_url))?;

    let mut builder = ChatPipeline::builder().storage(Box::new(storage));

    match &app.model {
        Some(model) => {
            let provider = create_ai_provider(&app.providers, model)?;
            info!("Using model '{model}' for generation and intent refinement.");
            builder = builder.ai_provider(provider);
        }
        None => {
            info!("No model configured; running with the rule-based generator only.");
        }
    }

    if let Some(embedding) = app.embedding.clone() {
        builder = builder.embedder(Arc::new(ApiEmbedder::from(embedding)));
    }

    if let Some(path) = &app.schema_ddl {
        let ddl = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read the schema definition at '{path}'"))?;
        builder = builder.schema_ddl(ddl);
    }

    let pipeline = builder.build()?;
    pipeline.initialize().await?;
    Ok(pipeline)
}

async fn ask(pipeline: &ChatPipeline, args: AskArgs) -> Result<()> {
    let response = pipeline.respond(&args.session, &args.question).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.message);
    if !response.suggestions.is_empty() {
        println!();
        println!("You could also try:");
        for suggestion in &response.suggestions {
            println!("  - {suggestion}");
        }
    }
    if args.trace {
        println!();
        println!("{}", response.trace.render());
    }

    if response.status == ResponseStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

async fn schema_show(pipeline: &ChatPipeline) -> Result<()> {
    let status = pipeline.schema_status().await;
    println!("Source:          {}", status.catalog.source);
    println!("Tables:          {}", status.catalog.table_count);
    println!("Columns:         {}", status.catalog.column_count);
    println!("Schema hash:     {}", status.catalog.schema_hash);
    println!("Loaded at:       {}", status.catalog.loaded_at);
    println!("Degraded:        {}", status.catalog.degraded);
    println!("Indexed tables:  {}", status.index.indexed_tables);
    println!("Embedded tables: {}", status.index.embedded_tables);
    println!("Retrieval mode:  {}", status.index.method_available);
    Ok(())
}

async fn schema_refresh(pipeline: &ChatPipeline) -> Result<()> {
    let changes = pipeline.refresh_schema().await?;
    if changes.is_empty() {
        println!("Schema is unchanged.");
    } else {
        println!("Schema refreshed: {}.", changes.summary());
    }
    Ok(())
}
