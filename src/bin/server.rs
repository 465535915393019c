//! Server binary: hosts the retrieval API and drives scheduled incremental
//! sync for the Confluence RAG ingestion pipeline.
//!
//! Usage:
//!   confluence-rag-server [OPTIONS]
//!
//! Options:
//!   --host <HOST>   API server host (default: 127.0.0.1)
//!   --port <PORT>   API server port (default: 8080)

use std::sync::Arc;

use confluence_rag::api::start_server;
use confluence_rag::config::AppConfig;
use confluence_rag::context::AppContext;
use confluence_rag::embed::OpenAiEmbedder;
use confluence_rag::store::PostgresStore;
use confluence_rag::sync::spawn_scheduled_sync;
use confluence_rag::wiki::HttpWikiClient;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

struct CliArgs {
    host: String,
    port: u16,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

fn parse_args() -> CliArgs {
    let mut args = CliArgs::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--host" => {
                if let Some(host) = iter.next() {
                    args.host = host;
                }
            }
            "--port" => {
                if let Some(port) = iter.next() {
                    if let Ok(parsed) = port.parse() {
                        args.port = parsed;
                    }
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_help();
                std::process::exit(1);
            }
        }
    }

    args
}

fn print_help() {
    println!("confluence-rag-server - ingestion and retrieval service");
    println!();
    println!("USAGE:");
    println!("    confluence-rag-server [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --host <HOST>   API server host (default: 127.0.0.1)");
    println!("    --port <PORT>   API server port (default: 8080)");
    println!("    --help, -h      Print this help message");
}

fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},confluence_rag=debug")));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();

    let config = AppConfig::from_env()?;
    setup_logging(&config.log_level);

    info!("loading wiki client, embedder, and store");
    let wiki = Arc::new(HttpWikiClient::new(
        config.wiki.base_url.clone(),
        config.wiki.email.clone(),
        config.wiki.api_token.clone(),
    ));
    let embedder = Arc::new(OpenAiEmbedder::new(
        config.embedding.api_key.clone(),
        config.embedding.model.clone(),
        config.embedding.dimension(),
    ));
    let store = Arc::new(
        PostgresStore::connect(
            &config.database.url,
            config.database.max_connections,
            config.embedding.dimension(),
        )
        .await?,
    );

    let sync_config = config.sync.clone();
    let context = AppContext::new(config, wiki, embedder, store);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sync_handle = spawn_scheduled_sync(context.sync_orchestrator.clone(), sync_config, shutdown_rx);

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        shutdown_tx.send(true).ok();
    });

    info!(host = %args.host, port = args.port, "starting confluence-rag-server");
    if let Err(err) = start_server(context, &args.host, args.port).await {
        error!(error = %err, "server error");
        sync_handle.abort();
        return Err(err);
    }

    sync_handle.await.ok();
    Ok(())
}
