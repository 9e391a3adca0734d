use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dataset_analysis_service::{AnalysisEngine, EngineConfig, FileUpload, NewDataset};

fn redact(database_url: &str) -> String {
    match (database_url.find("://"), database_url.rfind('@')) {
        (Some(start), Some(end)) if start + 3 < end => {
            format!("{}***{}", &database_url[..start + 3], &database_url[end..])
        }
        _ => database_url.to_string(),
    }
}

async fn analyze_files(engine: Arc<AnalysisEngine>, paths: Vec<String>) -> anyhow::Result<()> {
    for path in paths {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path))?;
        let file_name = Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());

        let dataset = engine
            .create_dataset(NewDataset::new("", FileUpload::new(file_name, bytes)))
            .await
            .with_context(|| format!("Failed to ingest {}", path))?;
        let report = engine.analysis_report(&dataset.id).await?;

        println!("{}", serde_json::to_string_pretty(&dataset)?);
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dataset_analysis_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Dataset Analysis v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::from_env()?;
    info!("Configuration loaded:");
    info!("  Storage URL: {}", config.storage_url);
    match &config.database_url {
        Some(database_url) => info!("  Database URL: {}", redact(database_url)),
        None => info!("  Database URL: <none, in-memory catalog>"),
    }
    info!("  Page size: {} (max {})", config.default_page_size, config.max_query_rows);

    let engine = Arc::new(AnalysisEngine::new(config).await?);
    engine.health_check().await?;

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        info!("No files given; usage: dataset-analysis <file>...");
        return Ok(());
    }

    tokio::select! {
        result = analyze_files(engine.clone(), paths) => {
            if let Err(e) = &result {
                error!("Analysis failed: {:#}", e);
            }
            result?;
        }
        signal = signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received shutdown signal, stopping"),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
        }
    }

    info!("Dataset Analysis shutdown complete");
    Ok(())
}
