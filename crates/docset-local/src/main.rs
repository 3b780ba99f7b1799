use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use docset_core::{DocumentEvent, ScanOutcome};
use docset_local::config::{Command, Config};
use docset_local::{DirectoryRemote, DocumentManager, RootWatcher};
use futures::StreamExt;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    let set = config.document_set()?;
    let local_dir = config.effective_local_dir();
    let remote = match &config.remote_dir {
        Some(dir) => DirectoryRemote::probe(dir),
        None => DirectoryRemote::unavailable(),
    };

    info!("Starting docset-local");
    info!("  Document set: {}", set.document_set_identifier);
    info!("  Local dir: {}", local_dir.display());
    match &config.remote_dir {
        Some(dir) => info!("  Remote dir: {}", dir.display()),
        None => info!("  Remote dir: none"),
    }

    let manager = Arc::new(DocumentManager::builder(set, &local_dir, Arc::new(remote)).build()?);

    match config.command {
        Command::List => {
            populate(&manager).await?;
            for record in manager.documents() {
                println!(
                    "{}\t{}\t{}",
                    record.identifier, record.location, record.display_name
                );
            }
        }
        Command::Create { name } => {
            populate(&manager).await?;
            let identifier = manager.create_document(&name).await?;
            println!("{}", identifier);
        }
        Command::Delete { identifier } => {
            populate(&manager).await?;
            manager.delete_document(&identifier).await?;
        }
        Command::Rename { identifier, name } => {
            populate(&manager).await?;
            manager.rename_document(&identifier, &name).await?;
        }
        Command::Migrate { identifier, target } => {
            populate(&manager).await?;
            let record = manager.migrate_document(&identifier, target.into()).await?;
            println!("{}\t{}", record.identifier, record.location);
        }
        Command::Scan => {
            let (_, mut events) = manager.subscribe_stream();
            manager.start_scan();

            let ctrl_c = signal::ctrl_c();
            tokio::pin!(ctrl_c);
            let mut stopping = false;
            loop {
                tokio::select! {
                    event = events.next() => {
                        let Some(event) = event else { break };
                        print_event(&event)?;
                        if event.is_scan_terminal() {
                            break;
                        }
                    }
                    _ = &mut ctrl_c, if !stopping => {
                        info!("Received Ctrl+C, stopping scan");
                        stopping = true;
                        manager.stop_scan();
                    }
                }
            }
        }
        Command::Watch { debounce_ms } => {
            let (_, mut events) = manager.subscribe_stream();
            let watcher = RootWatcher::start(manager.clone(), Duration::from_millis(debounce_ms))?;
            manager.start_scan();

            let ctrl_c = signal::ctrl_c();
            tokio::pin!(ctrl_c);
            loop {
                tokio::select! {
                    event = events.next() => {
                        let Some(event) = event else { break };
                        print_event(&event)?;
                    }
                    _ = &mut ctrl_c => {
                        info!("Received Ctrl+C, shutting down");
                        break;
                    }
                }
            }
            drop(watcher);
            manager.stop_scan();
        }
    }

    Ok(())
}

/// Fill the registry from disk before acting on documents.
async fn populate(manager: &DocumentManager) -> anyhow::Result<()> {
    match manager.start_scan().wait().await {
        ScanOutcome::Finished => Ok(()),
        ScanOutcome::Cancelled => {
            warn!("Initial scan was cancelled");
            anyhow::bail!("initial scan did not finish")
        }
    }
}

fn print_event(event: &DocumentEvent) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}
