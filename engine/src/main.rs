use anyhow::Context;
use fastpoints_engine::config::EngineConfig;
use fastpoints_engine::protocol::{Command, ErrorCode, Event};
use fastpoints_engine::session::MapSession;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// JSON-lines bridge: commands on stdin, events on stdout, logs on stderr.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fastpoints=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = EngineConfig::from_env();
    info!(
        "Starting fastpoints engine (cell size {}, chunk size {}, debounce {:?})",
        config.default_cell_size, config.ingest_chunk_size, config.extent_debounce
    );
    let chunk_size = config.ingest_chunk_size;

    // Spawn task to write events to stdout
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = rx.recv().await {
            let mut line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to serialize {} event: {}", event.event_type(), e);
                    continue;
                }
            };
            line.push('\n');
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                warn!("Failed to write event, stopping writer: {}", e);
                break;
            }
            if let Err(e) = stdout.flush().await {
                warn!("Failed to flush stdout: {}", e);
            }
        }
    });

    let mut session = MapSession::new(config, tx.clone());
    tx.send(Event::Ready {}).context("event channel closed")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Command>(line) {
            Ok(command) => {
                let chunks = session.split_ingestion(command, chunk_size);
                if chunks.len() > 1 {
                    debug!("Splitting ingestion into {} chunks", chunks.len());
                }
                for chunk in chunks {
                    session.dispatch(chunk);
                    // Let timers and the writer run between chunks
                    tokio::task::yield_now().await;
                }
                session.paint();
            }
            Err(e) => {
                warn!("Malformed message: {}", e);
                tx.send(Event::Error {
                    code: ErrorCode::InvalidMessage,
                    message: e.to_string(),
                    layer_id: None,
                })
                .context("event channel closed")?;
            }
        }
    }

    info!("Input closed, shutting down");
    drop(session);
    drop(tx);
    writer.await.context("event writer panicked")?;
    Ok(())
}
