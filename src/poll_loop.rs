use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::ingestion::{IngestError, IngestReport, IngestionPipeline};
use crate::sbs::{ReaderConfig, StreamError, read_batch};

/// What one read-and-ingest cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Ingested(IngestReport),
    /// Connected but nothing decoded within the window
    Empty,
    ConnectionFailed,
    /// Ingest failed in a way the next cycle may not hit
    IngestFailed,
}

/// Drives read → ingest → sleep until shutdown. Cycles never overlap.
pub struct PollLoop {
    reader: ReaderConfig,
    pipeline: IngestionPipeline,
    updating_period: Duration,
    retry_delay: Duration,
    max_retry_delay: Duration,
}

impl PollLoop {
    pub fn new(config: &PipelineConfig, pipeline: IngestionPipeline) -> Self {
        Self {
            reader: config.reader_config(),
            pipeline,
            updating_period: config.updating_period(),
            retry_delay: config.retry_delay(),
            max_retry_delay: config.max_retry_delay(),
        }
    }

    /// Run one cycle. Only an ingest error that retrying cannot fix is returned as `Err`.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, IngestError> {
        let batch = match read_batch(&self.reader).await {
            Ok(batch) => batch,
            Err(e @ StreamError::Connection { .. }) => {
                error!("{}", e);
                return Ok(CycleOutcome::ConnectionFailed);
            }
        };

        if batch.is_empty() {
            metrics::counter!("ingest.empty_batches_total").increment(1);
            warn!(
                "No aircraft decoded from {} ({} lines, {} decode failures)",
                self.reader.address, batch.lines_read, batch.decode_failures
            );
            return Ok(CycleOutcome::Empty);
        }

        match self.pipeline.ingest(batch.snapshots).await {
            Ok(report) => Ok(CycleOutcome::Ingested(report)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!("Ingestion cycle failed: {}", e);
                Ok(CycleOutcome::IngestFailed)
            }
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Polling {} every {}s ({}s read window, {} assembly)",
            self.reader.address,
            self.updating_period.as_secs(),
            self.reader.window.as_secs(),
            self.reader.assembly
        );

        let mut backoff = self.retry_delay;

        while !shutdown.is_cancelled() {
            let delay = match self.run_cycle().await? {
                CycleOutcome::ConnectionFailed => {
                    let delay = backoff;
                    backoff = (backoff * 2)
                        .max(Duration::from_secs(1))
                        .min(self.max_retry_delay);
                    warn!("Retrying connection in {}s", delay.as_secs());
                    delay
                }
                CycleOutcome::Empty => {
                    backoff = self.retry_delay;
                    self.retry_delay
                }
                CycleOutcome::Ingested(_) | CycleOutcome::IngestFailed => {
                    backoff = self.retry_delay;
                    self.updating_period
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Poll loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::store::SnapshotStore;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    const TRIPLET: &str = "MSG,1,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000,TAM8112,,,,,,,,,,,\n\
MSG,3,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000,,9725,,,19.329620,-99.196991,,,,,,\n\
MSG,4,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000,,,184.317657,334.964325,,,-960,,,,,\n";

    /// Serve `payload` to every connection, then close it
    async fn feed(payload: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                socket.write_all(payload.as_bytes()).await.ok();
                socket.shutdown().await.ok();
            }
        });
        address
    }

    fn poll_loop(address: String, store: Arc<MemoryStore>) -> PollLoop {
        let config = PipelineConfig {
            sbs_source: address,
            waiting_time: 1,
            updating_period: 1,
            retry_delay: 1,
            ..PipelineConfig::default()
        };
        PollLoop::new(&config, IngestionPipeline::new(store))
    }

    #[tokio::test]
    async fn test_cycle_ingests_feed() {
        let store = Arc::new(MemoryStore::new());
        let poll = poll_loop(feed(TRIPLET).await, store.clone());

        match poll.run_cycle().await.unwrap() {
            CycleOutcome::Ingested(report) => assert_eq!(report.current_rows, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.current_aircraft().await.unwrap()[0].icao, "E80451");
    }

    #[tokio::test]
    async fn test_empty_feed_leaves_store_untouched() {
        let store = Arc::new(MemoryStore::new());
        let poll = poll_loop(feed("garbage\n").await, store.clone());

        assert_eq!(poll.run_cycle().await.unwrap(), CycleOutcome::Empty);
        assert_eq!(store.insert_statements(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_is_not_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let poll = poll_loop(address, Arc::new(MemoryStore::new()));
        assert_eq!(poll.run_cycle().await.unwrap(), CycleOutcome::ConnectionFailed);
    }

    #[tokio::test]
    async fn test_fatal_ingest_error_stops_the_loop() {
        let store = Arc::new(MemoryStore::new());
        store
            .fail_next_carry_forward("password authentication failed for user \"sbs\"")
            .await;
        let poll = poll_loop(feed(TRIPLET).await, store);

        let result = poll.run(CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_transient_ingest_error_is_retried() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_carry_forward("connection reset by peer").await;
        let poll = poll_loop(feed(TRIPLET).await, store.clone());

        assert_eq!(poll.run_cycle().await.unwrap(), CycleOutcome::IngestFailed);
        assert!(matches!(
            poll.run_cycle().await.unwrap(),
            CycleOutcome::Ingested(_)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let store = Arc::new(MemoryStore::new());
        let poll = poll_loop(feed(TRIPLET).await, store);
        let shutdown = CancellationToken::new();

        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { poll.run(shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("poll loop did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
