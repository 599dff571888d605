use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::aircraft::AircraftSnapshot;
use crate::sbs::assembler::{AssemblyMode, TripletAssembler};

/// Longest line accepted from the feed, not counting the newline
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Configuration for one bounded read from an SBS feed
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Feed address, "host:port"
    pub address: String,
    /// Wall clock budget for one read, connect included
    pub window: Duration,
    pub assembly: AssemblyMode,
    /// How long a partial triplet is kept waiting for its other parts
    pub partial_expiry: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            address: "localhost:30003".to_string(),
            window: Duration::from_secs(4),
            assembly: AssemblyMode::default(),
            partial_expiry: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to connect to SBS feed at {address}: {source}")]
    Connection {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything decoded during one read window
#[derive(Debug, Default)]
pub struct StreamBatch {
    /// Snapshots in arrival order; may hold several per aircraft
    pub snapshots: Vec<AircraftSnapshot>,
    pub lines_read: u64,
    /// Completed triplets that failed to decode
    pub decode_failures: u64,
    /// Lines longer than [`MAX_LINE_BYTES`], dropped unread
    pub oversize_lines: u64,
    /// Triplets still missing parts when the window closed
    pub incomplete: usize,
}

impl StreamBatch {
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    Oversize,
    Eof,
}

/// Read one `\n` terminated line into `buf`, holding at most
/// [`MAX_LINE_BYTES`] in memory. A longer line is consumed up to its
/// terminator and reported as [`LineRead::Oversize`] with `buf` emptied.
async fn read_bounded_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut oversize = false;
    loop {
        let limit = (MAX_LINE_BYTES + 1 - buf.len()) as u64;
        let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;

        if buf.last() == Some(&b'\n') || (n == 0 && !buf.is_empty()) {
            return Ok(if oversize {
                buf.clear();
                LineRead::Oversize
            } else {
                LineRead::Line
            });
        }
        if n == 0 {
            return Ok(if oversize {
                LineRead::Oversize
            } else {
                LineRead::Eof
            });
        }
        if buf.len() > MAX_LINE_BYTES {
            oversize = true;
            buf.clear();
        }
    }
}

/// Connect to the feed, read lines until the window elapses or the peer
/// closes, and return every snapshot decoded along the way.
///
/// The only error is failing to connect. A read error after connecting ends
/// the window early and returns what was collected so far.
#[tracing::instrument(skip(config), fields(address = %config.address))]
pub async fn read_batch(config: &ReaderConfig) -> Result<StreamBatch, StreamError> {
    let started = Instant::now();
    let deadline = tokio::time::Instant::from_std(started + config.window);

    let stream = match tokio::time::timeout_at(deadline, TcpStream::connect(&config.address)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            metrics::counter!("sbs.connection.failed_total").increment(1);
            return Err(StreamError::Connection {
                address: config.address.clone(),
                source: e,
            });
        }
        Err(_) => {
            metrics::counter!("sbs.connection.failed_total").increment(1);
            return Err(StreamError::Connection {
                address: config.address.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect did not complete within {:?}", config.window),
                ),
            });
        }
    };
    debug!("Connected to SBS feed at {}", config.address);

    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(256);
    let mut assembler = TripletAssembler::new(config.assembly, config.partial_expiry);
    let mut batch = StreamBatch::default();

    loop {
        match tokio::time::timeout_at(deadline, read_bounded_line(&mut reader, &mut buf)).await {
            Err(_) => {
                trace!("Read window elapsed");
                break;
            }
            Ok(Ok(LineRead::Eof)) => {
                info!("SBS feed closed the connection before the window elapsed");
                break;
            }
            Ok(Err(e)) => {
                metrics::counter!("sbs.connection.read_errors_total").increment(1);
                warn!("Error reading from SBS feed at {}: {}", config.address, e);
                break;
            }
            Ok(Ok(LineRead::Oversize)) => {
                batch.oversize_lines += 1;
                metrics::counter!("sbs.lines.oversize_total").increment(1);
                warn!("Dropping SBS line longer than {} bytes", MAX_LINE_BYTES);
            }
            Ok(Ok(LineRead::Line)) => {
                metrics::counter!("sbs.bytes.received_total").increment(buf.len() as u64);

                // Invalid bytes become U+FFFD and fail at the decoder like any bad field
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\r', '\n']);
                if line.trim().is_empty() {
                    continue;
                }
                batch.lines_read += 1;

                match assembler.push_line(line, Instant::now()) {
                    Some(Ok(snapshot)) => batch.snapshots.push(snapshot),
                    Some(Err(e)) => {
                        batch.decode_failures += 1;
                        metrics::counter!("sbs.decode.failed_total", "reason" => e.kind())
                            .increment(1);
                        trace!("Dropping unusable triplet: {}", e);
                    }
                    None => {}
                }
            }
        }
    }

    batch.incomplete = assembler.incomplete();

    metrics::counter!("sbs.lines.read_total").increment(batch.lines_read);
    metrics::counter!("sbs.snapshots.decoded_total").increment(batch.snapshots.len() as u64);
    metrics::histogram!("sbs.read.duration_ms").record(started.elapsed().as_millis() as f64);

    debug!(
        "Read {} lines, {} snapshots, {} decode failures, {} oversize, {} incomplete in {:.1}s",
        batch.lines_read,
        batch.snapshots.len(),
        batch.decode_failures,
        batch.oversize_lines,
        batch.incomplete,
        started.elapsed().as_secs_f64()
    );

    Ok(batch)
}
