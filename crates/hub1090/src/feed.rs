//! TCP services: RAW in/out, SBS in/out.
//!
//! Output services fan a broadcast channel out to every connected
//! client; a client lagging behind the channel capacity (the high-water
//! mark) is disconnected rather than allowed to block the stream.
//! Input services parse line-oriented feeds and inject them into the
//! decoding pipeline. Each service keeps relaxed atomic counters and a
//! last-error slot, surfaced at exit and on `/data/stats.json`.

use crate::registry::Registry;
use crate::{raw, sbs};
use rx1090::decode::time::now;
use rx1090::decode::TimedMessage;
use rx1090::source::net;
use serde_json::{json, Value};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use futures_util::pin_mut;
use futures_util::StreamExt;

/// Maximum lines queued per output service before slow clients are
/// dropped (the high-water mark)
pub const OUT_QUEUE: usize = 4096;

/// Heartbeat period on the RAW output, in seconds
pub const HEARTBEAT_PERIOD: u64 = 60;

/// Timeout for an active outbound connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Network errors, normalized from the OS error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum NetError {
    WouldBlock,
    ConnRefused,
    ConnReset,
    Timeout,
    AddrInUse,
    HostUnreachable,
    NotFound,
    TryAgain,
    Other,
}

impl From<&io::Error> for NetError {
    fn from(e: &io::Error) -> Self {
        use io::ErrorKind::*;
        match e.kind() {
            WouldBlock => Self::WouldBlock,
            ConnectionRefused => Self::ConnRefused,
            ConnectionReset | ConnectionAborted | BrokenPipe => {
                Self::ConnReset
            }
            TimedOut => Self::Timeout,
            AddrInUse => Self::AddrInUse,
            HostUnreachable => Self::HostUnreachable,
            NotFound => Self::NotFound,
            Interrupted => Self::TryAgain,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Relaxed counters for one service
#[derive(Debug, Default)]
pub struct ServiceStats {
    pub connections: AtomicU64,
    pub messages_in: AtomicU64,
    pub messages_out: AtomicU64,
    pub bytes_out: AtomicU64,
    pub unrecognized: AtomicU64,
    pub last_error: Mutex<Option<NetError>>,
}

impl ServiceStats {
    pub fn record_error(&self, e: &io::Error) {
        *self.last_error.lock().expect("poisoned stats") =
            Some(NetError::from(e));
    }

    pub fn to_json(&self) -> Value {
        json!({
            "connections": self.connections.load(Ordering::Relaxed),
            "messages_in": self.messages_in.load(Ordering::Relaxed),
            "messages_out": self.messages_out.load(Ordering::Relaxed),
            "bytes_out": self.bytes_out.load(Ordering::Relaxed),
            "unrecognized": self.unrecognized.load(Ordering::Relaxed),
            "last_error": *self.last_error.lock().expect("poisoned stats"),
        })
    }
}

/// Counters for the decoding stage
#[derive(Debug, Default)]
pub struct DecodeStats {
    pub accepted: AtomicU64,
    pub repaired: AtomicU64,
    pub crc_dropped: AtomicU64,
    pub unknown_icao: AtomicU64,
    pub unknown_df: AtomicU64,
    pub bad_length: AtomicU64,
}

impl DecodeStats {
    pub fn to_json(&self) -> Value {
        json!({
            "accepted": self.accepted.load(Ordering::Relaxed),
            "repaired": self.repaired.load(Ordering::Relaxed),
            "crc_dropped": self.crc_dropped.load(Ordering::Relaxed),
            "unknown_icao": self.unknown_icao.load(Ordering::Relaxed),
            "unknown_df": self.unknown_df.load(Ordering::Relaxed),
            "bad_length": self.bad_length.load(Ordering::Relaxed),
        })
    }
}

/// All service counters, shared between the service tasks and the
/// statistics endpoint
#[derive(Debug, Default)]
pub struct Stats {
    pub raw_in: Arc<ServiceStats>,
    pub raw_out: Arc<ServiceStats>,
    pub sbs_in: Arc<ServiceStats>,
    pub sbs_out: Arc<ServiceStats>,
    pub decode: DecodeStats,
}

impl Stats {
    pub fn log_summary(&self) {
        for (name, service) in [
            ("RAW in", &self.raw_in),
            ("RAW out", &self.raw_out),
            ("SBS in", &self.sbs_in),
            ("SBS out", &self.sbs_out),
        ] {
            info!(
                "{name}: {} connections, {} in, {} out, \
                 {} unrecognized, last error: {:?}",
                service.connections.load(Ordering::Relaxed),
                service.messages_in.load(Ordering::Relaxed),
                service.messages_out.load(Ordering::Relaxed),
                service.unrecognized.load(Ordering::Relaxed),
                *service.last_error.lock().expect("poisoned stats"),
            );
        }
        info!(
            "decode: {} accepted ({} repaired), {} CRC drops, \
             {} unknown addresses, {} unknown formats",
            self.decode.accepted.load(Ordering::Relaxed),
            self.decode.repaired.load(Ordering::Relaxed),
            self.decode.crc_dropped.load(Ordering::Relaxed),
            self.decode.unknown_icao.load(Ordering::Relaxed),
            self.decode.unknown_df.load(Ordering::Relaxed),
        );
    }
}

/// Serve an output stream (RAW or SBS lines) to every connecting client
pub async fn serve_output(
    port: u16,
    tx: broadcast::Sender<Arc<str>>,
    stats: Arc<ServiceStats>,
    token: CancellationToken,
) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(
        |e| {
            stats.record_error(&e);
            e
        },
    )?;
    info!("output service listening on port {port}");

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("client connected from {peer}");
                        stats.connections.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(client_writer(
                            stream,
                            tx.subscribe(),
                            stats.clone(),
                            token.clone(),
                        ));
                    }
                    Err(e) => stats.record_error(&e),
                }
            }
        }
    }
}

async fn client_writer(
    mut stream: TcpStream,
    mut rx: broadcast::Receiver<Arc<str>>,
    stats: Arc<ServiceStats>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            line = rx.recv() => match line {
                Ok(line) => {
                    if let Err(e) = stream.write_all(line.as_bytes()).await {
                        stats.record_error(&e);
                        break;
                    }
                    stats.messages_out.fetch_add(1, Ordering::Relaxed);
                    stats
                        .bytes_out
                        .fetch_add(line.len() as u64, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Slow client over the high-water mark: close
                    warn!("client lagged by {n} lines, disconnecting");
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    let _ = stream.shutdown().await;
}

/// Listen for inbound RAW clients and inject their frames into the
/// decoding pipeline
pub async fn serve_raw_in(
    port: u16,
    pipeline: mpsc::Sender<TimedMessage>,
    stats: Arc<ServiceStats>,
    token: CancellationToken,
) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(
        |e| {
            stats.record_error(&e);
            e
        },
    )?;
    info!("RAW input service listening on port {port}");

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("RAW feed connected from {peer}");
                        stats.connections.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(raw_reader(
                            stream,
                            pipeline.clone(),
                            stats.clone(),
                            token.clone(),
                        ));
                    }
                    Err(e) => stats.record_error(&e),
                }
            }
        }
    }
}

async fn raw_reader(
    stream: TcpStream,
    pipeline: mpsc::Sender<TimedMessage>,
    stats: Arc<ServiceStats>,
    token: CancellationToken,
) {
    let lines = net::lines(stream);
    pin_mut!(lines);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next() => {
                let Some(line) = line else { break };
                match raw::parse_line(&line) {
                    raw::RawLine::Frame(frame) => {
                        stats.messages_in.fetch_add(1, Ordering::Relaxed);
                        let tmsg = TimedMessage {
                            timestamp: now(),
                            frame: frame.bytes,
                            message: None,
                            idx: usize::MAX, // network source
                            mlat: frame.mlat,
                            repaired: 0,
                            rssi: None,
                        };
                        if pipeline.send(tmsg).await.is_err() {
                            break;
                        }
                    }
                    raw::RawLine::Ignored => {}
                    raw::RawLine::Invalid => {
                        stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

/// Listen for inbound SBS clients; their lines update the registry
/// directly
pub async fn serve_sbs_in(
    port: u16,
    registry: Arc<tokio::sync::Mutex<Registry>>,
    stats: Arc<ServiceStats>,
    token: CancellationToken,
) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(
        |e| {
            stats.record_error(&e);
            e
        },
    )?;
    info!("SBS input service listening on port {port}");

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("SBS feed connected from {peer}");
                        stats.connections.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(sbs_reader(
                            stream,
                            registry.clone(),
                            stats.clone(),
                            token.clone(),
                        ));
                    }
                    Err(e) => stats.record_error(&e),
                }
            }
        }
    }
}

async fn sbs_reader(
    stream: TcpStream,
    registry: Arc<tokio::sync::Mutex<Registry>>,
    stats: Arc<ServiceStats>,
    token: CancellationToken,
) {
    let lines = net::lines(stream);
    pin_mut!(lines);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next() => {
                let Some(line) = line else { break };
                if line.trim().is_empty() || line.starts_with('#') {
                    continue;
                }
                match sbs::parse_line(&line) {
                    Some(update) => {
                        stats.messages_in.fetch_add(1, Ordering::Relaxed);
                        registry.lock().await.apply_sbs(&update, now());
                    }
                    None => {
                        stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

/// Fetch the RAW feed from a remote host instead of listening.
///
/// The caller probes the address once at startup (an unreachable target
/// is a startup failure); from then on, disconnections and connection
/// errors retry with an exponential backoff capped at 30 s.
pub async fn active_raw_in(
    address: String,
    pipeline: mpsc::Sender<TimedMessage>,
    stats: Arc<ServiceStats>,
    token: CancellationToken,
) {
    let mut backoff = Duration::from_secs(1);
    while !token.is_cancelled() {
        match net::connect(&address, CONNECT_TIMEOUT).await {
            Ok(stream) => {
                info!("connected to RAW feed {address}");
                stats.connections.fetch_add(1, Ordering::Relaxed);
                backoff = Duration::from_secs(1);
                raw_reader(
                    stream,
                    pipeline.clone(),
                    stats.clone(),
                    token.clone(),
                )
                .await;
            }
            Err(e) => {
                stats.record_error(&e);
                debug!(
                    "connection to {address} failed, retrying in {:?}",
                    backoff
                );
            }
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(Duration::from_secs(30));
    }
}

/// Emit the keep-alive burst on the RAW output once per minute
pub async fn heartbeat(
    tx: broadcast::Sender<Arc<str>>,
    token: CancellationToken,
) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(HEARTBEAT_PERIOD));
    ticker.tick().await; // the first tick fires immediately
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let _ = tx.send(Arc::from(raw::heartbeat_burst()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn output_clients_receive_broadcast_lines() {
        let (tx, _) = broadcast::channel(OUT_QUEUE);
        let stats = Arc::new(ServiceStats::default());
        let token = CancellationToken::new();

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        tokio::spawn(serve_output(
            port,
            tx.clone(),
            stats.clone(),
            token.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client =
            TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut reader = BufReader::new(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        tx.send(Arc::from("*8D406B902015A678D4D220AA4BDA;\n"))
            .unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "*8D406B902015A678D4D220AA4BDA;\n");
        assert_eq!(stats.connections.load(Ordering::Relaxed), 1);

        token.cancel();
    }

    #[tokio::test]
    async fn raw_in_feeds_the_pipeline() {
        let (pipeline_tx, mut pipeline_rx) = mpsc::channel(16);
        let stats = Arc::new(ServiceStats::default());
        let token = CancellationToken::new();

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        tokio::spawn(serve_raw_in(
            port,
            pipeline_tx,
            stats.clone(),
            token.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client =
            TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client
            .write_all(b"*8D406B902015A678D4D220AA4BDA;\nnoise\n")
            .await
            .unwrap();

        let tmsg = pipeline_rx.recv().await.unwrap();
        assert_eq!(tmsg.frame.len(), 14);
        assert!(!tmsg.mlat);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.unrecognized.load(Ordering::Relaxed), 1);

        token.cancel();
    }
}
