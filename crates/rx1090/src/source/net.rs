use async_stream::stream;
use futures_util::stream::Stream;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error};

/// Connect to a line-oriented feed (RAW or SBS), failing after
/// `connect_timeout`.
pub async fn connect(
    address: &str,
    connect_timeout: Duration,
) -> io::Result<TcpStream> {
    match tokio::time::timeout(connect_timeout, TcpStream::connect(address))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {address} timed out"),
        )),
    }
}

/// Iterate the lines of a connected feed. The stream ends when the peer
/// closes the connection or on the first read error.
pub fn lines(stream: TcpStream) -> impl Stream<Item = String> {
    let mut reader = BufReader::new(stream).lines();
    stream! {
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    debug!("<< {line}");
                    yield line;
                }
                Ok(None) => break,
                Err(e) => {
                    error!("error reading from feed: {e}");
                    break;
                }
            }
        }
    }
}
