//! Newline-delimited JSON over TCP.
//!
//! Each connect spawns one reader and one writer task bridging the socket
//! halves to the [`Duplex`] queues. Either side closing ends both.

use std::io;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::TcpStream,
    sync::mpsc,
};
use tracing::debug;

use super::handle::{Connector, Duplex};

/// Connects to `addr` (anything `TcpStream::connect` accepts).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// Connector for `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Target address.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<Duplex> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                tokio::select! {
                    _ = in_tx.closed() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            if in_tx.send(line).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            debug!(error = %err, "tcp read failed");
                            break;
                        }
                    },
                }
            }
        });

        tokio::spawn(async move {
            let mut writer = BufWriter::new(write_half);
            while let Some(line) = out_rx.recv().await {
                let res = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;
                if let Err(err) = res {
                    debug!(error = %err, "tcp write failed");
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        Ok(Duplex {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
