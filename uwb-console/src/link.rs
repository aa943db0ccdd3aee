//! Byte links between the host and the control plane
//!
//! A link is any async stream. Bytes read from it go to the transport's
//! [`RxSender`]; bytes the tx ring flushes for it arrive on a channel fed
//! by a [`ChannelSink`] and are written back out.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uwb_ctl::{CtlError, RxSender, TxSink};

const READ_BUFFER: usize = 1024;

/// Tx sink that hands chunks to a link task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TxSink for ChannelSink {
    fn is_ready(&self) -> bool {
        !self.tx.is_closed()
    }

    fn transmit(&mut self, chunk: &[u8]) -> Result<(), CtlError> {
        self.tx
            .send(chunk.to_vec())
            .map_err(|_| CtlError::TransportWrite("link closed".into()))
    }
}

/// Why a link task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEnd {
    /// The stream reached end of file
    Eof,
    Shutdown,
    Error,
}

/// Pump one link until EOF, error or shutdown
pub async fn run_link_task<S>(
    name: &'static str,
    stream: S,
    mut rx: RxSender,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) -> LinkEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = [0u8; READ_BUFFER];
    info!("{} link up ({})", name, rx.kind());

    let end = loop {
        tokio::select! {
            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("{} link closed", name);
                        break LinkEnd::Eof;
                    }
                    Ok(n) => {
                        rx.deliver(&buf[..n]);
                    }
                    Err(e) => {
                        warn!("{} read error: {}", name, e);
                        break LinkEnd::Error;
                    }
                }
            }

            chunk = outgoing.recv() => {
                let Some(chunk) = chunk else {
                    break LinkEnd::Shutdown;
                };
                if let Err(e) = writer.write_all(&chunk).await {
                    warn!("{} write error: {}", name, e);
                    break LinkEnd::Error;
                }
                let _ = writer.flush().await;
            }

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break LinkEnd::Shutdown;
                }
            }
        }
    };

    // whatever the ring already flushed still goes out
    while let Ok(chunk) = outgoing.try_recv() {
        if writer.write_all(&chunk).await.is_err() {
            break;
        }
    }
    let _ = writer.flush().await;
    end
}
