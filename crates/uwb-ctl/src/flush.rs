//! Background flush task
//!
//! Wakes on every `enqueue_and_notify` and on a periodic tick, and pushes
//! the tx ring out to the active transport. A final drain runs when the
//! shutdown flag flips.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

use crate::error::CtlError;
use crate::txbuf::TxRing;

/// Flush until the ring is empty or the transport stops taking data
pub fn drain(tx: &TxRing) -> usize {
    let mut total = 0;
    loop {
        match tx.flush() {
            Ok(report) => {
                total += report.sent;
                if report.remaining == 0 || report.sent == 0 {
                    break;
                }
            }
            Err(CtlError::Busy) => break,
            Err(CtlError::TransportUnavailable) => {
                trace!("no transport, {} byte(s) held", tx.pending());
                break;
            }
            Err(e) => {
                debug!("flush stopped: {}", e);
                break;
            }
        }
    }
    total
}

/// Run the flush loop until `shutdown` becomes true or its sender drops
pub async fn run_flush_task(tx: Arc<TxRing>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tx.notified() => {}
            _ = tick.tick() => {
                if tx.pending() == 0 {
                    continue;
                }
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
        drain(&tx);
    }

    let sent = drain(&tx);
    debug!("flush task stopped after final drain of {} byte(s)", sent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorReporter;
    use crate::testutil::SharedBytes;

    #[test]
    fn test_drain_empties_ring() {
        let tx = TxRing::new(256, 16, Arc::new(ErrorReporter::new()));
        let out = SharedBytes::default();
        tx.set_usb_sink(Some(Box::new(out.sink())));
        tx.enqueue(&[7u8; 100]).unwrap();

        assert_eq!(drain(&tx), 100);
        assert_eq!(tx.pending(), 0);
        assert_eq!(out.take(), vec![7u8; 100]);
    }

    #[test]
    fn test_drain_without_transport_keeps_bytes() {
        let tx = TxRing::new(256, 16, Arc::new(ErrorReporter::new()));
        tx.enqueue(b"held").unwrap();
        assert_eq!(drain(&tx), 0);
        assert_eq!(tx.pending(), 4);
    }

    #[tokio::test]
    async fn test_flush_task_delivers_and_stops() {
        let tx = Arc::new(TxRing::new(1024, 64, Arc::new(ErrorReporter::new())));
        let out = SharedBytes::default();
        tx.set_usb_sink(Some(Box::new(out.sink())));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(run_flush_task(Arc::clone(&tx), Duration::from_millis(5), stop_rx));
        tx.enqueue_and_notify(b"STAT reply\r\n").unwrap();

        for _ in 0..100 {
            if tx.pending() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        stop_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(out.take(), b"STAT reply\r\n");
    }
}
