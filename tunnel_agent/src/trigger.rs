//! Many-producer, single-consumer renewal signal with rendezvous semantics:
//! [`TriggerSender::fire`] completes only once the consumer has taken the signal.

use thiserror::Error as ThisError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(Debug, ThisError, PartialEq, Eq)]
#[error("renewal trigger consumer is gone")]
pub struct TriggerClosed;

struct Signal {
    source: String,
    taken: oneshot::Sender<()>,
}

/// Producer half, one clone per monitor.
#[derive(Clone)]
pub struct TriggerSender {
    tx: mpsc::Sender<Signal>,
}

/// Consumer half.
pub struct TriggerReceiver {
    rx: mpsc::Receiver<Signal>,
}

/// Create a connected sender/receiver pair.
#[must_use]
pub fn rendezvous() -> (TriggerSender, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (TriggerSender { tx }, TriggerReceiver { rx })
}

impl TriggerSender {
    /// Hand a renewal signal from `source` to the consumer and wait until it is taken.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerClosed`] if the receiver was dropped before taking the signal.
    pub async fn fire(&self, source: &str) -> Result<(), TriggerClosed> {
        let (taken, taken_rx) = oneshot::channel();
        self.tx
            .send(Signal {
                source: source.to_string(),
                taken,
            })
            .await
            .map_err(|_| TriggerClosed)?;
        taken_rx.await.map_err(|_| TriggerClosed)
    }
}

impl TriggerReceiver {
    /// Wait for the next signal and return its source. `None` once every sender is gone.
    ///
    /// Signals whose sender stopped waiting before they were taken are skipped.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            let Signal { source, taken } = self.rx.recv().await?;
            if taken.send(()).is_ok() {
                return Some(source);
            }
            debug!(%source, "Skipping abandoned renewal trigger");
        }
    }
}
