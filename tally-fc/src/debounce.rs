//! Input debouncing
//!
//! Filter edits are committed only after a quiet period with no further
//! input. Each push restarts the timer; only the last value is committed.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Default quiet period before a filter edit is committed
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(750);

/// Sending half of a debounced channel
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawn the debounce task; committed values arrive on the receiver
    ///
    /// When every `Debouncer` is dropped, a pending value is committed
    /// immediately and the receiver then closes.
    pub fn spawn(quiet: Duration) -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, mut input) = mpsc::unbounded_channel::<T>();
        let (output, committed) = mpsc::unbounded_channel::<T>();

        tokio::spawn(async move {
            while let Some(first) = input.recv().await {
                let mut pending = first;
                let mut deadline = Instant::now() + quiet;

                loop {
                    tokio::select! {
                        next = input.recv() => match next {
                            Some(value) => {
                                trace!("Debounce timer restarted");
                                pending = value;
                                deadline = Instant::now() + quiet;
                            }
                            None => {
                                let _ = output.send(pending);
                                return;
                            }
                        },
                        _ = sleep_until(deadline) => {
                            if output.send(pending).is_err() {
                                return;
                            }
                            break;
                        }
                    }
                }
            }
        });

        (Self { tx }, committed)
    }

    /// Offer a new value, restarting the quiet period
    ///
    /// Returns false if the debounce task has stopped.
    pub fn push(&self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }
}
