//! One-shot completion signal for a single request cycle
//!
//! The transport owns the [`CompletionSignal`] and waits on it after the
//! deployment produced a response. The writing half, [`CompletionNotifier`],
//! travels with the request scope to the execution-context bridge, which
//! fires it once its post-handler work is done.
//!
//! The signal moves from `pending` to `signaled` at most once: firing consumes
//! the notifier. Waits are bounded and a timeout is not an error.

use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use crate::error::Error;

/// Creates a connected notifier/signal pair in the `pending` state
pub fn completion() -> (CompletionNotifier, CompletionSignal) {
    let (tx, rx) = watch::channel(false);
    (CompletionNotifier { tx }, CompletionSignal { rx })
}

/// Reading half of the one-shot completion event.
///
/// Can be cloned to let several readers wait on the same event.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    rx: watch::Receiver<bool>
}

/// Writing half of the one-shot completion event
#[derive(Debug)]
pub struct CompletionNotifier {
    tx: watch::Sender<bool>
}

/// How a bounded wait on a [`CompletionSignal`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The notifier fired within the bound
    Signaled,
    /// The bound elapsed while the signal was still pending
    TimedOut,
    /// The notifier was dropped without firing, so no signal can arrive
    Abandoned,
}

impl CompletionNotifier {
    /// Moves the signal into the `signaled` state
    #[inline]
    pub fn signal(self) {
        self.tx.send_replace(true);
    }
}

impl CompletionSignal {
    /// Returns `true` once the notifier has fired
    #[inline]
    pub fn is_signaled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits for the notifier to fire, at most for `timeout`.
    ///
    /// Returns [`WaitOutcome::TimedOut`] rather than an error when the bound
    /// elapses. A cancelled `interrupt` token ends the wait with an
    /// [`ErrorKind::Interrupted`](crate::error::ErrorKind::Interrupted) error,
    /// even if the signal has already fired.
    pub async fn wait(
        &self,
        timeout: Duration,
        interrupt: &CancellationToken
    ) -> Result<WaitOutcome, Error> {
        let mut rx = self.rx.clone();
        tokio::select! {
            biased;
            _ = interrupt.cancelled() => Err(Error::interrupted("completion wait")),
            waited = tokio::time::timeout(timeout, rx.wait_for(|signaled| *signaled)) => {
                let outcome = match waited {
                    Ok(Ok(_)) => WaitOutcome::Signaled,
                    Ok(Err(_)) => WaitOutcome::Abandoned,
                    Err(_) => WaitOutcome::TimedOut,
                };
                Ok(outcome)
            }
        }
    }
}
