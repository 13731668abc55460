//! Cancellable timers that report back over a channel.
//!
//! Timer tasks never touch shared state. When they fire they send a value
//! into the owner's event loop, which decides whether the fire is still
//! current.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Send `value` on `tx` after `delay`, unless `cancel` fires first.
pub fn schedule<T>(
    delay: Duration,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<T>,
    value: T,
) where
    T: Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let _ = tx.send(value);
            }
        }
    });
}

/// Restartable single-shot timer.
///
/// Each [`touch`](Self::touch) cancels the pending timer and arms a new
/// one tagged with a fresh sequence number. The fire message carries that
/// number; [`accept`](Self::accept) only acknowledges the latest one, so a
/// fire that raced with a restart or cancel is ignored.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    tx: mpsc::UnboundedSender<T>,
    make: fn(u64) -> T,
    seq: u64,
    pending: Option<CancellationToken>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Create a debouncer that sends `make(seq)` on `tx` when it fires.
    pub fn new(delay: Duration, tx: mpsc::UnboundedSender<T>, make: fn(u64) -> T) -> Self {
        Self {
            delay,
            tx,
            make,
            seq: 0,
            pending: None,
        }
    }

    /// Restart the timer. Must be called inside a tokio runtime.
    pub fn touch(&mut self) {
        self.cancel();
        self.seq += 1;
        let token = CancellationToken::new();
        schedule(
            self.delay,
            token.clone(),
            self.tx.clone(),
            (self.make)(self.seq),
        );
        self.pending = Some(token);
    }

    /// Cancel the pending timer. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a timer is armed.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Acknowledge a fire. Returns false for stale sequence numbers.
    pub fn accept(&mut self, seq: u64) -> bool {
        if self.pending.is_some() && seq == self.seq {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        schedule(Duration::from_millis(500), CancellationToken::new(), tx, 42);

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.recv().await, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        schedule(Duration::from_millis(100), token.clone(), tx, 1);
        token.cancel();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_restarts_on_touch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(Duration::from_millis(300), tx, |seq| seq);

        debouncer.touch();
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.touch();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());

        let seq = rx.recv().await.unwrap();
        assert_eq!(seq, 2);
        assert!(debouncer.accept(seq));
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fire_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel::<u64>();
        let mut debouncer = Debouncer::new(Duration::from_millis(10), tx, |seq| seq);
        debouncer.touch();
        debouncer.touch();
        assert!(!debouncer.accept(1));
        assert!(debouncer.cancel());
        assert!(!debouncer.accept(2));
        assert!(!debouncer.cancel());
    }
}
