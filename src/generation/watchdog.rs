//! Idle watchdog for a generation awaiting its terminal event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Fires its callback once if no progress is reported for `timeout`.
///
/// Each [`touch`](Self::touch) pushes the deadline out. Disarming or dropping
/// the watchdog guarantees the callback never runs afterwards.
#[derive(Debug)]
pub struct Watchdog {
    touch_tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    pub fn spawn<F>(timeout: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (touch_tx, mut touch_rx) = mpsc::unbounded_channel::<()>();
        let cancel = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));

        let task_cancel = cancel.clone();
        let task_fired = fired.clone();
        let handle = tokio::spawn(async move {
            let sleep = time::sleep(timeout);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => return,
                    touched = touch_rx.recv() => {
                        if touched.is_none() {
                            return;
                        }
                        sleep.as_mut().reset(Instant::now() + timeout);
                    }
                    _ = &mut sleep => {
                        if !task_fired.swap(true, Ordering::AcqRel) {
                            tracing::debug!(
                                timeout_ms = timeout.as_millis() as u64,
                                "watchdog expired"
                            );
                            on_expire();
                        }
                        return;
                    }
                }
            }
        });

        Self {
            touch_tx,
            cancel,
            fired,
            handle,
        }
    }

    /// Record progress.
    pub fn touch(&self) {
        let _ = self.touch_tx.send(());
    }

    pub fn disarm(&self) {
        self.cancel.cancel();
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_idle_window() {
        let (count, cb) = counting();
        let dog = Watchdog::spawn(Duration::from_secs(60), cb);
        time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(dog.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_postpones_expiry() {
        let (count, cb) = counting();
        let dog = Watchdog::spawn(Duration::from_secs(10), cb);
        for _ in 0..5 {
            time::sleep(Duration::from_secs(8)).await;
            dog.touch();
            tokio::task::yield_now().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_watchdog_never_fires() {
        let (count, cb) = counting();
        let dog = Watchdog::spawn(Duration::from_secs(1), cb);
        dog.disarm();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!dog.has_fired());
    }
}
