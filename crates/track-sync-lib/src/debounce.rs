//! Viewport debouncer
//!
//! Continuous pan/zoom produces a burst of viewport changes. Only the last one,
//! after a quiet period, is published as the settled viewport.

use crate::ViewportBounds;
use crate::utils::lock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Quiet period before a viewport counts as settled
pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(300);

/// Collapses bursts of viewport changes into single settled-viewport publications.
///
/// Must be used from within a tokio runtime: each change spawns a timer task.
pub struct ViewportDebouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
    last_settled: Arc<Mutex<Option<ViewportBounds>>>,
    settled_tx: mpsc::UnboundedSender<ViewportBounds>,
    closed: AtomicBool,
}

impl ViewportDebouncer {
    /// Create a debouncer and the receiver on which settled viewports are published
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<ViewportBounds>) {
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            delay,
            pending: Mutex::new(None),
            last_settled: Arc::new(Mutex::new(None)),
            settled_tx,
            closed: AtomicBool::new(false),
        };
        (debouncer, settled_rx)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Restart the quiet period with `bounds` as the candidate settled viewport
    pub fn on_viewport_change(&self, bounds: ViewportBounds) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let mut pending = lock(&self.pending);
        if let Some(timer) = pending.take() {
            timer.abort();
        }

        let delay = self.delay;
        let last_settled = Arc::clone(&self.last_settled);
        let tx = self.settled_tx.clone();
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            *lock(&last_settled) = Some(bounds);
            tracing::debug!(?bounds, "Viewport settled");
            let _ = tx.send(bounds);
        }));
    }

    /// Republish the last settled viewport unchanged.
    ///
    /// Returns false if nothing has settled yet or the debouncer was shut down.
    pub fn retry(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let Some(bounds) = *lock(&self.last_settled) else {
            return false;
        };
        tracing::debug!(?bounds, "Republishing settled viewport");
        self.settled_tx.send(bounds).is_ok()
    }

    /// Most recently published settled viewport
    pub fn last_settled(&self) -> Option<ViewportBounds> {
        *lock(&self.last_settled)
    }

    /// Whether a quiet period is currently running
    pub fn is_pending(&self) -> bool {
        lock(&self.pending)
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Cancel any pending timer. Nothing is published afterwards.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(timer) = lock(&self.pending).take() {
            timer.abort();
        }
    }
}

impl Drop for ViewportDebouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn viewport(offset: f64) -> ViewportBounds {
        ViewportBounds::new(51.4 + offset, 51.6 + offset, -0.3, 0.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_change_settles_after_delay() {
        let (debouncer, mut rx) = ViewportDebouncer::new(DEFAULT_DEBOUNCE_DELAY);
        debouncer.on_viewport_change(viewport(0.0));

        sleep(Duration::from_millis(299)).await;
        assert!(rx.try_recv().is_err());
        assert!(debouncer.is_pending());

        sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.try_recv().unwrap(), viewport(0.0));
        assert_eq!(debouncer.last_settled(), Some(viewport(0.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_publishes_once_with_last_bounds() {
        let (debouncer, mut rx) = ViewportDebouncer::new(Duration::from_millis(300));

        debouncer.on_viewport_change(viewport(0.0));
        sleep(Duration::from_millis(50)).await;
        debouncer.on_viewport_change(viewport(1.0));

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(rx.try_recv().unwrap(), viewport(1.0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_republishes_last_settled() {
        let (debouncer, mut rx) = ViewportDebouncer::new(Duration::from_millis(300));
        assert!(!debouncer.retry());

        debouncer.on_viewport_change(viewport(0.0));
        sleep(Duration::from_millis(400)).await;
        assert_eq!(rx.try_recv().unwrap(), viewport(0.0));

        assert!(debouncer.retry());
        assert_eq!(rx.try_recv().unwrap(), viewport(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_timer() {
        let (debouncer, mut rx) = ViewportDebouncer::new(Duration::from_millis(300));
        debouncer.on_viewport_change(viewport(0.0));
        debouncer.shutdown();

        sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());

        debouncer.on_viewport_change(viewport(1.0));
        sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());
        assert!(!debouncer.retry());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_timer() {
        let (debouncer, mut rx) = ViewportDebouncer::new(Duration::from_millis(300));
        debouncer.on_viewport_change(viewport(0.0));
        drop(debouncer);

        sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());
    }
}
