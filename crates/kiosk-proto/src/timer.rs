use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Single-shot timer that delivers one event into a channel. At most one
/// timer task is alive per instance: arming again or dropping the timer
/// aborts the previous task.
#[derive(Debug, Default)]
pub struct RotationTimer {
    handle: Option<JoinHandle<()>>,
}

impl RotationTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<E: Send + 'static>(&mut self, after: Duration, tx: mpsc::Sender<E>, event: E) {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(event).await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RotationTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = RotationTimer::new();
        timer.arm(Duration::from_secs(5), tx, 7u64);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_pending_tick() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = RotationTimer::new();
        timer.arm(Duration::from_secs(5), tx.clone(), 1u64);
        timer.arm(Duration::from_secs(10), tx, 2u64);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_stop_delivery() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = RotationTimer::new();
        timer.arm(Duration::from_secs(1), tx.clone(), 1u64);
        timer.cancel();
        assert!(!timer.is_armed());

        {
            let mut dropped = RotationTimer::new();
            dropped.arm(Duration::from_secs(1), tx, 2u64);
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
