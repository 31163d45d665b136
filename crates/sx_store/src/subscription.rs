//! Subscriptions.
//!
//! Callers only ever see `Subscription<T>`: a stream of snapshots (or
//! errors) ending when the producer goes away. Two producers exist:
//!
//! - **push** (`from_watch`): forwards every value published on a
//!   `tokio::sync::watch` channel, starting with the current one.
//! - **poll-with-diff** (`polling`): re-reads the source on a fixed interval
//!   and forwards a snapshot only when it differs from the last one sent.
//!
//! Dropping a subscription aborts its producer task.

use std::{future::Future, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::error::StoreError;

const SUBSCRIPTION_BUFFER: usize = 16;

pub struct Subscription<T> {
    rx: mpsc::Receiver<Result<T, StoreError>>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Push-based: current value first, then every change.
    pub fn from_watch(mut source: watch::Receiver<T>) -> Self {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(async move {
            let first = source.borrow_and_update().clone();
            if tx.send(Ok(first)).await.is_err() {
                return;
            }
            while source.changed().await.is_ok() {
                let snapshot = source.borrow_and_update().clone();
                if tx.send(Ok(snapshot)).await.is_err() {
                    break;
                }
            }
        });
        Self { rx, task }
    }
}

impl<T> Subscription<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// Poll-based: fetch immediately, then every `every`; unchanged
    /// snapshots are swallowed, errors are forwarded and polling continues.
    pub fn polling<F, Fut>(every: Duration, mut fetch: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<T> = None;
            loop {
                ticker.tick().await;
                let item = match fetch().await {
                    Ok(snapshot) if last.as_ref() == Some(&snapshot) => continue,
                    Ok(snapshot) => {
                        last = Some(snapshot.clone());
                        Ok(snapshot)
                    }
                    Err(e) => Err(e),
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        Self { rx, task }
    }
}

impl<T> Subscription<T> {
    /// Next snapshot; `None` once the producer has stopped.
    pub async fn next(&mut self) -> Option<Result<T, StoreError>> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn push_delivers_current_then_changes() {
        let (tx, rx) = watch::channel(1u32);
        let mut sub = Subscription::from_watch(rx);
        assert_eq!(sub.next().await.unwrap().unwrap(), 1);
        tx.send_replace(2);
        assert_eq!(sub.next().await.unwrap().unwrap(), 2);
        drop(tx);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_only_forwards_changes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        // 0,0,0,1,1,1,2,...
        let mut sub = Subscription::polling(Duration::from_millis(100), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, StoreError>(n / 3) }
        });
        assert_eq!(sub.next().await.unwrap().unwrap(), 0);
        assert_eq!(sub.next().await.unwrap().unwrap(), 1);
        assert_eq!(sub.next().await.unwrap().unwrap(), 2);
        assert!(calls.load(Ordering::SeqCst) >= 7);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_forwards_errors_and_keeps_going() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut sub = Subscription::polling(Duration::from_millis(100), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StoreError::Unavailable("offline".into()))
                } else {
                    Ok(n)
                }
            }
        });
        assert!(matches!(
            sub.next().await.unwrap(),
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(sub.next().await.unwrap().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stops_the_poller() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut sub = Subscription::polling(Duration::from_millis(100), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, StoreError>(n) }
        });
        sub.next().await.unwrap().unwrap();
        drop(sub);
        let seen = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }
}
