//! Strand-serialized FIFO of asynchronous actions.
//!
//! Each queue owns its state (one half of the split WebSocket transport)
//! inside a dedicated worker task. Actions are future-producing closures;
//! the worker runs exactly one at a time, in enqueue order, so at most one
//! operation per direction is ever outstanding.

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};

pub(crate) type Action<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send>;

/// Box a future-producing closure as a queue action.
///
/// Going through this helper (with an annotated closure argument) is what
/// lets the compiler infer the higher-ranked lifetime.
pub(crate) fn action<S, F>(f: F) -> Action<S>
where
    F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

pub(crate) struct ActionQueue<S> {
    tx: mpsc::UnboundedSender<Action<S>>,
}

impl<S> Clone for ActionQueue<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> ActionQueue<S> {
    /// Start the worker that owns `state` and drains the queue.
    ///
    /// The worker stops (dropping everything still queued) when `force`
    /// fires or when every queue handle is gone; `finalizer` then runs
    /// once against the state before it is dropped.
    pub(crate) fn spawn<F>(mut state: S, mut force: watch::Receiver<bool>, finalizer: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Action<S>>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = force.changed() => break,
                    act = rx.recv() => match act {
                        Some(act) => act(&mut state).await,
                        None => break,
                    },
                }
            }
            finalizer(&mut state).await;
        });

        Self { tx }
    }

    /// Enqueue an action. Returns `false` if the worker is gone.
    pub(crate) fn push(&self, act: Action<S>) -> bool {
        self.tx.send(act).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn actions_run_one_at_a_time_in_enqueue_order() {
        let (_force_tx, force_rx) = watch::channel(false);
        let order: Arc<Mutex<Vec<u32>>> = Arc::default();
        let queue: ActionQueue<()> =
            ActionQueue::spawn((), force_rx, |_: &mut ()| Box::pin(async {}));

        let (done_tx, done_rx) = oneshot::channel();
        let mut done_tx = Some(done_tx);
        for i in 0..5u32 {
            let order = Arc::clone(&order);
            // earlier actions sleep longer; serialization must still
            // preserve enqueue order
            let mut done = if i == 4 { done_tx.take() } else { None };
            assert!(queue.push(action(move |_: &mut ()| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(u64::from(5 - i) * 10)).await;
                    order.lock().unwrap().push(i);
                    if let Some(done) = done.take() {
                        let _ = done.send(());
                    }
                })
            })));
        }

        done_rx.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn force_signal_skips_queued_actions_and_finalizes() {
        let (force_tx, force_rx) = watch::channel(false);
        let (fin_tx, fin_rx) = oneshot::channel();
        let ran: Arc<Mutex<u32>> = Arc::default();

        let mut fin_tx = Some(fin_tx);
        let queue: ActionQueue<()> = ActionQueue::spawn((), force_rx, move |_: &mut ()| {
            Box::pin(async move {
                if let Some(tx) = fin_tx.take() {
                    let _ = tx.send(());
                }
            })
        });

        // park the worker on a slow action, then force
        let ran2 = Arc::clone(&ran);
        queue.push(action(move |_: &mut ()| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                *ran2.lock().unwrap() += 1;
            })
        }));
        let ran3 = Arc::clone(&ran);
        queue.push(action(move |_: &mut ()| {
            Box::pin(async move {
                *ran3.lock().unwrap() += 1;
            })
        }));

        force_tx.send(true).unwrap();
        fin_rx.await.unwrap();
        // the queued (not yet started) action never ran
        assert!(*ran.lock().unwrap() <= 1);
    }
}
