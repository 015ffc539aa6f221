//! Coordinates the one stop signal shared by every background task a worker pool spawns:
//! workers, the heartbeater, the retry/scheduled requeuers, the dead-pool reaper, and the
//! periodic enqueuer (§5). None of those tasks hold a lock or a store connection across a wait;
//! each just selects between its own timer and a [`ShutdownSignal`]'s [`until_triggered`].
//!
//! [`until_triggered`]: ShutdownSignal::until_triggered

use tokio::select;
use tokio::signal::ctrl_c;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Owns the trigger. A pool's caller creates one, hands it to the pool builder's `start`, and
/// later calls [`PoolShutdown::trigger`] from the pool's own `stop` — or lets a SIGINT do it
/// instead.
#[derive(Debug)]
pub struct PoolShutdown {
    watcher: JoinHandle<()>,
    trigger: Option<oneshot::Sender<()>>,
    signal: ShutdownSignal,
}

/// A cheaply cloneable handle a background task selects on to learn shutdown has begun.
#[derive(Clone, Debug)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl Default for PoolShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolShutdown {
    pub fn new() -> PoolShutdown {
        // Flips to true (and stays readable after the sender drops) once shutdown begins.
        let (triggered_tx, triggered_rx) = watch::channel(false);

        // Either a SIGINT or an explicit `trigger()` call fires this oneshot.
        let (trigger_tx, trigger_rx) = oneshot::channel();

        let watcher = tokio::spawn(async move {
            select! {
                _ = ctrl_c() => {},
                _ = trigger_rx => {},
            };

            // Ignore the error: a send can only fail if every `ShutdownSignal` clone was
            // already dropped, which means nobody is left to care.
            let _ = triggered_tx.send(true);
        });

        PoolShutdown {
            watcher,
            trigger: Some(trigger_tx),
            signal: ShutdownSignal(triggered_rx),
        }
    }

    /// Hand out another handle to the shutdown signal. Safe to call after shutdown has already
    /// started; the new handle will immediately report [`ShutdownSignal::is_triggered`].
    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Begin shutdown manually, without waiting for SIGINT. Idempotent: a second call is a no-op.
    pub fn trigger(&mut self) {
        if let Some(sender) = self.trigger.take() {
            let _ = sender.send(());
        }
    }

    /// Waits for the background watcher task to have observed the trigger (SIGINT or
    /// [`trigger`](Self::trigger)) and fanned it out to every [`ShutdownSignal`]. Consuming
    /// `self` here keeps callers from trying to trigger again after this resolves.
    pub async fn wait_until_finished(self) {
        let _ = self.watcher.await;
    }
}

impl ShutdownSignal {
    /// Non-blocking check of whether shutdown has begun.
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown has begun. Intended to be used in a `tokio::select!` alongside a
    /// task's normal work loop, never awaited on its own.
    pub async fn until_triggered(&mut self) {
        loop {
            match self.0.changed().await {
                Ok(_) => {
                    if *self.0.borrow() {
                        return;
                    }
                }
                // Sender side closed without ever flipping to true: treat that the same as
                // shutdown, since nothing will ever notify us again.
                Err(_) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use libc::{getpid, kill, SIGINT};
    use tokio::{sync::oneshot::error::TryRecvError, time::timeout};

    fn send_sigint() {
        unsafe {
            kill(getpid(), SIGINT);
        }
    }

    #[tokio::test]
    async fn signal_is_send_and_sync() {
        fn takes_send_sync<T: Send + Sync>(_value: T) {}

        let shutdown = PoolShutdown::new();
        takes_send_sync(shutdown.signal());
    }

    #[tokio::test]
    async fn manual_trigger_fans_out_to_every_signal_handle() {
        let mut shutdown = PoolShutdown::new();

        let mut worker_signal = shutdown.signal();
        assert!(!worker_signal.is_triggered());
        let (worker_done_tx, mut worker_done_rx) = oneshot::channel::<()>();
        let worker_task = tokio::spawn(async move {
            worker_signal.until_triggered().await;
            worker_done_tx.send(()).unwrap();
        });
        assert_eq!(worker_done_rx.try_recv(), Err(TryRecvError::Empty));

        let reaper_signal = shutdown.signal();
        assert!(!reaper_signal.is_triggered());

        shutdown.trigger();

        match timeout(Duration::from_secs(2), worker_task).await {
            Ok(Ok(())) => {}
            x => panic!("worker task never observed the trigger: {:?}", x),
        }
        assert!(reaper_signal.is_triggered());

        // A handle created after the trigger should already observe it.
        let late_signal = shutdown.signal();
        assert!(late_signal.is_triggered());

        match timeout(Duration::from_secs(2), shutdown.wait_until_finished()).await {
            Ok(()) => {}
            x => panic!("watcher task never finished: {:?}", x),
        }
    }

    #[tokio::test]
    async fn sigint_triggers_shutdown() {
        let shutdown = PoolShutdown::new();

        let mut heartbeat_signal = shutdown.signal();
        assert!(!heartbeat_signal.is_triggered());
        let (done_tx, mut done_rx) = oneshot::channel::<()>();
        let done_task = tokio::spawn(async move {
            heartbeat_signal.until_triggered().await;
            done_tx.send(()).unwrap();
        });
        assert_eq!(done_rx.try_recv(), Err(TryRecvError::Empty));

        tokio::task::yield_now().await;
        send_sigint();

        match timeout(Duration::from_secs(2), done_task).await {
            Ok(Ok(())) => {}
            x => panic!("task never observed the SIGINT: {:?}", x),
        };

        match timeout(Duration::from_secs(2), shutdown.wait_until_finished()).await {
            Ok(()) => {}
            x => panic!("watcher task did not exit: {:?}", x),
        }
    }
}
