//! Live queries over the store's change feed.
//!
//! A live query is a tokio task that runs a query once, then re-runs it
//! whenever a [`Change`] it cares about is published, pushing each result
//! into an mpsc channel. The consumer side is a [`Subscription`].

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use linkup_store::{Change, Database};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::state::SharedDb;

/// Handle to a live stream of snapshots.
///
/// Dropping the subscription or calling [`Subscription::dispose`] stops the
/// producing task together with every listener it owns.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    task: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// A subscription that yields `value` once and then ends. Used when no
    /// backend is configured.
    pub(crate) fn once(value: T) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 on a fresh channel, cannot fail.
        let _ = tx.try_send(value);
        Self { rx, task: None }
    }

    /// Next snapshot, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next snapshot if one is already buffered.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop the subscription. Snapshots still buffered are discarded and
    /// nothing is delivered afterwards.
    pub fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    /// Whether no producer is attached anymore: disposed, or offline.
    pub fn is_disposed(&self) -> bool {
        self.task.is_none()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

/// A listener task owned by a composing task. Aborted on drop.
pub(crate) struct Listener(JoinHandle<()>);

impl Drop for Listener {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawn a live query. The query runs once immediately, then after every
/// change for which `relevant` returns true. Results go to `tx`.
///
/// A failing query is logged and skipped: consumers keep the last value
/// they received. The task ends when `tx` is closed or the change feed
/// shuts down.
pub(crate) fn spawn_query<T, F, Q>(
    db: SharedDb,
    mut changes: broadcast::Receiver<Change>,
    relevant: F,
    mut query: Q,
    tx: mpsc::Sender<T>,
) -> Listener
where
    T: Send + 'static,
    F: Fn(&Change) -> bool + Send + 'static,
    Q: FnMut(&Database) -> Result<T> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        if let Some(value) = run_query(&db, &mut query) {
            if tx.send(value).await.is_err() {
                return;
            }
        }

        loop {
            match changes.recv().await {
                Ok(change) if !relevant(&change) => continue,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Change feed lagged, re-running query");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Change feed closed, stopping live query");
                    break;
                }
            }

            if let Some(value) = run_query(&db, &mut query) {
                if tx.send(value).await.is_err() {
                    break;
                }
            }
        }
    });
    Listener(handle)
}

/// Spawn a live query behind its own [`Subscription`].
pub(crate) fn subscribe<T, F, Q>(
    db: SharedDb,
    changes: broadcast::Receiver<Change>,
    buffer: usize,
    relevant: F,
    query: Q,
) -> Subscription<T>
where
    T: Send + 'static,
    F: Fn(&Change) -> bool + Send + 'static,
    Q: FnMut(&Database) -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer);
    let listener = spawn_query(db, changes, relevant, query, tx);
    let task = tokio::spawn(async move {
        // Keeps the listener alive until this task is aborted.
        let _listener = listener;
        std::future::pending::<()>().await;
    });
    Subscription::new(rx, task)
}

fn run_query<T, Q>(db: &SharedDb, query: &mut Q) -> Option<T>
where
    Q: FnMut(&Database) -> Result<T>,
{
    let guard = match db.lock() {
        Ok(guard) => guard,
        Err(_) => {
            warn!("Database lock poisoned, skipping live query");
            return None;
        }
    };
    match query(&guard) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Live query failed, keeping last value");
            None
        }
    }
}
