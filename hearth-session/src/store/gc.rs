//! Periodic garbage collection of expired sessions.

use super::kv::GarbageCollect;
use crate::error::{SessionError, SessionResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{error, info};

/// A background task that calls [`GarbageCollect::gc`] on a fixed interval.
///
/// Failures are logged and retried on the next tick. The task stops as soon
/// as [`GcTask::shutdown`] is called, even in the middle of a collection.
///
/// ```no_run
/// use hearth_session::store::{GcTask, MemoryKv};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> hearth_session::SessionResult<()> {
/// let kv = Arc::new(MemoryKv::new());
/// let gc = GcTask::spawn(kv.clone(), Duration::from_secs(300))?;
/// // ...
/// gc.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct GcTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl GcTask {
    /// Spawn the collector. The first collection runs one `period` from now.
    ///
    /// A zero `period` is a configuration error.
    pub fn spawn<G>(store: Arc<G>, period: Duration) -> SessionResult<Self>
    where
        G: GarbageCollect + ?Sized + 'static,
    {
        if period.is_zero() {
            return Err(SessionError::Config(
                "garbage collection period must be greater than zero".into(),
            ));
        }

        let (cancel, mut cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    _ = cancel_rx.changed() => break,
                    result = store.gc() => match result {
                        Ok(deleted) => info!(deleted, "Garbage collection successful"),
                        Err(e) => error!(error = %e, "Garbage collection failed"),
                    },
                }
            }

            info!("Garbage collection stopped");
        });

        Ok(Self { cancel, handle })
    }

    /// Stop the collector and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Garbage collection task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
