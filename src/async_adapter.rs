//! Async adapter: drives futures and streams into the snapshot model.
//!
//! Every dispatch gets a sequence number from the container's [`InFlight`]
//! slot. Results are delivered through [`Settle::settle`] together with that
//! number, and the container applies them only while the number is still the
//! latest one dispatched. Refresh, write and dispose bump the number and abort
//! the task, so a cancelled computation can never write back.

use std::future::Future;
use std::sync::Weak;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::ConfigError;

/// Receiver of async results, implemented by containers.
pub(crate) trait Settle<T>: Send + Sync + 'static {
    /// Apply one result. Returns `false` when `seq` is stale, which tells a
    /// stream driver to stop.
    fn settle(&self, seq: u64, result: anyhow::Result<T>) -> bool;

    /// A stream ran dry.
    fn stream_closed(&self, seq: u64);
}

/// Which dispatch currently owns the container, plus its task.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    seq: u64,
    task: Option<JoinHandle<()>>,
    /// Whether errors from the current dispatch are refresh errors.
    refresh: bool,
}

impl InFlight {
    /// The number the next [`begin`](Self::begin) hands out.
    pub(crate) fn upcoming(&self) -> u64 {
        self.seq + 1
    }

    /// Supersede whatever is running and hand out a fresh sequence number.
    pub(crate) fn begin(&mut self, refresh: bool) -> u64 {
        self.cancel();
        self.refresh = refresh;
        self.seq
    }

    /// Remember the task for `seq`, or abort it right away if it is already stale.
    pub(crate) fn attach(&mut self, seq: u64, task: JoinHandle<()>) {
        if seq == self.seq {
            self.task = Some(task);
        } else {
            task.abort();
        }
    }

    pub(crate) fn is_current(&self, seq: u64) -> bool {
        self.seq == seq
    }

    pub(crate) fn is_refresh(&self) -> bool {
        self.refresh
    }

    /// A result of the current dispatch was applied; any later one (the next
    /// stream event) replaces settled state and counts as a refresh.
    pub(crate) fn applied(&mut self) {
        self.refresh = true;
    }

    /// The dispatch for `seq` finished on its own.
    pub(crate) fn finish(&mut self, seq: u64) {
        if seq == self.seq {
            self.task = None;
        }
    }

    /// Invalidate the current dispatch. Its completion, if any, is dropped.
    pub(crate) fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            cov_mark::hit!(in_flight_task_aborted);
            task.abort();
        }
        self.seq += 1;
    }
}

/// Spawn on the ambient tokio runtime.
pub(crate) fn spawn<F>(future: F) -> Result<JoinHandle<()>, ConfigError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = Handle::try_current().map_err(|_| ConfigError::NoAsyncRuntime)?;
    Ok(handle.spawn(future))
}

/// Drive a single-value computation.
pub(crate) fn spawn_future<T, S>(
    target: Weak<S>,
    seq: u64,
    future: BoxFuture<'static, anyhow::Result<T>>,
) -> Result<JoinHandle<()>, ConfigError>
where
    T: Send + 'static,
    S: Settle<T>,
{
    spawn(async move {
        let result = future.await;
        if let Some(target) = target.upgrade() {
            target.settle(seq, result);
        }
    })
}

/// Drive a multi-value computation until it ends, goes stale, or its
/// container is dropped.
pub(crate) fn spawn_stream<T, S>(
    target: Weak<S>,
    seq: u64,
    mut stream: BoxStream<'static, anyhow::Result<T>>,
) -> Result<JoinHandle<()>, ConfigError>
where
    T: Send + 'static,
    S: Settle<T>,
{
    spawn(async move {
        while let Some(event) = stream.next().await {
            let Some(target) = target.upgrade() else {
                return;
            };
            if !target.settle(seq, event) {
                return;
            }
        }
        if let Some(target) = target.upgrade() {
            target.stream_closed(seq);
        }
    })
}
