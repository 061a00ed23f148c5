//! The shared I/O runtime.
//!
//! A single multi-threaded executor drives every listener, connection and
//! client in the process. [`Runtime::start`] launches the worker threads;
//! [`Runtime::stop`] shuts the executor down and resolves once all workers
//! have joined. Dropping a started runtime stops it implicitly.

use crate::error::ConfigError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// A handle to the worker threads collectively driving the executor.
#[derive(Debug)]
pub struct Runtime {
    inner: Option<tokio::runtime::Runtime>,
}

impl Runtime {
    /// Launch `num_threads` worker threads.
    ///
    /// Fails with [`ConfigError::InvalidThreadCount`] when `num_threads`
    /// is zero.
    pub fn start(num_threads: usize) -> Result<Self, ConfigError> {
        if num_threads == 0 {
            return Err(ConfigError::InvalidThreadCount);
        }

        let inner = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(num_threads)
            .thread_name("wharf-io")
            .enable_all()
            .build()
            .map_err(ConfigError::Runtime)?;

        tracing::debug!(num_threads, "started I/O runtime");

        Ok(Self { inner: Some(inner) })
    }

    /// A handle for spawning onto this runtime.
    pub fn handle(&self) -> tokio::runtime::Handle {
        match &self.inner {
            Some(rt) => rt.handle().clone(),
            None => unreachable!("runtime only taken by stop(), which consumes self"),
        }
    }

    /// Run a future to completion on this runtime, blocking the calling
    /// thread.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        match &self.inner {
            Some(rt) => rt.block_on(fut),
            None => unreachable!("runtime only taken by stop(), which consumes self"),
        }
    }

    /// Stop the executor.
    ///
    /// Outstanding operations complete with a cancellation error. The
    /// returned future resolves once every worker thread has joined; the
    /// shutdown itself is bounded by a 30 s grace period.
    pub fn stop(mut self) -> StopFuture {
        let (tx, rx) = oneshot::channel();
        match self.inner.take() {
            Some(rt) => {
                // shutdown_timeout blocks, so it runs on a reaper thread.
                std::thread::spawn(move || {
                    rt.shutdown_timeout(SHUTDOWN_GRACE);
                    let _ = tx.send(());
                });
            }
            None => {
                let _ = tx.send(());
            }
        }
        StopFuture { rx }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some(rt) = self.inner.take() {
            tracing::debug!("runtime dropped while running, shutting down");
            rt.shutdown_background();
        }
    }
}

/// Future returned by [`Runtime::stop`]; resolves once all worker threads
/// have joined.
#[derive(Debug)]
pub struct StopFuture {
    rx: oneshot::Receiver<()>,
}

impl Future for StopFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}

impl StopFuture {
    /// Block the calling thread until the shutdown completes.
    pub fn wait(self) {
        let _ = self.rx.blocking_recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_threads_is_a_config_error() {
        assert!(matches!(
            Runtime::start(0),
            Err(ConfigError::InvalidThreadCount)
        ));
    }

    #[test]
    fn start_and_stop_joins_workers() {
        let rt = Runtime::start(2).unwrap();
        let answer = rt.block_on(async { 6 * 7 });
        assert_eq!(answer, 42);
        rt.stop().wait();
    }
}
