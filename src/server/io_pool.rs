// src/server/io_pool.rs

//! A fixed pool of single-threaded runtimes that own connection I/O.
//!
//! Each accepted connection is pinned to one worker, chosen round-robin, for its
//! whole life. The accept loop, background tasks and the metrics server stay on the
//! main runtime.

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub struct IoPool {
    handles: Vec<Handle>,
    next: AtomicUsize,
    stop_txs: Mutex<Vec<oneshot::Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl IoPool {
    /// Starts `size` I/O worker threads and waits until each runtime is up.
    pub fn start(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(anyhow!("I/O pool needs at least one worker"));
        }
        let mut handles = Vec::with_capacity(size);
        let mut stop_txs = Vec::with_capacity(size);
        let mut threads = Vec::with_capacity(size);

        for index in 0..size {
            let (handle_tx, handle_rx) = std_mpsc::channel();
            let (stop_tx, stop_rx) = oneshot::channel::<()>();
            let thread = std::thread::Builder::new()
                .name(format!("tilegate-io-{index}"))
                .spawn(move || {
                    let runtime = match Builder::new_current_thread().enable_all().build() {
                        Ok(rt) => rt,
                        Err(e) => {
                            let _ = handle_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = handle_tx.send(Ok(runtime.handle().clone()));
                    // Drive the runtime until asked to stop; spawned connection tasks
                    // make progress while we wait here.
                    runtime.block_on(async move {
                        let _ = stop_rx.await;
                    });
                    debug!("I/O worker {} stopped.", index);
                })?;

            let handle = handle_rx
                .recv()
                .map_err(|_| anyhow!("I/O worker {index} exited during startup"))?
                .map_err(|e| anyhow!("failed to build runtime for I/O worker {index}: {e}"))?;
            handles.push(handle);
            stop_txs.push(stop_tx);
            threads.push(thread);
        }

        info!("I/O pool started with {} workers.", size);
        Ok(Self {
            handles,
            next: AtomicUsize::new(0),
            stop_txs: Mutex::new(stop_txs),
            threads: Mutex::new(threads),
        })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// The runtime the next connection should be pinned to.
    pub fn next_handle(&self) -> &Handle {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        &self.handles[index]
    }

    /// Stops every worker and joins its thread. Tasks still running on a worker are
    /// dropped with its runtime.
    pub async fn shutdown(&self) {
        for stop_tx in self.stop_txs.lock().drain(..) {
            let _ = stop_tx.send(());
        }
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        if threads.is_empty() {
            return;
        }
        let joined = tokio::task::spawn_blocking(move || {
            for thread in threads {
                if thread.join().is_err() {
                    warn!("An I/O worker thread panicked.");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            warn!("Failed to join I/O workers: {}", e);
        }
        info!("I/O pool stopped.");
    }
}
