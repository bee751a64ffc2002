//! Worker pool: a token-bounded set of execution slots plus the listener
//! thread feeding invocations from the global queue into the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::{Condvar, Mutex};

use crate::config::SystemConfig;
use crate::scheduler::{BusError, Message, MessageBus, Scheduler};

/// Fixed-size pool of slot tokens; acquiring blocks until a slot frees up.
pub struct TokenPool {
    free: Mutex<Vec<usize>>,
    capacity: usize,
    available: Condvar,
}

impl TokenPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new((0..capacity).rev().collect()),
            capacity,
            available: Condvar::new(),
        }
    }

    /// Block until a slot index is available.
    pub fn acquire(&self) -> usize {
        let mut free = self.free.lock();
        loop {
            if let Some(token) = free.pop() {
                return token;
            }
            self.available.wait(&mut free);
        }
    }

    pub fn release(&self, token: usize) {
        let mut free = self.free.lock();
        free.push(token);
        self.available.notify_one();
    }

    /// Number of slots currently in use.
    pub fn taken(&self) -> usize {
        self.capacity - self.free.lock().len()
    }
}

/// The host's worker pool.
pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    tokens: Arc<TokenPool>,
    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(pool_size: usize) -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            tokens: Arc::new(TokenPool::new(pool_size.max(1))),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn tokens(&self) -> &Arc<TokenPool> {
        &self.tokens
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Start the listener that drains the global queue into the scheduler.
    /// The loop ends gracefully when no message arrives within the
    /// configured timeout or when the pool shuts down.
    pub fn start_global_queue(
        &self,
        bus: Arc<dyn MessageBus>,
        scheduler: Arc<dyn Scheduler>,
        config: &SystemConfig,
    ) -> anyhow::Result<()> {
        tracing::info!(queue = %config.queue_name, "starting global queue listener");

        let shutdown = self.shutdown.clone();
        let timeout_ms = config.global_message_timeout_ms;
        let handle = std::thread::Builder::new()
            .name("global-queue".to_owned())
            .spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    match bus.next_message(timeout_ms) {
                        Ok(msg) => {
                            tracing::debug!(call = %msg.label(), "got invocation from queue");
                            scheduler.call_function(msg, false);
                        }
                        Err(BusError::NoResponse(..)) => {
                            tracing::info!(timeout_ms, "no message from global bus, dropping out");
                            return;
                        }
                        Err(err) => {
                            tracing::error!(%err, "global bus failure, dropping out");
                            return;
                        }
                    }
                }
            })
            .context("spawning global queue listener")?;

        self.threads.lock().push(handle);
        Ok(())
    }

    /// Spawn `worker_body` once per acquired slot until shutdown. The body
    /// runs one worker lifetime; its slot is released when it returns.
    pub fn start_pool(
        &self,
        worker_body: Arc<dyn Fn(usize) + Send + Sync>,
    ) -> anyhow::Result<()> {
        tracing::info!("starting worker thread pool");

        let shutdown = self.shutdown.clone();
        let tokens = self.tokens.clone();
        let handle = std::thread::Builder::new()
            .name("worker-pool".to_owned())
            .spawn(move || {
                let mut workers = Vec::new();
                while !shutdown.load(Ordering::SeqCst) {
                    let token = tokens.acquire();
                    if shutdown.load(Ordering::SeqCst) {
                        tokens.release(token);
                        break;
                    }
                    let body = worker_body.clone();
                    let worker_tokens = tokens.clone();
                    match std::thread::Builder::new()
                        .name(format!("worker-{token}"))
                        .spawn(move || {
                            body(token);
                            worker_tokens.release(token);
                        }) {
                        Ok(w) => workers.push(w),
                        Err(err) => {
                            tracing::error!(%err, "failed to spawn worker thread");
                            tokens.release(token);
                            break;
                        }
                    }
                }

                tracing::info!(count = workers.len(), "waiting for worker threads");
                for w in workers {
                    let _ = w.join();
                }
            })
            .context("spawning worker pool supervisor")?;

        self.threads.lock().push(handle);
        Ok(())
    }

    /// Warm up the python runtime when configured; a no-op otherwise.
    pub fn prepare_python_runtime(&self, scheduler: &dyn Scheduler, config: &SystemConfig) {
        if !config.python_preload {
            tracing::info!("not preloading python runtime");
            return;
        }

        tracing::info!("preparing python runtime");
        let mut msg = Message::factory("python", "noop");
        msg.is_python = true;
        msg.python_user = "python".to_owned();
        msg.python_function = "noop".to_owned();
        scheduler.call_function(msg, true);
        tracing::info!("python runtime prepared");
    }

    /// Flag shutdown and join every listener and supervisor thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            if let Some(name) = handle.thread().name() {
                tracing::info!(name, "waiting for thread to finish");
            }
            let _ = handle.join();
        }
        tracing::info!("worker pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use crate::mock::MockCluster;

    use super::*;

    #[test]
    fn token_pool_bounds_concurrency() {
        let pool = Arc::new(TokenPool::new(2));
        let t0 = pool.acquire();
        let t1 = pool.acquire();
        assert_eq!(pool.taken(), 2);

        let contender = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.acquire())
        };
        // Release one slot; the contender must get exactly that one back.
        pool.release(t0);
        let t2 = contender.join().unwrap();
        assert_eq!(t2, t0);
        pool.release(t1);
        pool.release(t2);
        assert_eq!(pool.taken(), 0);
    }

    #[test]
    fn global_queue_drains_until_timeout() {
        let cluster = Arc::new(MockCluster::new());
        cluster.push_inbound(Message::factory("demo", "a"));
        cluster.push_inbound(Message::factory("demo", "b"));

        let config = SystemConfig {
            global_message_timeout_ms: 10,
            ..SystemConfig::default()
        };
        let pool = WorkerPool::new(2);
        pool.start_global_queue(cluster.clone(), cluster.clone(), &config)
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while cluster.submitted().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        pool.shutdown();

        let submitted = cluster.submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].function, "a");
        assert_eq!(submitted[1].function, "b");
    }

    #[test]
    fn python_preload_submits_blocking_warmup() {
        let cluster = MockCluster::new();
        let pool = WorkerPool::new(1);

        pool.prepare_python_runtime(&cluster, &SystemConfig::default());
        assert!(cluster.submitted().is_empty());

        let config = SystemConfig {
            python_preload: true,
            ..SystemConfig::default()
        };
        pool.prepare_python_runtime(&cluster, &config);
        let submitted = cluster.submitted();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].is_python);
        assert_eq!(submitted[0].python_function, "noop");
    }

    #[test]
    fn pool_runs_worker_bodies_and_shuts_down() {
        let pool = WorkerPool::new(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let body = {
            let ran = ran.clone();
            Arc::new(move |_token: usize| {
                ran.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
            }) as Arc<dyn Fn(usize) + Send + Sync>
        };
        pool.start_pool(body).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));
        pool.shutdown();
        assert!(ran.load(Ordering::SeqCst) >= 2);
    }
}
