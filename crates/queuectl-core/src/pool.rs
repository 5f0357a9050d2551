//! Supervises N workers, propagates shutdown, bounds stop latency.
//!
//! Two execution modes share one shutdown protocol: [`WorkerPool::start`]
//! (thread-backed, the default -- each worker runs on its own OS thread with
//! its own single-threaded runtime) and [`WorkerPool::start_processes`]
//! (process-backed -- each worker is a re-exec of the current binary,
//! preferred where crash isolation between workers matters more than the
//! extra startup cost).

use crate::config::Config;
use crate::executor::Executor;
use crate::manager::QueueManager;
use crate::store::JobStore;
use crate::worker::{Worker, WorkerHealth, WorkerHealthStatus};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const GRACE_TIMEOUT: Duration = Duration::from_secs(30);
const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// A running set of workers plus the machinery to stop them.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    threads: Vec<JoinHandle<()>>,
    processes: Vec<Child>,
    pid_file: Option<PathBuf>,
    health: Vec<Arc<WorkerHealth>>,
}

impl WorkerPool {
    /// Spawn `count` thread-backed workers against `manager`/`executor`.
    /// Each worker gets its own clone of the manager (which itself wraps a
    /// shared `Arc<S>` store handle) and the same executor instance.
    pub fn start<S, E>(count: usize, manager: QueueManager<S>, executor: Arc<E>) -> WorkerPool
    where
        S: JobStore + 'static,
        E: Executor + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut threads = Vec::with_capacity(count);
        let mut health = Vec::with_capacity(count);

        for id in 0..count {
            let mut worker = Worker::new(
                id,
                manager.clone(),
                executor.clone(),
                manager.config().clone(),
                shutdown_rx.clone(),
            );
            health.push(worker.health());
            threads.push(tokio::spawn(async move {
                worker.run().await;
            }));
        }

        tracing::info!(count, "worker pool started in thread mode");
        WorkerPool {
            shutdown_tx,
            threads,
            processes: Vec::new(),
            pid_file: None,
            health,
        }
    }

    /// Spawn `count` process-backed workers by re-executing the current
    /// binary with `worker_subcommand` (e.g. `["internal-worker", "--id"]`,
    /// to which the worker's index is appended). The child is expected to
    /// build its own `QueueManager`/`Executor` from `config`'s db path and
    /// run a single worker loop until it receives SIGTERM/SIGINT.
    ///
    /// Returns an error if the current executable path cannot be resolved or
    /// a child fails to spawn.
    pub fn start_processes(
        count: usize,
        config: &Config,
        worker_subcommand: &[&str],
        daemon: bool,
    ) -> io::Result<WorkerPool> {
        let exe = std::env::current_exe()?;
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let mut processes = Vec::with_capacity(count);

        for id in 0..count {
            let mut cmd = Command::new(&exe);
            cmd.args(worker_subcommand);
            cmd.arg(id.to_string());
            cmd.arg("--db-path");
            cmd.arg(&config.db_path);
            cmd.kill_on_drop(true);
            let child = cmd.spawn()?;
            processes.push(child);
        }

        let pid_file = if daemon {
            Some(write_pid_manifest(&processes)?)
        } else {
            None
        };

        tracing::info!(count, "worker pool started in process mode");
        Ok(WorkerPool {
            shutdown_tx,
            threads: Vec::new(),
            processes,
            pid_file,
            health: Vec::new(),
        })
    }

    /// Signal shutdown and wait for every worker to exit, escalating to
    /// terminate then kill for stragglers. Thread-backed workers cooperate
    /// via the shared signal alone; process-backed workers are additionally
    /// sent SIGTERM (unix) or killed directly (elsewhere) if still alive
    /// after the grace period.
    pub async fn stop(mut self) {
        tracing::info!(
            threads = self.threads.len(),
            processes = self.processes.len(),
            "stopping worker pool"
        );
        self.shutdown_tx.send(true).ok();

        for handle in self.threads.drain(..) {
            if tokio::time::timeout(GRACE_TIMEOUT, handle).await.is_err() {
                tracing::warn!("worker thread did not exit within grace period");
            }
        }

        for mut child in self.processes.drain(..) {
            if tokio::time::timeout(GRACE_TIMEOUT, child.wait())
                .await
                .is_ok()
            {
                continue;
            }
            tracing::warn!(pid = ?child.id(), "worker process still alive after grace period, terminating");
            terminate(&mut child);
            if tokio::time::timeout(FORCE_KILL_TIMEOUT, child.wait())
                .await
                .is_err()
            {
                tracing::error!(pid = ?child.id(), "worker process still alive after terminate, force-killing");
                child.kill().await.ok();
            }
        }

        if let Some(path) = self.pid_file.take() {
            std::fs::remove_file(path).ok();
        }
    }

    /// Number of currently tracked workers (threads plus processes).
    pub fn worker_count(&self) -> usize {
        self.threads.len() + self.processes.len()
    }

    /// Heartbeat and throughput snapshot for every thread-backed worker.
    /// Process-backed workers (`start_processes`) have no entry here: their
    /// `WorkerHealth` lives in a separate address space with no IPC channel
    /// back to the pool, so this always returns empty for process mode.
    pub fn health_status(&self) -> Vec<WorkerHealthStatus> {
        self.health.iter().map(|h| h.snapshot()).collect()
    }

    /// Block until `SIGINT` or (on unix) `SIGTERM` is received, then run
    /// [`Self::stop`]. A convenience wrapper for a long-running daemon
    /// process that otherwise has no reason to return.
    pub async fn run_until_signal(self) {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        self.stop().await;
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid is a live child process id owned by this Child handle;
        // SIGTERM is the documented graceful-stop signal.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    child.start_kill().ok();
}

fn write_pid_manifest(processes: &[Child]) -> io::Result<PathBuf> {
    let dir = dirs_home().join(".queuectl");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("workers.pid");
    let mut contents = format!("{}\n", std::process::id());
    for child in processes {
        if let Some(pid) = child.id() {
            contents.push_str(&pid.to_string());
            contents.push('\n');
        }
    }
    std::fs::write(&path, contents)?;
    Ok(path)
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_testing::{InMemoryStore, ScriptedExecutor};
    use std::sync::Arc;

    #[tokio::test]
    async fn thread_pool_stops_promptly_on_signal() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = Config::default();
        config.worker_poll_interval_secs = 30.0;
        let manager = QueueManager::new(store, config);
        let executor = Arc::new(ScriptedExecutor::new());

        let pool = WorkerPool::start(3, manager, executor);
        assert_eq!(pool.worker_count(), 3);

        tokio::time::timeout(Duration::from_secs(2), pool.stop())
            .await
            .expect("pool should stop within the grace window for idle workers");
    }

    #[tokio::test]
    async fn health_status_tracks_jobs_processed_per_worker() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = Config::default();
        config.worker_poll_interval_secs = 30.0;
        let manager = QueueManager::new(store, config);
        manager.enqueue("j1", "true", None, None, None).await.unwrap();
        let executor = Arc::new(ScriptedExecutor::new());

        let pool = WorkerPool::start(2, manager, executor);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = pool.health_status();
        assert_eq!(status.len(), 2);
        assert_eq!(status.iter().map(|s| s.jobs_processed).sum::<u64>(), 1);
        assert!(status.iter().all(|s| s.alive));

        pool.stop().await;
    }

    #[tokio::test]
    async fn pool_drains_pending_work_before_idle_workers_exit() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = Config::default();
        config.worker_poll_interval_secs = 30.0;
        let manager = QueueManager::new(store, config);
        manager.enqueue("j1", "true", None, None, None).await.unwrap();
        let executor = Arc::new(ScriptedExecutor::new());

        let pool = WorkerPool::start(2, manager.clone(), executor);
        // give the pool a moment to claim and complete the single job
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.stop().await;

        let job = manager.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.state, crate::model::JobState::Completed);
    }
}
