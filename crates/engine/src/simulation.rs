use crate::error::EngineError;
use std::sync::Arc;
use tokio::sync::oneshot;

/// The dedicated rayon pool the backtests run on, kept off the tokio threads.
///
/// Parallel iterators inside a job use this pool too, so per-symbol fan-out and
/// grid search never spill onto the global rayon pool.
#[derive(Clone)]
pub struct SimulationPool {
    pool: Arc<rayon::ThreadPool>,
}

impl SimulationPool {
    /// `threads == 0` means one thread per CPU.
    pub fn new(threads: usize) -> Result<Self, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gauntlet-sim-{i}"))
            // Without a handler a panicking job aborts the process.
            .panic_handler(|_| tracing::error!("Simulation job panicked"))
            .build()
            .map_err(|e| EngineError::SimulationPool(e.to_string()))?;
        tracing::info!(threads = pool.current_num_threads(), "Simulation pool ready");
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Runs `job` on the pool and awaits its result without blocking the runtime.
    pub async fn run<F, T>(&self, job: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let _ = tx.send(job());
        });
        rx.await
            .map_err(|_| EngineError::SimulationPool("simulation job panicked before returning".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[tokio::test]
    async fn jobs_run_on_the_named_pool() {
        let pool = SimulationPool::new(2).unwrap();
        let (name, sum) = pool
            .run(|| {
                let name = std::thread::current().name().map(str::to_string);
                let sum: u64 = (1..=100u64).into_par_iter().sum();
                (name, sum)
            })
            .await
            .unwrap();
        assert!(name.unwrap().starts_with("gauntlet-sim-"));
        assert_eq!(sum, 5050);
    }

    #[tokio::test]
    async fn a_panicking_job_is_an_error() {
        let pool = SimulationPool::new(1).unwrap();
        let result: Result<(), _> = pool.run(|| panic!("boom")).await;
        assert!(matches!(result, Err(EngineError::SimulationPool(_))));
    }
}
