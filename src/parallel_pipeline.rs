// THEORY:
// `ParallelPipeline` runs the work units of `VisionPipeline` on a pool of tokio
// workers. A single dispatcher hands units to the workers round-robin; each
// worker moves the CPU-bound unit onto the blocking thread pool and answers on
// the unit's own `oneshot` channel.
//
// Units share nothing but the read-only configuration, so the order in which
// they finish does not matter. The driver awaits the answers in plan order and is
// the only writer of the score report, which therefore comes out byte-identical
// to the sequential run.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::Configuration;
use crate::core_modules::eye::EyeRecord;
use crate::core_modules::iris_eye::IrisEye;
use crate::errors::{PipelineError, Result};
use crate::pipeline::{BatchSummary, ScoreReport, UnitOutcome, VisionPipeline, WorkUnit};

pub struct UnitTask {
    pub unit: WorkUnit,
    pub result_sender: oneshot::Sender<Result<UnitOutcome>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<UnitTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Must be called from within a tokio runtime.
    pub fn new<E>(pipeline: Arc<VisionPipeline<E>>, worker_count: usize) -> Self
    where
        E: EyeRecord + Default + 'static,
    {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<UnitTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<UnitTask>())
            .unzip();

        // Dispatcher: round-robin over the workers.
        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        let mut workers = Vec::with_capacity(worker_count);
        for mut worker_receiver in worker_receivers {
            let worker_pipeline = Arc::clone(&pipeline);
            let worker = tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let pipeline = Arc::clone(&worker_pipeline);
                    let unit = task.unit;
                    let outcome = tokio::task::spawn_blocking(move || pipeline.process_unit(&unit))
                        .await
                        .unwrap_or_else(|join_error| {
                            Err(PipelineError::Worker(join_error.to_string()))
                        });
                    let _ = task.result_sender.send(outcome);
                }
            });
            workers.push(worker);
        }

        Self {
            task_sender,
            workers,
        }
    }

    /// Queues a unit and returns the channel its outcome arrives on.
    pub fn submit(&self, unit: WorkUnit) -> Result<oneshot::Receiver<Result<UnitOutcome>>> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(UnitTask {
                unit,
                result_sender,
            })
            .map_err(|_| PipelineError::Worker("failed to send task to worker pool".into()))?;
        Ok(result_receiver)
    }

    /// Closes the queue and waits for every worker to drain it.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Batch driver running units concurrently.
pub struct ParallelPipeline<E = IrisEye> {
    pipeline: Arc<VisionPipeline<E>>,
    worker_count: usize,
}

impl<E: EyeRecord + Default + 'static> ParallelPipeline<E> {
    /// One worker per logical CPU.
    pub fn new(config: Arc<Configuration>) -> Self {
        Self {
            pipeline: Arc::new(VisionPipeline::new(config)),
            worker_count: num_cpus::get(),
        }
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub async fn run(&self) -> Result<BatchSummary> {
        let config = self.pipeline.config();
        let mut report = ScoreReport::create(config)?;
        let mut summary = BatchSummary::new(config.image_list().len());

        let pool = WorkerPool::new(Arc::clone(&self.pipeline), self.worker_count);
        let receivers = self
            .pipeline
            .plan()
            .into_iter()
            .map(|unit| pool.submit(unit))
            .collect::<Result<Vec<_>>>()?;

        // join_all keeps submission order.
        let outcomes = futures::future::join_all(receivers).await;
        pool.shutdown().await;

        for outcome in outcomes {
            let outcome = outcome.map_err(|_| {
                PipelineError::Worker("worker dropped a unit without answering".into())
            })??;
            summary.absorb_reported(outcome, report.as_mut());
        }
        summary.close_report(report);
        tracing::info!(
            "{} of {} images processed on {} workers, {} failures, {} scores",
            summary.processed,
            summary.images,
            self.worker_count,
            summary.failed(),
            summary.scores.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{FULL_CHAIN, Fixture, MockEye};
    use std::fs;

    fn fixture() -> Fixture {
        Fixture::new(&[
            ("e1.bmp", Some("ann-1")),
            ("e2.bmp", Some("ann-2")),
            ("e3.bmp", None),
            ("e4.bmp", Some("bob-1")),
            ("e5.bmp", Some("bob-2")),
            ("e6.bmp", Some("cy-1")),
            ("e7.bmp", Some("dee-1")),
        ])
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn parallel_run_writes_the_same_report_as_the_sequential_run() {
        let sequential = fixture();
        let summary = VisionPipeline::<MockEye>::new(sequential.config(FULL_CHAIN))
            .run()
            .unwrap();
        let expected = fs::read_to_string(sequential.path("scores.txt")).unwrap();

        let parallel = fixture();
        let parallel_summary = ParallelPipeline::<MockEye>::new(parallel.config(FULL_CHAIN))
            .with_workers(3)
            .run()
            .await
            .unwrap();
        let actual = fs::read_to_string(parallel.path("scores.txt")).unwrap();

        assert_eq!(actual, expected);
        assert_eq!(actual, "e1.bmp e2.bmp 0\ne5.bmp e6.bmp 0.5\n");
        assert_eq!(parallel_summary.processed, summary.processed);
        assert_eq!(parallel_summary.failed(), 1);
        assert_eq!(parallel_summary.scores, summary.scores);
    }

    #[tokio::test]
    async fn pool_answers_every_submitted_unit() {
        let fixture = fixture();
        let pipeline = Arc::new(VisionPipeline::<MockEye>::new(fixture.config(FULL_CHAIN)));
        let pool = WorkerPool::new(Arc::clone(&pipeline), 2);

        let receivers: Vec<_> = pipeline
            .plan()
            .into_iter()
            .map(|unit| pool.submit(unit).unwrap())
            .collect();
        assert_eq!(receivers.len(), 4);

        let mut processed = 0;
        for receiver in receivers {
            processed += receiver.await.unwrap().unwrap().processed;
        }
        pool.shutdown().await;
        assert_eq!(processed, 6);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn full_disk_under_the_report_keeps_the_batch() {
        let fixture = fixture();
        let report = FULL_CHAIN.replace("scores.txt", "/dev/full");
        let body = format!("{report}Save iris codes = out\n");
        let summary = ParallelPipeline::<MockEye>::new(fixture.config(&body))
            .with_workers(2)
            .run()
            .await
            .unwrap();
        assert_eq!(summary.processed, 6);
        assert_eq!(summary.scores.len(), 2);
        assert!(summary.failures.iter().any(|f| f.item == "/dev/full"));
        assert!(fixture.path("out/e7_code.bmp").exists());
    }

    #[tokio::test]
    async fn unwritable_report_fails_before_any_work() {
        let fixture = fixture();
        let config = fixture.config(&FULL_CHAIN.replace("scores.txt", "missing/scores.txt"));
        let err = ParallelPipeline::<MockEye>::new(config).run().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(!fixture.path("out/e1_code.bmp").exists());
    }
}
