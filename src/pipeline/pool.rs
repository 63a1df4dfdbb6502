use crate::db::FaceRepository;
use crate::error::TaskError;
use crate::models::{TaskKind, TaskOutcome};
use crate::pipeline::{face, metadata, thumb, Job, QueueDepths, QueueGauges, TaskContext, TaskSpec, WorkerModels};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// Builds the models for worker `n`. An error stops that worker only.
pub type ModelFactory = Arc<dyn Fn(usize) -> anyhow::Result<WorkerModels> + Send + Sync>;

type PendingKey = (String, TaskKind);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 2, queue_capacity: 4096 }
    }
}

struct Shared {
    pending: Mutex<HashSet<PendingKey>>,
    gauges: QueueGauges,
    running: AtomicUsize,
    failed: AtomicUsize,
    stop: AtomicBool,
}

impl Shared {
    fn release(&self, key: &PendingKey) {
        self.pending.lock().remove(key);
    }
}

/// Fixed set of worker threads draining one bounded queue.
///
/// At most one job per `(image, task)` is outstanding at a time. Each worker
/// builds and owns its own models.
pub struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    repo: Arc<dyn FaceRepository>,
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(config: PoolConfig, ctx: TaskContext, factory: ModelFactory) -> anyhow::Result<Self> {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashSet::new()),
            gauges: QueueGauges::default(),
            running: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
        });

        let repo = ctx.repo.clone();
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = rx.clone();
            let shared = shared.clone();
            let ctx = ctx.clone();
            let factory = factory.clone();
            let handle = std::thread::Builder::new()
                .name(format!("nazr-worker-{}", id))
                .spawn(move || worker_loop(id, rx, shared, ctx, factory))?;
            handles.push(handle);
        }
        info!("Started {} workers (queue capacity {})", workers, config.queue_capacity);

        Ok(Self { tx: Mutex::new(Some(tx)), rx, repo, shared, handles })
    }

    /// Reserves the job's key, records the task as pending and enqueues it
    /// without blocking. Returns `false` if the key is already outstanding,
    /// the queue is full, or the pool is stopping. A rejected job's task is
    /// recorded as an error.
    pub fn queue_job(&self, job: Job) -> bool {
        let key = job.key();
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            debug!("Pool stopped; dropping {} job for {}", key.1, key.0);
            return false;
        };

        if !self.shared.pending.lock().insert(key.clone()) {
            debug!("{} already pending for {}", key.1, key.0);
            return false;
        }

        if let Err(e) = self.repo.mark_task_pending(&key.0, key.1) {
            warn!("Failed to mark {} pending for {}: {:#}", key.1, key.0, e);
        }

        self.shared.gauges.queued.fetch_add(1, Ordering::Relaxed);
        let reason = match tx.try_send(job) {
            Ok(()) => return true,
            Err(TrySendError::Full(_)) => "job queue full",
            Err(TrySendError::Closed(_)) => "job queue closed",
        };
        self.shared.gauges.queued.fetch_sub(1, Ordering::Relaxed);
        self.shared.release(&key);
        warn!("Rejected {} for {}: {}", key.1, key.0, reason);
        if let Err(e) = self.repo.update_task_result(&key.0, key.1, &TaskOutcome::Failed(reason.to_string())) {
            warn!("Failed to record rejected {} for {}: {:#}", key.1, key.0, e);
        }
        false
    }

    pub fn is_pending(&self, image_key: &str, task: TaskKind) -> bool {
        self.shared.pending.lock().contains(&(image_key.to_string(), task))
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.gauges.queued.load(Ordering::Relaxed)
    }

    pub fn depths(&self) -> QueueDepths {
        self.shared.gauges.depths()
    }

    /// Workers that built their models and are taking jobs.
    pub fn running_workers(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Workers that exited because their models could not be built.
    pub fn failed_workers(&self) -> usize {
        self.shared.failed.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Tells workers to exit after their current job and closes the queue.
    /// Jobs still queued are dropped along with their reservations; their
    /// tasks stay `pending`. Only jobs already running remain pending here.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.tx.lock().take();

        let mut abandoned = 0;
        let mut rx = self.rx.lock();
        while let Ok(job) = rx.try_recv() {
            self.shared.gauges.queued.fetch_sub(1, Ordering::Relaxed);
            self.shared.release(&job.key());
            abandoned += 1;
        }
        if abandoned > 0 {
            info!("Worker pool stopping; {} queued jobs abandoned", abandoned);
        }
    }

    /// Stops the pool and waits for every worker thread.
    pub fn shutdown(&mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown();
        }
    }
}

fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    shared: Arc<Shared>,
    ctx: TaskContext,
    factory: ModelFactory,
) {
    let mut models = match factory(id) {
        Ok(models) => models,
        Err(e) => {
            error!("Worker {} failed to load its models and will not process jobs: {:#}", id, e);
            shared.failed.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    shared.running.fetch_add(1, Ordering::SeqCst);
    debug!("Worker {} ready", id);

    while !shared.stop.load(Ordering::SeqCst) {
        let job = rx.lock().blocking_recv();
        let Some(job) = job else { break };
        shared.gauges.queued.fetch_sub(1, Ordering::Relaxed);
        let key = job.key();
        if shared.stop.load(Ordering::SeqCst) {
            shared.release(&key);
            break;
        }
        process_job(&job, &mut models, &ctx, &shared.gauges);
        shared.release(&key);
    }

    shared.running.fetch_sub(1, Ordering::SeqCst);
    debug!("Worker {} exiting", id);
}

fn process_job(job: &Job, models: &mut WorkerModels, ctx: &TaskContext, gauges: &QueueGauges) {
    let kind = job.spec.kind();
    if let Err(e) = ctx.repo.mark_task_processing(&job.entity_key, kind) {
        warn!("Failed to mark {} processing for {}: {:#}", kind, job.entity_key, e);
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| run_task(job, models, ctx)));
    let outcome = match result {
        Ok(Ok(value)) => TaskOutcome::Done(value),
        Ok(Err(e)) => {
            warn!("{} failed for {}: {}", kind, job.entity_key, e);
            TaskOutcome::Failed(e.to_string())
        }
        Err(_) => {
            error!("{} task panicked for {}", kind, job.entity_key);
            TaskOutcome::Failed(TaskError::Panicked.to_string())
        }
    };

    match outcome {
        TaskOutcome::Done(_) => gauges.completed.fetch_add(1, Ordering::Relaxed),
        TaskOutcome::Failed(_) => gauges.failed.fetch_add(1, Ordering::Relaxed),
    };

    if let Err(e) = ctx.repo.update_task_result(&job.entity_key, kind, &outcome) {
        error!("Failed to store {} result for {}: {:#}", kind, job.entity_key, e);
    }
}

fn run_task(job: &Job, models: &mut WorkerModels, ctx: &TaskContext) -> Result<serde_json::Value, TaskError> {
    match job.spec {
        TaskSpec::Thumbnail { max_size } => {
            thumb::run_thumbnail(&job.image_path, &job.entity_key, max_size, ctx.assets.as_ref())
        }
        TaskSpec::Metadata => metadata::run_metadata(&job.image_path),
        TaskSpec::FaceDetection => face::run_detection(&job.image_path, &job.entity_key, models, ctx.repo.as_ref()),
    }
}
