use nazr_faces::db::{self, FaceRepository, SqliteFaceRepository};
use nazr_faces::face::FaceMatcher;
use nazr_faces::models::TaskKind;
use nazr_faces::pipeline::{Job, ModelFactory, TaskContext, TaskSpec, WorkerModels, WorkerPool};
use nazr_faces::storage::{AssetStore, FsAssetStore};
use nazr_faces::utils::config::Config;
use nazr_faces::utils::logging;
use nazr_faces::AppPaths;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const IDLE_POLL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();

    let images: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if images.is_empty() {
        anyhow::bail!("usage: nazr-faces <image>...");
    }

    let paths = AppPaths::from_config(&cfg);
    paths.ensure()?;
    let pool = db::create_pool(&paths.db_path, cfg.face_threads as u32 + 2)?;
    let repo: Arc<dyn FaceRepository> = Arc::new(SqliteFaceRepository::new(pool));
    let assets: Arc<dyn AssetStore> = Arc::new(FsAssetStore::new(&paths.derived));

    let model_cfg = cfg.model_config();
    let factory: ModelFactory = Arc::new(move |_worker: usize| -> anyhow::Result<WorkerModels> {
        Ok(WorkerModels::load(&model_cfg)?)
    });
    let ctx = TaskContext { repo: repo.clone(), assets };
    let mut workers = WorkerPool::start(cfg.pool_config(), ctx, factory)?;

    let mut queued = 0;
    for path in &images {
        for spec in [TaskSpec::Metadata, TaskSpec::Thumbnail { max_size: cfg.thumb_size }, TaskSpec::FaceDetection] {
            if workers.queue_job(Job::new(path.clone(), spec)) {
                queued += 1;
            }
        }
    }
    info!("Queued {} jobs for {} images", queued, images.len());

    let idle = async {
        loop {
            if workers.pending_count() == 0 {
                return true;
            }
            if workers.failed_workers() == workers.worker_count() {
                return false;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    };
    tokio::select! {
        finished = idle => {
            if finished {
                info!("All jobs finished");
            } else {
                warn!("No worker could load its models; abandoning queued jobs");
            }
        }
        _ = tokio::signal::ctrl_c() => warn!("Interrupted; abandoning queued jobs"),
    }
    tokio::task::spawn_blocking(move || workers.shutdown()).await?;

    let report_repo = repo.clone();
    tokio::task::spawn_blocking(move || report(report_repo.as_ref(), &images, FaceMatcher::new(repo))).await??;
    Ok(())
}

fn report(repo: &dyn FaceRepository, images: &[PathBuf], matcher: FaceMatcher) -> anyhow::Result<()> {
    for path in images {
        let key = path.to_string_lossy();
        for task in [TaskKind::Metadata, TaskKind::Thumbnail, TaskKind::FaceDetection] {
            match repo.task_status(&key, task)? {
                Some(rec) => match rec.error {
                    Some(err) => info!("{} {}: {} ({})", key, task, rec.status.as_str(), err),
                    None => info!("{} {}: {}", key, task, rec.status.as_str()),
                },
                None => info!("{} {}: not run", key, task),
            }
        }
        for face in repo.faces_for_image(&key)? {
            if face.is_tagged() {
                continue;
            }
            if let Some(s) = matcher.suggest_person_for_face(face.id)? {
                info!(
                    "{} face {} looks like person {} ({}) at {:.3}",
                    key,
                    face.id,
                    s.person_id,
                    s.person_name.as_deref().unwrap_or("unnamed"),
                    s.similarity
                );
            }
        }
    }
    Ok(())
}
