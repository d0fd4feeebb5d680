use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use bytes::Bytes;
use futures::FutureExt;
use metrics::counter;
use tokio::{
    runtime::Handle,
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinError,
};
use tracing::{debug, warn};

use crate::cache::RenderCache;
use crate::domain::{
    bitmap::Bitmap,
    error::JobError,
    types::{DocumentId, RenderKey},
};

use super::{
    gate::CompletionGate,
    jobs::JobPlan,
    runtime::DocumentRegistry,
    service::decode_image,
    types::{BitmapPostProcess, HttpFetcher, JobKind, MathRenderer, RenderJob, ResourceLocator},
};

pub const DEFAULT_REMOTE_CONCURRENCY: usize = 12;

const METRIC_JOB_TOTAL: &str = "mathmark_render_job_total";

/// Process-wide collaborators shared by every document's render batches.
#[derive(Clone)]
pub struct RenderServices {
    fetcher: Arc<dyn HttpFetcher>,
    math: Arc<dyn MathRenderer>,
    post_process: Option<Arc<dyn BitmapPostProcess>>,
    cache: Arc<RenderCache>,
    registry: DocumentRegistry,
    remote_gate: Arc<Semaphore>,
    math_gate: Option<Arc<Semaphore>>,
    runtime: Handle,
}

impl RenderServices {
    /// Services with the default remote-fetch bound and unbounded math
    /// rendering, spawning onto `runtime`.
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        math: Arc<dyn MathRenderer>,
        cache: Arc<RenderCache>,
        runtime: Handle,
    ) -> Self {
        Self {
            fetcher,
            math,
            post_process: None,
            cache,
            registry: DocumentRegistry::new(),
            remote_gate: Arc::new(Semaphore::new(DEFAULT_REMOTE_CONCURRENCY)),
            math_gate: None,
            runtime,
        }
    }

    pub fn with_remote_concurrency(mut self, permits: usize) -> Self {
        self.remote_gate = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    /// Bound concurrent math renders; `0` leaves them unbounded.
    pub fn with_math_concurrency(mut self, permits: usize) -> Self {
        self.math_gate = (permits > 0).then(|| Arc::new(Semaphore::new(permits)));
        self
    }

    pub fn with_post_process(mut self, hook: Arc<dyn BitmapPostProcess>) -> Self {
        self.post_process = Some(hook);
        self
    }

    pub fn cache(&self) -> &Arc<RenderCache> {
        &self.cache
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

/// Schedules one batch of jobs and returns without waiting for any of them.
///
/// Every job reports exactly once to the batch's gate, after its cache write
/// when it succeeded. A gated job keeps its slot until it has reported.
#[derive(Clone)]
pub struct RenderDispatcher {
    services: Arc<RenderServices>,
}

impl RenderDispatcher {
    pub fn new(services: Arc<RenderServices>) -> Self {
        Self { services }
    }

    pub fn dispatch(
        &self,
        document: DocumentId,
        plan: JobPlan,
        gate: Arc<CompletionGate>,
        locator: Arc<dyn ResourceLocator>,
    ) {
        debug!(
            target = "application::render::dispatch",
            op = "dispatch",
            document = %document,
            remote = plan.remote.len(),
            math = plan.math.len(),
            local = plan.local.len(),
            "Dispatching render batch"
        );

        for job in plan.into_jobs() {
            let services = Arc::clone(&self.services);
            let gate = Arc::clone(&gate);
            let locator = Arc::clone(&locator);
            self.services.runtime.spawn(async move {
                report(services, document, gate, locator, job).await;
            });
        }
    }
}

async fn report(
    services: Arc<RenderServices>,
    document: DocumentId,
    gate: Arc<CompletionGate>,
    locator: Arc<dyn ResourceLocator>,
    job: RenderJob,
) {
    let started_at = Instant::now();
    let kind = job.kind();
    let location = job.location().to_string();

    let (slot, outcome) = match acquire_slot(&services, kind).await {
        Ok(slot) => {
            let outcome = AssertUnwindSafe(run_job(&services, locator.as_ref(), job))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(JobError::render(format!(
                        "render job panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            (slot, outcome)
        }
        Err(err) => (None, Err(err)),
    };
    let key = RenderKey::new(document, location.clone());

    let error = match outcome {
        Ok(bitmap) => {
            if services.registry.is_registered(document) {
                services.cache.insert(key, bitmap);
            }
            debug!(
                target = "application::render::dispatch",
                op = kind.as_str(),
                result = "ok",
                document = %document,
                location = %location,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Render job finished"
            );
            None
        }
        Err(err) => {
            services.cache.remove(&key);
            warn!(
                target = "application::render::dispatch",
                op = kind.as_str(),
                result = "error",
                error_code = err.kind(),
                document = %document,
                location = %location,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "Render job failed"
            );
            Some(err)
        }
    };

    let result = error.as_ref().map_or("ok", JobError::kind);
    counter!(METRIC_JOB_TOTAL, "kind" => kind.as_str(), "result" => result).increment(1);
    gate.arrive(&location, error);
    drop(slot);
}

/// Wait for a concurrency slot when `kind` is gated.
async fn acquire_slot(
    services: &RenderServices,
    kind: JobKind,
) -> Result<Option<OwnedSemaphorePermit>, JobError> {
    match kind {
        JobKind::RemoteFetch => Arc::clone(&services.remote_gate)
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|_| JobError::transport("remote fetch gate closed")),
        JobKind::MathRender => match &services.math_gate {
            Some(gate) => Arc::clone(gate)
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| JobError::render("math render gate closed")),
            None => Ok(None),
        },
        JobKind::LocalLoad => Ok(None),
    }
}

async fn run_job(
    services: &RenderServices,
    locator: &dyn ResourceLocator,
    job: RenderJob,
) -> Result<Bitmap, JobError> {
    match job {
        RenderJob::RemoteFetch { url, .. } => {
            let response = services.fetcher.get(&url).await?;
            if !response.is_success() {
                return Err(JobError::http_status(response.status));
            }
            decode_blocking(response.body, services.cache.max_bytes()).await
        }
        RenderJob::MathRender { request, .. } => {
            let math = Arc::clone(&services.math);
            let post_process = services.post_process.clone();
            tokio::task::spawn_blocking(move || {
                let bitmap = math.render(&request)?;
                match post_process {
                    Some(hook) => hook.process(bitmap),
                    None => Ok(bitmap),
                }
            })
            .await
            .map_err(join_error)?
        }
        RenderJob::LocalLoad { name, .. } => {
            let bytes = locator
                .locate(&name)
                .await
                .ok_or_else(|| JobError::resource_not_found(&name))?;
            decode_blocking(bytes, services.cache.max_bytes()).await
        }
    }
}

async fn decode_blocking(bytes: Bytes, max_bytes: usize) -> Result<Bitmap, JobError> {
    tokio::task::spawn_blocking(move || decode_image(&bytes, max_bytes))
        .await
        .map_err(join_error)?
}

fn join_error(err: JoinError) -> JobError {
    if err.is_panic() {
        JobError::render(format!(
            "render task panicked: {}",
            panic_message(err.into_panic().as_ref())
        ))
    } else {
        JobError::render("render task cancelled")
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };
    use std::time::Duration;

    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use tokio::sync::oneshot;
    use url::Url;

    use super::*;
    use crate::application::render::{
        gate::BatchSummary,
        types::{HttpResponse, MathRequest},
    };
    use crate::domain::{
        entries::MathStyle,
        location::{LocationIndex, SourceRange},
    };

    struct NoFetch;

    #[async_trait]
    impl HttpFetcher for NoFetch {
        async fn get(&self, _url: &Url) -> Result<HttpResponse, JobError> {
            Err(JobError::transport("offline"))
        }
    }

    struct NoResources;

    #[async_trait]
    impl ResourceLocator for NoResources {
        async fn locate(&self, _name: &str) -> Option<Bytes> {
            None
        }
    }

    /// Renders a 1x1 pixel, panicking on `\panic` and tracking peak
    /// concurrency.
    #[derive(Default)]
    struct ProbeRenderer {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MathRenderer for ProbeRenderer {
        fn render(&self, request: &MathRequest) -> Result<Bitmap, JobError> {
            if request.latex == "\\panic" {
                panic!("renderer exploded");
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Bitmap::new(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]))))
        }
    }

    fn math_job(line: usize, latex: &str) -> RenderJob {
        RenderJob::MathRender {
            location: SourceRange::from_coords(line, 1, line, 5).key(),
            request: MathRequest {
                latex: latex.to_string(),
                style: MathStyle::Inline,
                font_size: 12.0,
                color: Default::default(),
            },
        }
    }

    async fn run_batch(
        services: Arc<RenderServices>,
        jobs: Vec<RenderJob>,
    ) -> (DocumentId, BatchSummary, crate::application::render::runtime::Registration) {
        let id = DocumentId::new();
        let mut index = LocationIndex::new();
        for job in &jobs {
            index.insert(job.location().parse().expect("range key"));
        }
        let registration = services.registry().register(id, index);

        let plan = JobPlan {
            math: jobs,
            ..Default::default()
        };
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let gate = Arc::new(CompletionGate::new(
            id,
            services.registry().clone(),
            plan.total(),
            move |summary| {
                if let Some(tx) = tx.lock().expect("sender lock").take() {
                    let _ = tx.send(summary);
                }
            },
        ));
        RenderDispatcher::new(Arc::clone(&services)).dispatch(id, plan, gate, Arc::new(NoResources));
        let summary = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("batch completes")
            .expect("summary sent");
        (id, summary, registration)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panicking_job_still_arrives_as_render_error() {
        let services = Arc::new(RenderServices::new(
            Arc::new(NoFetch),
            Arc::new(ProbeRenderer::default()),
            Arc::new(RenderCache::default()),
            Handle::current(),
        ));
        let (id, summary, _registration) =
            run_batch(Arc::clone(&services), vec![math_job(1, "x"), math_job(2, "\\panic")]).await;

        assert_eq!((summary.succeeded, summary.failed), (1, 1));
        let errors = services.registry().errors(id);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1.kind(), "render");
        assert!(errors[0].1.to_string().contains("renderer exploded"));
        assert!(services.cache().contains(&RenderKey::new(id, "1:1-1:5")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn math_concurrency_is_bounded_when_configured() {
        let renderer = Arc::new(ProbeRenderer::default());
        let services = Arc::new(
            RenderServices::new(
                Arc::new(NoFetch),
                renderer.clone(),
                Arc::new(RenderCache::default()),
                Handle::current(),
            )
            .with_math_concurrency(2),
        );
        let jobs = (1..=8).map(|line| math_job(line, "y")).collect();
        let (_, summary, _registration) = run_batch(services, jobs).await;

        assert_eq!(summary.succeeded, 8);
        assert!(renderer.peak.load(Ordering::SeqCst) <= 2);
    }
}
