//! Document lifecycle: load once, render in batches, answer queries from the
//! shared cache and the per-document error table.

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::application::markup::{
    ComrakParser, DocumentParser, DocumentTree, Extraction, Extractor, Segment, TocItem, reformat,
    segment, table_of_contents,
};
use crate::application::render::{
    BatchSummary, CompletionGate, Registration, RenderDispatcher, RenderServices, ResourceLocator,
    plan_jobs,
};
use crate::cache::lock::mutex_lock;
use crate::domain::{
    bitmap::{Bitmap, Color},
    entries::{ImageReference, MathStyle},
    error::{DocumentError, JobError},
    location::SourceRange,
    types::{DocumentId, RenderKey},
};

const SOURCE: &str = "application::document";

pub const DEFAULT_FONT_SIZE: f32 = 16.0;

/// Loads documents against one parser and one set of shared render services.
#[derive(Clone)]
pub struct Engine {
    parser: Arc<dyn DocumentParser>,
    services: Arc<RenderServices>,
    font_size: f32,
    text_color: Color,
}

impl Engine {
    pub fn new(services: RenderServices) -> Self {
        Self {
            parser: Arc::new(ComrakParser::new()),
            services: Arc::new(services),
            font_size: DEFAULT_FONT_SIZE,
            text_color: Color::BLACK,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Font size and colour given to newly loaded documents.
    pub fn with_math_defaults(mut self, font_size: f32, text_color: Color) -> Self {
        self.font_size = font_size;
        self.text_color = text_color;
        self
    }

    pub fn services(&self) -> &Arc<RenderServices> {
        &self.services
    }

    /// Segment, parse and extract `text`. Fails only when the placeholder
    /// round trip through the parser was not lossless.
    pub fn load(&self, text: &str) -> Result<MathDocument, DocumentError> {
        let started_at = Instant::now();
        let reformatted = reformat(text);
        let reformatted_text = reformatted.text();
        let tree = self.parser.parse(&reformatted_text);

        let mut extractor = Extractor::new();
        extractor.visit(&tree);
        let extraction = extractor.convert(reformatted.placeholders).map_err(|err| {
            error!(
                target = "application::document",
                op = "load",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "Placeholder round trip failed"
            );
            DocumentError::from(err)
        })?;

        let id = DocumentId::new();
        let registration = self
            .services
            .registry()
            .register(id, extraction.index.clone());
        let toc = table_of_contents(&tree, &extraction.math);

        info!(
            target = "application::document",
            op = "load",
            result = "ok",
            document = %id,
            math = extraction.math.len(),
            images = extraction.images.len(),
            headings = toc.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Document loaded"
        );

        Ok(MathDocument {
            id,
            source: text.to_string(),
            reformatted: reformatted_text,
            tree,
            extraction,
            toc,
            services: Arc::clone(&self.services),
            font_size: self.font_size,
            text_color: self.text_color,
            batches: Arc::new(Mutex::new(BatchState::default())),
            _registration: registration,
        })
    }
}

/// Where a document is in its render lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extracted,
    RenderRequested,
    Completed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Extracted => "extracted",
            Phase::RenderRequested => "render_requested",
            Phase::Completed => "completed",
        })
    }
}

#[derive(Debug)]
struct BatchState {
    phase: Phase,
    generation: u64,
}

impl Default for BatchState {
    fn default() -> Self {
        Self {
            phase: Phase::Extracted,
            generation: 0,
        }
    }
}

/// Answer for one location at query time.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Rendered(Bitmap),
    /// Rendering was attempted and failed; `source` is the math or image
    /// source text for diagnostics.
    Failed { error: JobError, source: String },
    /// Not rendered yet.
    Pending,
}

impl Resolution {
    pub fn status(&self) -> &'static str {
        match self {
            Resolution::Rendered(_) => "rendered",
            Resolution::Failed { .. } => "failed",
            Resolution::Pending => "pending",
        }
    }
}

/// What sits at a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementKind {
    Math { latex: String, style: MathStyle },
    Image { reference: ImageReference },
}

impl PlacementKind {
    pub fn source_text(&self) -> String {
        match self {
            PlacementKind::Math { latex, .. } => latex.clone(),
            PlacementKind::Image { reference } => reference.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub range: SourceRange,
    pub kind: PlacementKind,
    pub resolution: Resolution,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchWaitError {
    #[error("render batch did not complete within {0:?}")]
    TimedOut(Duration),
    #[error("render batch was abandoned before completion")]
    Abandoned,
}

/// Completion signal for one render batch. Dropping or timing out the handle
/// never cancels the batch's jobs.
#[derive(Debug)]
pub struct BatchHandle {
    total: usize,
    receiver: oneshot::Receiver<BatchSummary>,
}

impl BatchHandle {
    pub fn total(&self) -> usize {
        self.total
    }

    pub async fn wait(self) -> Result<BatchSummary, BatchWaitError> {
        self.receiver.await.map_err(|_| BatchWaitError::Abandoned)
    }

    /// Wait up to `limit`. On timeout the handle stays usable.
    pub async fn wait_timeout(&mut self, limit: Duration) -> Result<BatchSummary, BatchWaitError> {
        match tokio::time::timeout(limit, &mut self.receiver).await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(_)) => Err(BatchWaitError::Abandoned),
            Err(_) => Err(BatchWaitError::TimedOut(limit)),
        }
    }
}

/// A loaded document. Dropping it unregisters it, after which results of its
/// still-running jobs are discarded.
pub struct MathDocument {
    id: DocumentId,
    source: String,
    reformatted: String,
    tree: DocumentTree,
    extraction: Extraction,
    toc: Vec<TocItem>,
    services: Arc<RenderServices>,
    font_size: f32,
    text_color: Color,
    batches: Arc<Mutex<BatchState>>,
    _registration: Registration,
}

impl MathDocument {
    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Text handed to the parser, with math replaced by placeholders.
    pub fn reformatted_text(&self) -> &str {
        &self.reformatted
    }

    pub fn segments(&self) -> Vec<Segment<'_>> {
        segment(&self.source)
    }

    pub fn tree(&self) -> &DocumentTree {
        &self.tree
    }

    pub fn extraction(&self) -> &Extraction {
        &self.extraction
    }

    pub fn toc(&self) -> &[TocItem] {
        &self.toc
    }

    pub fn phase(&self) -> Phase {
        mutex_lock(&self.batches, SOURCE, "phase").phase
    }

    pub fn font_size(&self) -> f32 {
        self.font_size
    }

    /// Applies to the next batch.
    pub fn set_font_size(&mut self, font_size: f32) {
        self.font_size = font_size;
    }

    pub fn text_color(&self) -> Color {
        self.text_color
    }

    /// Applies to the next batch.
    pub fn set_text_color(&mut self, color: Color) {
        self.text_color = color;
    }

    /// Schedule every math and image location for rendering and return at
    /// once. Requesting again before completion re-renders the same
    /// locations; only the latest batch moves the phase to `Completed`.
    pub fn request_render(&self, locator: Arc<dyn ResourceLocator>) -> BatchHandle {
        let plan = plan_jobs(&self.extraction, self.font_size, self.text_color);
        let total = plan.total();
        let generation = {
            let mut state = mutex_lock(&self.batches, SOURCE, "request_render");
            state.generation += 1;
            state.phase = Phase::RenderRequested;
            state.generation
        };

        let (sender, receiver) = oneshot::channel();
        let batches = Arc::clone(&self.batches);
        let gate = Arc::new(CompletionGate::new(
            self.id,
            self.services.registry().clone(),
            total,
            move |summary| {
                {
                    let mut state = mutex_lock(&batches, SOURCE, "complete");
                    if state.generation == generation {
                        state.phase = Phase::Completed;
                    }
                }
                let _ = sender.send(summary);
            },
        ));

        if total > 0 {
            RenderDispatcher::new(Arc::clone(&self.services)).dispatch(self.id, plan, gate, locator);
        }
        BatchHandle { total, receiver }
    }

    /// Current answer for `range`: a recorded failure first, then a cached
    /// bitmap, otherwise pending.
    pub fn resolve(&self, range: &SourceRange) -> Resolution {
        if let Some(error) = self.services.registry().error(self.id, range) {
            return Resolution::Failed {
                error,
                source: self.source_text(range).unwrap_or_default(),
            };
        }
        let key = RenderKey::new(self.id, range.key());
        match self.services.cache().get(&key) {
            Some(bitmap) => Resolution::Rendered(bitmap),
            None => Resolution::Pending,
        }
    }

    /// One placement per math and image location, in document order.
    pub fn render_now(&self) -> Vec<Placement> {
        let mut placements: Vec<Placement> = self
            .extraction
            .math
            .values()
            .map(|entry| Placement {
                range: entry.range,
                kind: PlacementKind::Math {
                    latex: entry.latex.clone(),
                    style: entry.style,
                },
                resolution: self.resolve(&entry.range),
            })
            .chain(self.extraction.images.values().map(|entry| Placement {
                range: entry.range,
                kind: PlacementKind::Image {
                    reference: entry.reference.clone(),
                },
                resolution: self.resolve(&entry.range),
            }))
            .collect();
        placements.sort_by_key(|placement| placement.range);
        placements
    }

    /// Recorded failures in document order.
    pub fn errors(&self) -> Vec<(SourceRange, JobError)> {
        self.services.registry().errors(self.id)
    }

    fn source_text(&self, range: &SourceRange) -> Option<String> {
        if let Some(entry) = self.extraction.math.get(range) {
            return Some(entry.latex.clone());
        }
        self.extraction
            .images
            .get(range)
            .map(|entry| entry.reference.to_string())
    }
}

impl fmt::Debug for MathDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MathDocument")
            .field("id", &self.id)
            .field("math", &self.extraction.math.len())
            .field("images", &self.extraction.images.len())
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::{Rgba, RgbaImage};
    use tokio::runtime::Handle;
    use url::Url;

    use super::*;
    use crate::application::render::{HttpFetcher, HttpResponse, MathRenderer, MathRequest};
    use crate::cache::RenderCache;

    struct Offline;

    #[async_trait]
    impl HttpFetcher for Offline {
        async fn get(&self, _url: &Url) -> Result<HttpResponse, JobError> {
            Err(JobError::transport("offline"))
        }
    }

    struct Dot;

    impl MathRenderer for Dot {
        fn render(&self, _request: &MathRequest) -> Result<Bitmap, JobError> {
            Ok(Bitmap::new(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]))))
        }
    }

    struct Empty;

    #[async_trait]
    impl ResourceLocator for Empty {
        async fn locate(&self, _name: &str) -> Option<Bytes> {
            None
        }
    }

    fn engine() -> Engine {
        Engine::new(RenderServices::new(
            Arc::new(Offline),
            Arc::new(Dot),
            Arc::new(RenderCache::default()),
            Handle::current(),
        ))
    }

    #[tokio::test]
    async fn document_without_entries_completes_immediately() {
        let document = engine().load("# Title\n\nNo math here.").expect("load");
        assert_eq!(document.phase(), Phase::Extracted);
        let handle = document.request_render(Arc::new(Empty));
        let summary = handle.wait().await.expect("completes");
        assert_eq!(summary.total, 0);
        assert_eq!(document.phase(), Phase::Completed);
        assert!(document.render_now().is_empty());
    }

    #[tokio::test]
    async fn phases_follow_batch_lifecycle() {
        let mut document = engine().load("Inline $a+b$ and ![x](missing.png)").expect("load");
        document.set_font_size(20.0);
        document.set_text_color(Color::WHITE);

        let placements = document.render_now();
        assert_eq!(placements.len(), 2);
        assert!(placements.iter().all(|p| p.resolution == Resolution::Pending));

        let handle = document.request_render(Arc::new(Empty));
        let summary = handle.wait().await.expect("completes");
        assert_eq!((summary.succeeded, summary.failed), (1, 1));
        assert_eq!(document.phase(), Phase::Completed);

        let placements = document.render_now();
        assert_eq!(placements[0].resolution.status(), "rendered");
        match &placements[1].resolution {
            Resolution::Failed { error, source } => {
                assert_eq!(error.kind(), "resource_not_found");
                assert_eq!(source, "missing.png");
            }
            other => panic!("unexpected resolution {other:?}"),
        }
    }

    #[tokio::test]
    async fn accessors_expose_each_pipeline_stage() {
        let text = "# T\n\nSee $x$ and ![p](p.png).";
        let document = engine()
            .with_math_defaults(20.0, Color::WHITE)
            .load(text)
            .expect("load");

        assert_eq!(document.source(), text);
        assert_eq!(document.segments().len(), 3);
        assert!(!document.reformatted_text().contains('$'));
        assert!(!document.tree().root.children.is_empty());
        assert_eq!(document.extraction().math.len(), 1);
        assert_eq!(document.extraction().images.len(), 1);
        assert_eq!(document.font_size(), 20.0);
        assert_eq!(document.text_color(), Color::WHITE);
    }

    #[tokio::test]
    async fn dropping_a_document_unregisters_it() {
        let engine = engine();
        let document = engine.load("$x$").expect("load");
        let id = document.id();
        assert!(engine.services().registry().is_registered(id));
        drop(document);
        assert!(!engine.services().registry().is_registered(id));
    }
}
