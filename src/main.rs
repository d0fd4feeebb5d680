use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process,
    sync::Arc,
    time::Duration,
};

use mathmark::{
    application::{
        document::{Engine, MathDocument, Placement, PlacementKind, Resolution},
        error::AppError,
        markup::{reformat, segment},
        render::{
            BatchSummary, CliMathRenderer, MathRenderer, PngRoundTrip, RenderServices,
            UnavailableMathRenderer,
        },
    },
    cache::{CacheConfig, RenderCache},
    config::{self, Command, DocumentArgs, RenderArgs, Settings},
    domain::bitmap::Bitmap,
    infra::{http::ReqwestFetcher, resources::DirectoryLocator, telemetry},
};
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(i32::from(error.exit_code()));
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    let log = || {
        error!(
            source = report.source,
            chain = ?report.messages,
            error = %error,
            "application error"
        );
    };

    if dispatcher::has_been_set() {
        log();
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, log);
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Segments(args) => run_segments(&args).await,
        Command::Toc(args) => run_toc(&settings, &args).await,
        Command::Render(args) => run_render(&settings, &args).await,
    }
}

fn build_engine(settings: &Settings) -> Result<Engine, AppError> {
    let render = &settings.render;
    let fetcher = ReqwestFetcher::from_settings(render)?;

    let math: Arc<dyn MathRenderer> = match CliMathRenderer::new(
        render.math_cli_path.clone(),
        render.math_cache_dir.clone(),
        render.katex_validation,
    ) {
        Ok(renderer) => Arc::new(renderer.with_decode_limit(settings.cache.max_bytes.get())),
        Err(err) => {
            warn!(
                target = "mathmark::startup",
                error = %err,
                cache_dir = %render.math_cache_dir.display(),
                "Math renderer disabled"
            );
            Arc::new(UnavailableMathRenderer::new(err.to_string()))
        }
    };

    let cache = Arc::new(RenderCache::new(&CacheConfig::from(&settings.cache)));
    let mut services = RenderServices::new(Arc::new(fetcher), math, cache, Handle::current())
        .with_remote_concurrency(render.remote_concurrency.get())
        .with_math_concurrency(render.math_concurrency);
    if render.png_round_trip {
        services = services.with_post_process(Arc::new(PngRoundTrip));
    }

    Ok(Engine::new(services).with_math_defaults(render.font_size, render.text_color))
}

async fn read_document(path: &Path) -> Result<String, AppError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| AppError::input(path, err))
}

async fn load_document(
    settings: &Settings,
    args: &DocumentArgs,
) -> Result<(Engine, MathDocument), AppError> {
    let text = read_document(&args.file).await?;
    let engine = build_engine(settings)?;
    let document = engine.load(&text)?;
    Ok((engine, document))
}

#[derive(Debug, Serialize)]
struct SegmentView<'a> {
    kind: &'static str,
    start: usize,
    end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latex: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SegmentsOutput<'a> {
    segments: Vec<SegmentView<'a>>,
    reformatted: &'a str,
}

/// Lexical view only; the document is not parsed, so it works on inputs the
/// placeholder round trip would reject.
async fn run_segments(args: &DocumentArgs) -> Result<(), AppError> {
    let text = read_document(&args.file).await?;
    let segments = segment(&text);
    let reformatted = reformat(&text).text();

    let views: Vec<SegmentView<'_>> = segments
        .iter()
        .map(|segment| {
            let range = segment.range();
            SegmentView {
                kind: segment.kind(),
                start: range.start,
                end: range.end,
                style: segment.style().map(|style| style.as_str()),
                latex: segment.latex(),
            }
        })
        .collect();

    if args.json {
        return write_json(&SegmentsOutput {
            segments: views,
            reformatted: &reformatted,
        });
    }

    let mut lines = Vec::with_capacity(views.len() + 2);
    for view in &views {
        let mut line = format!("{:>6}..{:<6} {}", view.start, view.end, view.kind);
        if let Some(style) = view.style {
            line.push_str(&format!(" [{style}]"));
        }
        if let Some(latex) = view.latex {
            line.push_str(&format!(" {latex:?}"));
        }
        lines.push(line);
    }
    lines.push(String::new());
    lines.push(reformatted);
    write_lines(&lines)
}

async fn run_toc(settings: &Settings, args: &DocumentArgs) -> Result<(), AppError> {
    let (_engine, document) = load_document(settings, args).await?;

    if args.json {
        return write_json(&document.toc());
    }

    let lines: Vec<String> = document.toc().iter().map(|item| item.markdown()).collect();
    write_lines(&lines)
}

#[derive(Debug, Serialize)]
struct PlacementView {
    location: String,
    kind: &'static str,
    source: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct RenderOutput {
    phase: String,
    total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<BatchSummary>,
    placements: Vec<PlacementView>,
}

async fn run_render(settings: &Settings, args: &RenderArgs) -> Result<(), AppError> {
    let (_engine, document) = load_document(settings, &args.document).await?;

    let root = settings.resources.directory.clone().unwrap_or_else(|| {
        args.document
            .file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let locator = Arc::new(DirectoryLocator::new(root));

    let limit = Duration::from_secs(args.timeout_seconds.max(1));
    let mut handle = document.request_render(locator);
    let total = handle.total();
    let outcome = handle.wait_timeout(limit).await;

    let summary = match &outcome {
        Ok(summary) => {
            info!(
                target = "mathmark::render",
                document = %document.id(),
                total = summary.total,
                succeeded = summary.succeeded,
                failed = summary.failed,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "Render batch finished"
            );
            Some(*summary)
        }
        Err(err) => {
            warn!(
                target = "mathmark::render",
                document = %document.id(),
                total,
                error = %err,
                "Render batch unfinished; reporting partial results"
            );
            None
        }
    };

    if let Some(dir) = args.output.as_ref() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|err| AppError::output(format!("{}: {err}", dir.display())))?;
    }

    let mut views = Vec::new();
    for placement in document.render_now() {
        let file = match (&placement.resolution, args.output.as_ref()) {
            (Resolution::Rendered(bitmap), Some(dir)) => {
                Some(write_bitmap(dir, &placement, bitmap).await?)
            }
            _ => None,
        };
        views.push(placement_view(&placement, file));
    }

    if args.document.json {
        write_json(&RenderOutput {
            phase: document.phase().to_string(),
            total,
            summary,
            placements: views,
        })?;
    } else {
        let mut lines: Vec<String> = views
            .iter()
            .map(|view| {
                let mut line = format!(
                    "{:<16} {:<6} {:<9} {}",
                    view.location, view.kind, view.status, view.source
                );
                if let Some(error) = view.error.as_ref() {
                    line.push_str(&format!(" ({error})"));
                }
                if let Some(file) = view.file.as_ref() {
                    line.push_str(&format!(" -> {}", file.display()));
                }
                line
            })
            .collect();
        lines.push(format!("phase: {}", document.phase()));
        write_lines(&lines)?;
    }

    outcome.map(|_| ()).map_err(AppError::from)
}

fn placement_view(placement: &Placement, file: Option<PathBuf>) -> PlacementView {
    let kind = match placement.kind {
        PlacementKind::Math { .. } => "math",
        PlacementKind::Image { .. } => "image",
    };
    let mut view = PlacementView {
        location: placement.range.to_string(),
        kind,
        source: placement.kind.source_text(),
        status: placement.resolution.status(),
        width: None,
        height: None,
        error_kind: None,
        error: None,
        file,
    };
    match &placement.resolution {
        Resolution::Rendered(bitmap) => {
            view.width = Some(bitmap.width());
            view.height = Some(bitmap.height());
        }
        Resolution::Failed { error, .. } => {
            view.error_kind = Some(error.kind());
            view.error = Some(error.to_string());
        }
        Resolution::Pending => {}
    }
    view
}

async fn write_bitmap(
    dir: &Path,
    placement: &Placement,
    bitmap: &Bitmap,
) -> Result<PathBuf, AppError> {
    let name = format!("{}.png", placement.range.to_string().replace(':', "_"));
    let path = dir.join(name);
    let bytes = bitmap
        .encode_png()
        .map_err(|err| AppError::output(format!("failed to encode {}: {err}", path.display())))?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|err| AppError::output(format!("{}: {err}", path.display())))?;
    Ok(path)
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)
        .map_err(|err| AppError::output(err.to_string()))?;
    writeln!(stdout).map_err(|err| AppError::output(err.to_string()))
}

fn write_lines(lines: &[String]) -> Result<(), AppError> {
    let mut stdout = io::stdout().lock();
    for line in lines {
        writeln!(stdout, "{line}").map_err(|err| AppError::output(err.to_string()))?;
    }
    Ok(())
}
