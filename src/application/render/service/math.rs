use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::PathBuf,
    process::{Command, Stdio},
    time::Instant,
};

use katex::{OptsBuilder, OutputType};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::render::types::{MathRenderer, MathRequest};
use crate::domain::{bitmap::Bitmap, entries::MathStyle, error::JobError};

use super::decode::{DEFAULT_DECODE_LIMIT, decode_image};

#[derive(Debug, Error)]
pub enum MathRenderError {
    #[error("failed to prepare cache directory: {0}")]
    CacheInit(io::Error),
    #[error("failed to write temporary file: {0}")]
    Io(io::Error),
    #[error("LaTeX rejected by KaTeX: {0}")]
    Invalid(String),
    #[error("math CLI invocation failed (exit {exit_code:?}): {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("math CLI unavailable: {0}")]
    NotFound(io::Error),
    #[error("failed to read rendered output: {0}")]
    Read(io::Error),
    #[error("rendered output is not an image: {0}")]
    Decode(JobError),
}

impl From<MathRenderError> for JobError {
    fn from(err: MathRenderError) -> Self {
        match err {
            MathRenderError::Decode(inner) => JobError::render(inner.to_string()),
            other => JobError::render(other.to_string()),
        }
    }
}

/// Renders LaTeX by shelling out to an external rasteriser.
///
/// The command is invoked as
/// `CLI --input FILE --output FILE --font-size N --color #RRGGBB[AA] [--display]`
/// and may write PNG or SVG; the output is sniffed on decode. Results are
/// cached on disk by content hash.
#[derive(Debug, Clone)]
pub struct CliMathRenderer {
    cli_path: PathBuf,
    cache_dir: PathBuf,
    katex_validation: bool,
    decode_limit: usize,
}

impl CliMathRenderer {
    pub fn new(
        cli_path: PathBuf,
        cache_dir: PathBuf,
        katex_validation: bool,
    ) -> Result<Self, MathRenderError> {
        fs::create_dir_all(&cache_dir).map_err(MathRenderError::CacheInit)?;
        Ok(Self {
            cli_path,
            cache_dir,
            katex_validation,
            decode_limit: DEFAULT_DECODE_LIMIT,
        })
    }

    /// Cap on the decoded size of one rendered expression, in RGBA bytes.
    pub fn with_decode_limit(mut self, max_bytes: usize) -> Self {
        self.decode_limit = max_bytes;
        self
    }

    fn render_cached(&self, request: &MathRequest) -> Result<Bitmap, MathRenderError> {
        let started_at = Instant::now();
        if self.katex_validation {
            validate_latex(&request.latex, request.style)?;
        }

        let cache_path = self
            .cache_dir
            .join(format!("{}.img", hash_request(request)));
        match fs::read(&cache_path) {
            Ok(bytes) => match decode_image(&bytes, self.decode_limit) {
                Ok(bitmap) => {
                    info!(
                        target = "application::render::math",
                        op = "math::render",
                        result = "cache_hit",
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        cache_path = %cache_path.display(),
                        "Math served from disk cache"
                    );
                    return Ok(bitmap);
                }
                Err(err) => {
                    warn!(
                        target = "application::render::math",
                        op = "math::render",
                        result = "cache_corrupt",
                        cache_path = %cache_path.display(),
                        error = %err,
                        "Cached math output unreadable; re-rendering"
                    );
                    let _ = fs::remove_file(&cache_path);
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    target = "application::render::math",
                    op = "math::render",
                    result = "cache_read_error",
                    cache_path = %cache_path.display(),
                    error = %err,
                    "Failed to read cached math output; re-rendering"
                );
            }
        }

        let mut input_file = NamedTempFile::new().map_err(MathRenderError::Io)?;
        input_file
            .write_all(request.latex.as_bytes())
            .map_err(MathRenderError::Io)?;
        input_file.flush().map_err(MathRenderError::Io)?;

        let output_file = tempfile::Builder::new()
            .suffix(".img")
            .tempfile_in(&self.cache_dir)
            .map_err(MathRenderError::Io)?;
        let output_path = output_file.path().to_path_buf();

        let cli_started_at = Instant::now();
        let mut command = Command::new(&self.cli_path);
        command
            .arg("--input")
            .arg(input_file.path())
            .arg("--output")
            .arg(&output_path)
            .arg("--font-size")
            .arg(request.font_size.to_string())
            .arg("--color")
            .arg(request.color.to_string());
        if request.style == MathStyle::Display {
            command.arg("--display");
        }
        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                warn!(
                    target = "application::render::math",
                    op = "math::render",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn_cli",
                    error = %err,
                    "Failed to spawn math CLI"
                );
                if err.kind() == ErrorKind::NotFound {
                    MathRenderError::NotFound(err)
                } else {
                    MathRenderError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                target = "application::render::math",
                op = "math::render",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                cli_elapsed_ms = cli_started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "math_cli",
                stderr = %stderr,
                "Math CLI invocation failed"
            );
            return Err(MathRenderError::Cli { exit_code, stderr });
        }

        let bytes = fs::read(&output_path).map_err(MathRenderError::Read)?;
        let bitmap = decode_image(&bytes, self.decode_limit).map_err(MathRenderError::Decode)?;

        match output_file.persist(&cache_path) {
            Ok(_) => {}
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => {
                warn!(
                    target = "application::render::math",
                    op = "math::render",
                    result = "cache_write_error",
                    cache_path = %cache_path.display(),
                    error = %err.error,
                    "Failed to persist math output to disk cache"
                );
            }
        }

        info!(
            target = "application::render::math",
            op = "math::render",
            result = "cache_miss",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            cli_elapsed_ms = cli_started_at.elapsed().as_millis() as u64,
            width = bitmap.width(),
            height = bitmap.height(),
            "Math rendered via CLI"
        );

        Ok(bitmap)
    }
}

impl MathRenderer for CliMathRenderer {
    fn render(&self, request: &MathRequest) -> Result<Bitmap, JobError> {
        self.render_cached(request).map_err(JobError::from)
    }
}

/// Stand-in used when [`CliMathRenderer`] could not be set up; every math job
/// fails with the stored reason.
#[derive(Debug, Clone)]
pub struct UnavailableMathRenderer {
    reason: String,
}

impl UnavailableMathRenderer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl MathRenderer for UnavailableMathRenderer {
    fn render(&self, _request: &MathRequest) -> Result<Bitmap, JobError> {
        Err(JobError::render(format!(
            "math renderer disabled: {}",
            self.reason
        )))
    }
}

/// Check that KaTeX accepts the expression before paying for a CLI call.
pub(crate) fn validate_latex(latex: &str, style: MathStyle) -> Result<(), MathRenderError> {
    let mut builder = OptsBuilder::default();
    builder.display_mode(style == MathStyle::Display);
    builder.output_type(OutputType::Html);
    builder.throw_on_error(true);

    let opts = builder
        .build()
        .map_err(|err| MathRenderError::Invalid(format!("failed to build KaTeX options: {err}")))?;

    katex::render_with_opts(latex, opts)
        .map(|_| ())
        .map_err(|err| MathRenderError::Invalid(err.to_string()))
}

fn hash_request(request: &MathRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.latex.as_bytes());
    hasher.update([0]);
    hasher.update(request.style.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(request.font_size.to_bits().to_le_bytes());
    hasher.update(request.color.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
