use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the mathmark binary.
#[derive(Debug, Parser)]
#[command(
    name = "mathmark",
    version,
    about = "Render the math and images of a markdown document"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MATHMARK_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the segment list and the reformatted text.
    Segments(DocumentArgs),
    /// Print the document outline.
    Toc(DocumentArgs),
    /// Render every math span and image, then report per-location status.
    Render(Box<RenderArgs>),
}

impl Command {
    pub fn document(&self) -> &DocumentArgs {
        match self {
            Command::Segments(args) | Command::Toc(args) => args,
            Command::Render(args) => &args.document,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct DocumentArgs {
    /// Markdown file to process.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Emit JSON instead of text.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub document: DocumentArgs,

    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Directory to write every rendered bitmap into as PNG.
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub output: Option<PathBuf>,

    /// Give up waiting for the batch after this many seconds.
    #[arg(long = "timeout-seconds", value_name = "SECONDS", default_value_t = 60)]
    pub timeout_seconds: u64,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the math font size in points.
    #[arg(long = "font-size", value_name = "POINTS")]
    pub font_size: Option<f32>,

    /// Override the math colour (#RRGGBB or #RRGGBBAA).
    #[arg(long = "text-color", value_name = "COLOR")]
    pub text_color: Option<String>,

    /// Override the maximum number of concurrent remote fetches.
    #[arg(long = "remote-concurrency", value_name = "COUNT")]
    pub remote_concurrency: Option<usize>,

    /// Override the maximum number of concurrent math renders (0 = unbounded).
    #[arg(long = "math-concurrency", value_name = "COUNT")]
    pub math_concurrency: Option<usize>,

    /// Override the LaTeX rasteriser executable.
    #[arg(long = "math-cli-path", value_name = "PATH")]
    pub math_cli_path: Option<PathBuf>,

    /// Override the directory used to cache rendered math.
    #[arg(long = "math-cache-dir", value_name = "PATH")]
    pub math_cache_dir: Option<PathBuf>,

    /// Override the directory local images are resolved against.
    #[arg(long = "resources-dir", value_name = "PATH")]
    pub resources_dir: Option<PathBuf>,
}
