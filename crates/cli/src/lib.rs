use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use docview_cache::{PageInfoCache, PageSize};
use docview_core::{ActionArgs, ActionId, DecodeMode, DocumentView, ViewStats, ViewerConfig};
use docview_render::{CodecContext, RgbaSurface, SyntheticContext, SyntheticSpec};
use docview_scheduler::DrawLoop;
use parking_lot::Mutex;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Path under which the generated document is registered
const SYNTHETIC_PATH: &str = "synthetic.pdf";

#[derive(Debug, Parser)]
#[command(name = "docview-cli")]
#[command(about = "Tiled page decode-and-cache pipeline driver")]
pub struct Cli {
    /// Log pipeline activity to stderr (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a viewport of a document to PNG and print pipeline statistics.
    Render(RenderArgs),
    /// Print the cached page sizes of a document.
    PageInfo {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON.
    Config {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// Document to open; a generated document is used when omitted
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Pages of the generated document
    #[arg(long, default_value_t = 3)]
    pages: usize,
    #[arg(long, default_value_t = 600)]
    page_width: u32,
    #[arg(long, default_value_t = 800)]
    page_height: u32,
    /// Blank margin of generated pages as a fraction of the page
    #[arg(long, default_value_t = 0.0)]
    margin: f32,
    /// Protect the generated document with this password
    #[arg(long, value_name = "PASSWORD")]
    protect: Option<String>,
    #[arg(long, value_name = "PASSWORD")]
    password: Option<String>,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 600)]
    width: u32,
    /// Viewport height in pixels
    #[arg(long, default_value_t = 800)]
    height: u32,
    #[arg(long, default_value_t = 1.0)]
    zoom: f32,
    /// 1-based page to scroll to
    #[arg(long)]
    page: Option<usize>,
    /// Extra vertical scroll after positioning, in pixels
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    scroll: f32,
    /// Action to run after positioning; may be repeated
    #[arg(long = "action", value_name = "ACTION")]
    actions: Vec<ActionId>,

    #[arg(long)]
    night: bool,
    #[arg(long)]
    crop: bool,
    #[arg(long)]
    split: bool,
    #[arg(long, value_name = "MODE")]
    decode_mode: Option<DecodeMode>,
    #[arg(long, value_name = "N")]
    pages_in_memory: Option<usize>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Page-size cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
    /// Do not read or write the page-size cache
    #[arg(long, conflicts_with = "cache_dir")]
    no_page_cache: bool,

    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
    /// Give up waiting for decodes after this many milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct RenderOutput {
    pages: usize,
    current_page: usize,
    zoom: f32,
    viewport: [f32; 4],
    idle: bool,
    tiles_drawn: usize,
    frames: u64,
    output: Option<String>,
    view: ViewStats,
    pool: PoolOutput,
    executor: ExecutorOutput,
}

#[derive(Debug, Serialize)]
struct PoolOutput {
    allocated: u64,
    reused: u64,
    released: u64,
    outstanding: usize,
    free_buffers: usize,
    bytes_outstanding: usize,
    hit_rate: f64,
}

#[derive(Debug, Serialize)]
struct ExecutorOutput {
    submitted: u64,
    coalesced: u64,
    cancelled: u64,
    completed: u64,
    skipped: u64,
}

#[derive(Debug, Serialize)]
struct PageInfoOutput {
    path: String,
    cache_file: String,
    pages: Vec<Option<PageSizeOutput>>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: u32,
    height: u32,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    match cli.command {
        Commands::Render(args) => run_render(args),
        Commands::PageInfo { file, cache_dir } => run_page_info(&file, cache_dir),
        Commands::Config { config } => run_config(config.as_deref()),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // A subscriber may already be installed when run() is called twice
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(file: Option<&Path>) -> Result<ViewerConfig> {
    let config = match file {
        Some(path) => ViewerConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => ViewerConfig::from_env().context("invalid DOCVIEW_* environment")?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn render_config(args: &RenderArgs) -> Result<ViewerConfig> {
    let mut config = load_config(args.config.as_deref())?;
    if args.night {
        config.night_mode = true;
    }
    if args.crop {
        config.crop_pages = true;
    }
    if args.split {
        config.split_pages = true;
    }
    if let Some(mode) = args.decode_mode {
        config.decode_mode = mode;
    }
    if let Some(pages) = args.pages_in_memory {
        config.pages_in_memory = pages;
    }
    if args.no_page_cache {
        config.page_cache_dir = None;
    } else if let Some(dir) = &args.cache_dir {
        config.page_cache_dir = Some(dir.clone());
    }
    Ok(config)
}

fn open_context(args: &RenderArgs) -> Result<(Box<dyn CodecContext>, PathBuf)> {
    match &args.file {
        Some(file) => {
            if !file.is_file() {
                bail!("file does not exist: {}", file.display());
            }
            Ok((document_context()?, file.clone()))
        }
        None => {
            if args.pages == 0 {
                bail!("--pages must be at least 1");
            }
            let size = PageSize::new(args.page_width.max(1), args.page_height.max(1));
            let mut spec = SyntheticSpec::uniform(args.pages, size).with_margin(args.margin);
            if let Some(password) = &args.protect {
                spec = spec.protected(password.clone());
            }
            let context = SyntheticContext::new().with_document(SYNTHETIC_PATH, spec);
            Ok((Box::new(context), PathBuf::from(SYNTHETIC_PATH)))
        }
    }
}

#[cfg(feature = "pdfium")]
fn document_context() -> Result<Box<dyn CodecContext>> {
    let context = docview_render::PdfiumContext::new().context("failed to load PDFium")?;
    Ok(Box::new(context))
}

#[cfg(not(feature = "pdfium"))]
fn document_context() -> Result<Box<dyn CodecContext>> {
    bail!("opening document files requires the `pdfium` feature")
}

fn run_render(args: RenderArgs) -> Result<()> {
    let config = render_config(&args)?;
    let (context, path) = open_context(&args)?;

    let view = match DocumentView::open(context.as_ref(), &path, args.password.as_deref(), config) {
        Ok(view) => view,
        Err(e) if e.is_password_required() => {
            bail!("document is password protected; pass --password")
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to open {}", path.display()));
        }
    };
    let view = Arc::new(Mutex::new(view));

    let (width, height) = (args.width.max(1), args.height.max(1));
    let last_frame_tiles = Arc::new(AtomicUsize::new(0));
    let draw_loop = {
        let view = Arc::clone(&view);
        let tiles = Arc::clone(&last_frame_tiles);
        DrawLoop::spawn(move |()| {
            let mut surface = RgbaSurface::new(width, height);
            let drawn = view.lock().draw(&mut surface);
            tiles.store(drawn, Ordering::Relaxed);
        })
        .context("failed to start draw thread")?
    };
    let requester = draw_loop.requester();

    let timeout = Duration::from_millis(args.timeout_ms);
    let idle = {
        let mut view = view.lock();
        view.set_redraw_sink(move |_| {
            requester.request(());
        });
        view.set_viewport(width as f32, height as f32);
        if args.zoom != 1.0 {
            view.set_zoom(args.zoom, true);
        }
        if let Some(page) = args.page {
            let index = page.checked_sub(1).context("--page is 1-based and must be >= 1")?;
            view.go_to_page(index)?;
        }
        if args.scroll != 0.0 {
            view.scroll_by(0.0, args.scroll);
        }
        for action in &args.actions {
            if !view.dispatch(*action, &ActionArgs::default()) {
                bail!("action {action} could not be performed");
            }
        }
        view.wait_idle(timeout)
    };
    let frames = draw_loop.finish();
    debug!(frames, "progressive frames drawn");

    let mut view = view.lock();
    let mut surface = RgbaSurface::new(width, height);
    let tiles_drawn = view.draw(&mut surface);
    debug!(
        preview_tiles = last_frame_tiles.load(Ordering::Relaxed),
        tiles_drawn, "final frame composed"
    );

    let output = match &args.output {
        Some(output) => {
            write_png(surface, output)?;
            info!(path = %output.display(), "frame written");
            Some(output.display().to_string())
        }
        None => None,
    };

    let viewport = view.viewport();
    let pool = view.pool_stats();
    let executor = view.executor_stats();
    let payload = RenderOutput {
        pages: view.page_count(),
        current_page: view.current_page() + 1,
        zoom: view.zoom(),
        viewport: [viewport.left, viewport.top, viewport.right, viewport.bottom],
        idle,
        tiles_drawn,
        frames,
        output,
        view: view.stats(),
        pool: PoolOutput {
            allocated: pool.allocated,
            reused: pool.reused,
            released: pool.released,
            outstanding: pool.outstanding,
            free_buffers: pool.free_buffers,
            bytes_outstanding: pool.bytes_outstanding,
            hit_rate: pool.hit_rate(),
        },
        executor: ExecutorOutput {
            submitted: executor.submitted,
            coalesced: executor.coalesced,
            cancelled: executor.cancelled,
            completed: executor.completed,
            skipped: executor.skipped,
        },
    };
    view.recycle();

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    if !idle {
        bail!("decoding did not finish within {} ms", args.timeout_ms);
    }
    Ok(())
}

fn write_png(surface: RgbaSurface, output: &Path) -> Result<()> {
    let (width, height) = (surface.width(), surface.height());
    let pixels = surface.into_bitmap().into_pixels();
    let image = image::RgbaImage::from_raw(width, height, pixels)
        .context("surface size does not match its pixel buffer")?;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    image
        .save(output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;
    Ok(())
}

fn run_page_info(file: &Path, cache_dir: Option<PathBuf>) -> Result<()> {
    let dir = cache_dir.unwrap_or_else(ViewerConfig::default_page_cache_dir);
    let cache = PageInfoCache::new(&dir);
    let cache_file = cache.cache_file(file);

    let Some(sizes) = cache.load(file) else {
        bail!("no cached page sizes for {}", file.display());
    };

    let payload = PageInfoOutput {
        path: file.display().to_string(),
        cache_file: cache_file.display().to_string(),
        pages: sizes
            .into_iter()
            .map(|size| {
                size.map(|s| PageSizeOutput {
                    width: s.width,
                    height: s.height,
                })
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_config(file: Option<&Path>) -> Result<()> {
    let config = load_config(file)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
