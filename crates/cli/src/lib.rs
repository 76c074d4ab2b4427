use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use imgview_cache::{ThumbnailCacheConfig, ThumbnailGroup, ThumbnailStore};
use imgview_core::{DocumentFactory, DocumentUrl, FactoryConfig, FileItem, ThumbnailEvent, ThumbnailLoadJob};
use imgview_render::Orientation;
use imgview_scheduler::MainContext;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "imgview-cli")]
#[command(about = "Image viewer document tools")]
pub struct Cli {
    /// Log more (repeat for more detail). Logs go to stderr.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable image metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Produce a cached thumbnail.
    Thumbnail {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Requested size in pixels; selects the normal (128) or large (256) group.
        #[arg(long, default_value_t = 128)]
        size: u32,
        /// Thumbnail cache base directory.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Also write the thumbnail to this file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Rotate an image, losslessly for JPEG files.
    Rotate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = Direction::Right)]
        direction: Direction,
        /// Save to this file instead of overwriting the input.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Direction {
    Left,
    Right,
    Half,
}

impl Direction {
    fn orientation(self) -> Orientation {
        match self {
            Direction::Left => Orientation::Rotate270,
            Direction::Right => Orientation::Rotate90,
            Direction::Half => Orientation::Rotate180,
        }
    }
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    kind: &'static str,
    mime: Option<&'static str>,
    width: u32,
    height: u32,
    byte_size: Option<u64>,
    animated: bool,
    editable: bool,
    metadata: Vec<MetaOutput>,
}

#[derive(Debug, Serialize)]
struct MetaOutput {
    key: String,
    label: String,
    value: String,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Thumbnail {
            file,
            size,
            cache_dir,
            output,
        } => run_thumbnail(&file, size, cache_dir, output.as_deref()),
        Commands::Rotate {
            file,
            direction,
            output,
        } => run_rotate(&file, direction, output.as_deref()),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("logger already installed");
    }
}

fn run_info(file: &Path) -> Result<()> {
    ensure_file_exists(file)?;

    let factory = DocumentFactory::new(FactoryConfig::from_env()?)?;
    let url = DocumentUrl::from_path(file)?;
    let document = factory.load(&url);
    if !document.wait_until_loaded() {
        anyhow::bail!(
            "failed to load image: {}",
            document.error_string().unwrap_or_else(|| "timed out".to_string())
        );
    }

    let (width, height) = document.size().unwrap_or_default();
    let payload = InfoOutput {
        path: file.display().to_string(),
        kind: document.kind().map_or("unknown", |kind| kind.as_str()),
        mime: document.mime_type(),
        width,
        height,
        byte_size: document.byte_size(),
        animated: document.is_animated(),
        editable: document.is_editable(),
        metadata: document
            .meta_info()
            .into_iter()
            .map(|entry| MetaOutput {
                key: entry.key,
                label: entry.label,
                value: entry.value,
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    Ok(())
}

fn run_thumbnail(file: &Path, size: u32, cache_dir: Option<PathBuf>, output: Option<&Path>) -> Result<()> {
    ensure_file_exists(file)?;

    let config = match cache_dir {
        Some(dir) => ThumbnailCacheConfig::new(dir),
        None => ThumbnailCacheConfig::from_env()?,
    };
    let store = ThumbnailStore::new(config);
    let group = ThumbnailGroup::for_pixel_size(size);
    let url = DocumentUrl::from_path(file)?;

    let context = MainContext::new();
    let job = ThumbnailLoadJob::new([FileItem::new(url.clone())], group, store.clone(), context.clone());
    let (_, events) = job.events().subscribe_channel();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let _handle = job.start(move || flag.store(true, Ordering::SeqCst))?;

    if !context.process_until(|| finished.load(Ordering::SeqCst), THUMBNAIL_TIMEOUT) {
        anyhow::bail!("timed out generating thumbnail");
    }

    let image = first_thumbnail(&events).context("failed to generate thumbnail")?;

    let cached = store.path_for(group, url.key());
    let printed = match output {
        Some(output) => {
            if let Some(parent) = output.parent() {
                fs::create_dir_all(parent)?;
            }
            image
                .save(output)
                .with_context(|| format!("failed to write image to {}", output.display()))?;
            output.to_path_buf()
        }
        // Small images are not cached; their thumbnail is the file itself.
        None if cached.exists() => cached,
        None => file.to_path_buf(),
    };
    println!("{}", printed.display());

    Ok(())
}

fn first_thumbnail(events: &mpsc::Receiver<ThumbnailEvent>) -> Option<Arc<imgview_render::DynamicImage>> {
    events.try_iter().find_map(|event| match event {
        ThumbnailEvent::Loaded { image, .. } => Some(image),
        _ => None,
    })
}

fn run_rotate(file: &Path, direction: Direction, output: Option<&Path>) -> Result<()> {
    ensure_file_exists(file)?;

    let factory = DocumentFactory::new(FactoryConfig::from_env()?)?;
    let url = DocumentUrl::from_path(file)?;
    let document = factory.load(&url);
    if !document.wait_until_loaded() {
        anyhow::bail!(
            "failed to load image: {}",
            document.error_string().unwrap_or_else(|| "timed out".to_string())
        );
    }

    let editor = document
        .editor()
        .context("image cannot be edited (animated, vector or read-only format)")?;
    editor.apply_transformation(direction.orientation())?;

    let target = match output {
        Some(output) => DocumentUrl::from_path(output)?,
        None => url,
    };
    document
        .save(&target, None)
        .with_context(|| format!("failed to save {target}"))?;

    println!("{target}");

    Ok(())
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}
