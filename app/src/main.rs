use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gallery_session::{
    CellState, Controller, GalleryConfig, GalleryError, Request, Response, Session,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gallery")]
#[command(about = "Browse, rate and resize a folder of images with cached thumbnails")]
struct Cli {
    /// JSON config file (missing keys use defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Keep the index and caches under this directory instead of ~/.gallery
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a folder, wait for its thumbnails and print the grid
    Open {
        folder: PathBuf,

        /// Order cells by rating instead of file name
        #[arg(long)]
        by_rating: bool,

        /// Grid width in cells
        #[arg(long, default_value = "4")]
        columns: usize,

        /// Pick up images added since the folder was first opened
        #[arg(long)]
        rescan: bool,
    },

    /// Rate one image (-1 to 3)
    Rate {
        folder: PathBuf,
        image: String,
        #[arg(allow_hyphen_values = true)]
        value: i64,
    },

    /// Back up and resize images in place, then refresh their thumbnails
    Resize {
        folder: PathBuf,

        /// Scale factor in percent, e.g. 50
        #[arg(short, long, allow_hyphen_values = true)]
        percent: String,

        #[arg(required = true)]
        images: Vec<String>,
    },

    /// List every folder in the index
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => GalleryConfig::load(path)?,
        None => GalleryConfig::default(),
    };
    if let Some(dir) = &cli.state_dir {
        let rooted = GalleryConfig::rooted_at(dir);
        config.index_path = rooted.index_path;
        config.cache_root = rooted.cache_root;
    }

    let mut controller = Controller::new(Session::new(config));

    match cli.command {
        Commands::Open {
            folder,
            by_rating,
            columns,
            rescan,
        } => {
            open(&mut controller, folder, rescan).await?;
            if by_rating {
                controller.handle(Request::Sort { by_rating: true })?;
                drive(&mut controller).await;
            }
            print_grid(&controller, columns);
        }
        Commands::Rate {
            folder,
            image,
            value,
        } => {
            open_quiet(&mut controller, folder)?;
            match controller.handle(Request::Rate { image, value })? {
                Response::Rated { image, rating } => println!("⭐ {image} rated {rating}"),
                other => tracing::debug!(?other, "unexpected response"),
            }
        }
        Commands::Resize {
            folder,
            percent,
            images,
        } => {
            open(&mut controller, folder, false).await?;
            match controller.handle(Request::Resize { images, percent }) {
                Ok(Response::ResizeStarted { images }) => {
                    println!("📐 Resizing {images} image(s)...");
                    drive(&mut controller).await;
                    println!("✅ Done");
                }
                Ok(other) => tracing::debug!(?other, "unexpected response"),
                Err(GalleryError::InvalidInput(msg)) => {
                    println!("❌ {msg}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::List => list(&mut controller)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_quiet(controller: &mut Controller, folder: PathBuf) -> Result<()> {
    controller
        .handle(Request::OpenFolder {
            path: folder.clone(),
        })
        .with_context(|| format!("Failed to open {}", folder.display()))?;
    // Thumbnailing is not needed for this command
    controller.cancel_all();
    Ok(())
}

async fn open(controller: &mut Controller, folder: PathBuf, rescan: bool) -> Result<()> {
    let response = controller
        .handle(Request::OpenFolder {
            path: folder.clone(),
        })
        .with_context(|| format!("Failed to open {}", folder.display()))?;
    if let Response::Opened { folder, id, images } = response {
        println!("📂 {} ({images} images, cache id {id})", folder.display());
    }
    if rescan {
        if let Response::Rescanned { images } = controller.handle(Request::Rescan)? {
            println!("🔄 Rescanned: {images} images");
        }
    }
    drive(controller).await;
    Ok(())
}

/// Tick on the configured interval until background work has drained,
/// or until Ctrl-C.
async fn drive(controller: &mut Controller) {
    let mut interval = tokio::time::interval(controller.session().config().tick_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c => {
                println!("⏹  Interrupted, cancelling background work");
                controller.cancel_all();
                return;
            }
        }

        let idle_before = controller.is_idle();
        if let Ok(Response::Ticked(report)) = controller.handle(Request::Tick) {
            for name in &report.ready {
                println!("  🖼  {name}");
            }
            if report.stale > 0 {
                tracing::debug!(stale = report.stale, "stale updates dropped");
            }
            // Runs were already done before this tick and it found nothing
            if idle_before && report.is_empty() {
                return;
            }
        }
    }
}

fn print_grid(controller: &Controller, columns: usize) {
    let Some(view) = controller.view() else {
        return;
    };

    println!("\n📈 GRID ({} of {} ready)", view.ready_count(), view.len());
    println!("==================");
    for row in view.grid(columns) {
        let cells: Vec<String> = row
            .into_iter()
            .map(|name| match name.and_then(|n| view.cell(n)) {
                Some(cell) => {
                    let marker = match cell.state {
                        CellState::Ready => "✅",
                        CellState::Loading => "⏳",
                    };
                    let stars = cell
                        .rating
                        .map(|r| format!(" [{r}]"))
                        .unwrap_or_default();
                    format!("{marker} {}{stars}", cell.name)
                }
                None => String::new(),
            })
            .collect();
        println!("  {}", cells.join("  |  "));
    }

    let broken = view.loading();
    if !broken.is_empty() {
        println!("\n⚠️  {} image(s) could not be thumbnailed:", broken.len());
        for name in broken {
            println!("    {name}");
        }
    }
}

fn list(controller: &mut Controller) -> Result<()> {
    let store = controller.session_mut().store_mut();
    let folders = store.folders().context("Failed to read the cache index")?;

    if folders.is_empty() {
        println!("No folders opened yet");
        return Ok(());
    }

    for record in folders {
        let rated = record
            .images
            .values()
            .filter(|img| img.rating.is_some())
            .count();
        println!("📂 {}", record.path.display());
        println!(
            "    id {}  |  {} images, {} rated  |  since {}",
            record.id,
            record.images.len(),
            rated,
            record.created_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}
