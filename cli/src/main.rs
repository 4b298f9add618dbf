//! mosaic CLI: stitch tile grids, cut test grids, serve stitch requests.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mosaic_core::init_global_thread_pool;
use mosaic_features::DetectorKind;
use mosaic_photo::{
    split_into_tiles, write_tiles, Adjacency, BlendMode, DuplicatePolicy, MatchStrategy,
    StitchConfig, StitchRequest, Stitcher,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mosaic")]
#[command(about = "Stitch a grid of overlapping tiles (tile_<row>_<col>.<ext>) into one image")]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stitch a tile directory into one image.
    Stitch(StitchArgs),

    /// Cut an image into an overlapping tile grid.
    Tear(TearArgs),

    /// Run a JSON stitch request ({"tile_dir", "output_dir"?}) and print the JSON response.
    Request {
        /// Path to the request JSON.
        #[arg(long)]
        request: PathBuf,

        /// Optional JSON config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct StitchArgs {
    /// Directory holding tile_<row>_<col>.{jpg,jpeg,png}.
    #[arg(long)]
    tiles: PathBuf,

    /// Output image path.
    #[arg(long)]
    out: PathBuf,

    /// JSON config file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overlap margin / edge-band width in pixels.
    #[arg(long)]
    overlap: Option<u32>,

    #[arg(long)]
    min_full_inliers: Option<usize>,

    #[arg(long)]
    min_edge_inliers: Option<usize>,

    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    #[arg(long, value_enum)]
    blend: Option<BlendArg>,

    #[arg(long, value_enum)]
    detector: Option<DetectorArg>,

    /// Keypoint cap per crop.
    #[arg(long)]
    max_features: Option<usize>,

    /// Also consider diagonal neighbours.
    #[arg(long)]
    diagonals: bool,

    #[arg(long, value_enum)]
    on_duplicate: Option<DuplicateArg>,

    /// Apply pairwise gamma correction before compositing.
    #[arg(long)]
    seam_correction: bool,

    /// Skip the parallel feature pre-pass.
    #[arg(long)]
    no_precompute: bool,

    /// Also write a grayscale copy of the output.
    #[arg(long)]
    grayscale: bool,

    /// Directory for blend masks, weight map, keypoints and placements.json.
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Worker threads (default: MOSAIC_CPU_THREADS or all cores).
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct TearArgs {
    /// Source image.
    #[arg(long)]
    image: PathBuf,

    /// Output tile directory.
    #[arg(long)]
    out: PathBuf,

    #[arg(long, default_value = "4")]
    rows: u32,

    #[arg(long, default_value = "6")]
    cols: u32,

    #[arg(long, default_value = "100")]
    overlap: u32,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    EdgeThenFull,
    EdgeOnly,
    FullOnly,
    Nominal,
}

impl From<StrategyArg> for MatchStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::EdgeThenFull => MatchStrategy::EdgeThenFull,
            StrategyArg::EdgeOnly => MatchStrategy::EdgeOnly,
            StrategyArg::FullOnly => MatchStrategy::FullOnly,
            StrategyArg::Nominal => MatchStrategy::Nominal,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BlendArg {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DetectorArg {
    Orb,
    Harris,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DuplicateArg {
    KeepFirst,
    KeepLast,
    Error,
}

impl StitchArgs {
    fn to_config(&self) -> Result<StitchConfig> {
        let mut cfg = load_config(self.config.as_ref())?;
        if let Some(v) = self.overlap {
            cfg.overlap_px = v;
        }
        if let Some(v) = self.min_full_inliers {
            cfg.min_full_inliers = v;
        }
        if let Some(v) = self.min_edge_inliers {
            cfg.min_edge_inliers = v;
        }
        if let Some(v) = self.strategy {
            cfg.match_strategy = v.into();
        }
        if let Some(v) = self.blend {
            cfg.blend = match v {
                BlendArg::Hard => BlendMode::Hard,
                BlendArg::Soft => BlendMode::Soft,
            };
        }
        if let Some(v) = self.detector {
            cfg.detector.kind = match v {
                DetectorArg::Orb => DetectorKind::Orb,
                DetectorArg::Harris => DetectorKind::Harris,
            };
        }
        if let Some(v) = self.max_features {
            cfg.detector.max_features = v;
        }
        if self.diagonals {
            cfg.adjacency = Adjacency::Eight;
        }
        if let Some(v) = self.on_duplicate {
            cfg.on_duplicate = match v {
                DuplicateArg::KeepFirst => DuplicatePolicy::KeepFirst,
                DuplicateArg::KeepLast => DuplicatePolicy::KeepLast,
                DuplicateArg::Error => DuplicatePolicy::Error,
            };
        }
        if self.seam_correction {
            cfg.seam_correction = true;
        }
        if self.no_precompute {
            cfg.precompute_features = false;
        }
        if self.grayscale {
            cfg.save_grayscale = true;
        }
        if self.debug_dir.is_some() {
            cfg.debug_dir = self.debug_dir.clone();
        }
        if self.threads.is_some() {
            cfg.threads = self.threads;
        }
        cfg.validate().context("invalid stitch configuration")?;
        Ok(cfg)
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<StitchConfig> {
    match path {
        Some(p) => StitchConfig::from_json_file(p)
            .with_context(|| format!("loading config {}", p.display())),
        None => Ok(StitchConfig::default()),
    }
}

fn init_threads(threads: Option<usize>) -> Result<()> {
    init_global_thread_pool(threads)
        .map_err(anyhow::Error::msg)
        .context("initializing thread pool")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command {
        Commands::Stitch(args) => run_stitch(&args),
        Commands::Tear(args) => run_tear(&args),
        Commands::Request { request, config } => run_request(&request, config.as_ref()),
    }
}

fn run_stitch(args: &StitchArgs) -> Result<()> {
    let cfg = args.to_config()?;
    init_threads(cfg.threads)?;

    let stitcher = Stitcher::new(cfg);
    let output = stitcher
        .stitch_dir(&args.tiles)
        .with_context(|| format!("stitching {}", args.tiles.display()))?;
    let written = stitcher
        .save_output(&output, &args.out)
        .with_context(|| format!("writing {}", args.out.display()))?;

    tracing::info!(
        "Placed {}/{} tiles into {}x{} in {:.2}s",
        output.report.placed_count(),
        output.report.tiles.len(),
        output.image.width(),
        output.image.height(),
        output.duration.as_secs_f64()
    );
    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}

fn run_tear(args: &TearArgs) -> Result<()> {
    let img = image::open(&args.image)
        .with_context(|| format!("opening {}", args.image.display()))?
        .to_rgb8();
    let pieces = split_into_tiles(&img, args.rows, args.cols, args.overlap)
        .context("splitting image into tiles")?;
    let written = write_tiles(&pieces, &args.out)
        .with_context(|| format!("writing tiles to {}", args.out.display()))?;
    tracing::info!("Wrote {} tiles to {}", written.len(), args.out.display());
    Ok(())
}

fn run_request(path: &Path, config: Option<&PathBuf>) -> Result<()> {
    let cfg = load_config(config)?;
    init_threads(cfg.threads)?;

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading request {}", path.display()))?;
    let request: StitchRequest = serde_json::from_str(&text)
        .with_context(|| format!("parsing request {}", path.display()))?;

    let response = Stitcher::new(cfg).run_request(&request);
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.is_success() {
        anyhow::bail!("stitch request failed");
    }
    Ok(())
}
