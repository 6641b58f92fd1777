use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use futures::future::FutureExt;
use glam::DVec2;
use serde::Serialize;
use terrastream_common::{TileCoord, Viewpoint};
use terrastream_geo::{CoordinateTransform, GeoPoint};
use terrastream_render::DebugScene;
use terrastream_stream::{
    CacheStats, ElevationCache, ElevationProvider, GeometrySource, HeightSource, LoadFuture,
    LoaderRegistry, PlaceholderImagery, TerrainConfig, TerrainField,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "terrastream-cli", about = "Headless terrain streaming driver")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML config file (defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Terrain {
    /// Sea level everywhere
    Flat,
    /// Closed-form rolling hills
    Hills,
    /// Offline elevation provider behind the elevation cache
    Synthetic,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print the effective configuration as YAML
    Config,
    /// Fly a viewpoint along a straight line and report streaming stats
    Fly {
        /// Start east coordinate
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        x: f64,
        /// Start north coordinate
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        y: f64,
        /// Heading in degrees, counter-clockwise from east
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        heading: f64,
        /// Distance travelled per frame
        #[arg(long, default_value = "25")]
        speed: f64,
        /// Number of frames to simulate
        #[arg(short, long, default_value = "200")]
        frames: u64,
        #[arg(long, value_enum, default_value = "hills")]
        terrain: Terrain,
        /// Report every N frames
        #[arg(long, default_value = "20")]
        every: u64,
        /// Emit one JSON object per report
        #[arg(long)]
        json: bool,
        /// Dump the scene contents at the end
        #[arg(long)]
        scene: bool,
        /// Turn wireframe on from the first frame
        #[arg(long)]
        wireframe: bool,
    },
    /// Stream around a point and report the ground height there
    Probe {
        /// East coordinate
        #[arg(allow_negative_numbers = true)]
        x: f64,
        /// North coordinate
        #[arg(allow_negative_numbers = true)]
        y: f64,
        #[arg(long, value_enum, default_value = "hills")]
        terrain: Terrain,
        /// Give up after this many frames
        #[arg(long, default_value = "100")]
        max_frames: u64,
        #[arg(long)]
        json: bool,
    },
}

/// Deterministic stand-in for a remote elevation service, a smooth function
/// of longitude and latitude.
struct SyntheticElevation;

impl SyntheticElevation {
    fn elevation(p: &GeoPoint) -> f64 {
        let (lon, lat) = (p.lon.to_radians(), p.lat.to_radians());
        300.0 + 220.0 * (lat * 900.0).sin() * (lon * 700.0).cos() + 40.0 * (lon * 4100.0).sin()
    }
}

impl ElevationProvider for SyntheticElevation {
    fn sample_most_detailed(&self, points: &[GeoPoint]) -> LoadFuture<Vec<f64>> {
        let heights = points.iter().map(Self::elevation).collect();
        futures::future::ready(Ok(heights)).boxed_local()
    }
}

struct Setup {
    registry: LoaderRegistry,
    transform: Rc<dyn CoordinateTransform>,
    cache: Option<Rc<ElevationCache>>,
}

fn setup(config: &TerrainConfig, terrain: Terrain) -> anyhow::Result<Setup> {
    let projection = config
        .projection
        .build()
        .context("building projection")?;
    let transform: Rc<dyn CoordinateTransform> = Rc::new(projection);
    let mut cache = None;
    let heights = match terrain {
        Terrain::Flat => HeightSource::flat(0.0),
        Terrain::Hills => HeightSource::rolling_hills(120.0, 6000.0),
        Terrain::Synthetic => {
            let sampled = Rc::new(ElevationCache::new(
                Rc::new(SyntheticElevation),
                Rc::clone(&transform),
                config.elevation_precision,
                config.cache_capacity(),
            ));
            cache = Some(Rc::clone(&sampled));
            HeightSource::Sampled(sampled)
        }
    };
    let registry = LoaderRegistry::new(
        GeometrySource::Heightfield(heights),
        Rc::new(PlaceholderImagery::default()),
        Rc::clone(&transform),
        config.resolution,
    );
    Ok(Setup {
        registry,
        transform,
        cache,
    })
}

#[derive(Serialize)]
struct ProbeReport {
    east: f64,
    north: f64,
    lon: f64,
    lat: f64,
    tile: TileCoord,
    height: Option<f64>,
    frames: u64,
    cache: Option<CacheStats>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => TerrainConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TerrainConfig::default(),
    };

    match cli.command {
        Commands::Info => {
            println!("terrastream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", terrastream_common::crate_info());
            println!("geo: {}", terrastream_geo::crate_info());
            println!("mesh: {}", terrastream_mesh::crate_info());
            println!("render: {}", terrastream_render::crate_info());
            println!("stream: {}", terrastream_stream::crate_info());
        }
        Commands::Config => {
            print!("{}", config.to_yaml_string()?);
        }
        Commands::Fly {
            x,
            y,
            heading,
            speed,
            frames,
            terrain,
            every,
            json,
            scene: dump_scene,
            wireframe,
        } => {
            let Setup {
                registry, cache, ..
            } = setup(&config, terrain)?;
            let mut field = TerrainField::new(config.clone(), registry)?;
            let mut scene = DebugScene::new();
            let start = DVec2::new(x, y);
            let dir = DVec2::from_angle(heading.to_radians());
            let every = every.max(1);

            if !json {
                println!(
                    "Flying {frames} frames from ({x}, {y}) heading {heading}° at {speed}/frame over {terrain:?} terrain"
                );
            }
            for frame in 0..frames {
                let position = start + dir * speed * frame as f64;
                let mut view = Viewpoint::new(position, config.view_distance);
                if wireframe && frame == 0 {
                    view = view.with_wireframe(true);
                }
                let stats = field.update(&view, &mut scene);
                if (frame + 1) % every == 0 || frame + 1 == frames {
                    if json {
                        println!("{}", serde_json::to_string(stats)?);
                    } else {
                        println!("{stats}");
                    }
                }
            }

            if !json {
                let timer = field.timer();
                println!(
                    "Update time: avg {:?}, max {:?} over last {} frames",
                    timer.average(),
                    timer.max(),
                    timer.count()
                );
                println!("Resources: {}", field.registry().ledger().snapshot());
                if let Some(cache) = &cache {
                    let s = cache.stats();
                    println!(
                        "Elevation cache: {} entries, {} hits, {} misses, {} provider calls",
                        cache.len(),
                        s.hits,
                        s.misses,
                        s.provider_calls
                    );
                }
            }
            if dump_scene {
                print!("{}", scene.render_text());
            }

            field.clear(&mut scene);
            tracing::debug!(resources = %field.registry().ledger().snapshot(), "shut down");
        }
        Commands::Probe {
            x,
            y,
            terrain,
            max_frames,
            json,
        } => {
            let Setup {
                registry,
                transform,
                cache,
            } = setup(&config, terrain)?;
            let mut field = TerrainField::new(config.clone(), registry)?;
            let mut scene = DebugScene::new();
            let point = DVec2::new(x, y);
            let view = Viewpoint::new(point, config.view_distance);

            let mut frames = 0;
            let mut height = None;
            while frames < max_frames.max(1) {
                field.update(&view, &mut scene);
                frames += 1;
                height = field.height_at(point);
                if height.is_some() {
                    break;
                }
            }

            let geo = transform.to_geographic(point);
            let report = ProbeReport {
                east: x,
                north: y,
                lon: geo.lon,
                lat: geo.lat,
                tile: field.grid().tile_at(point),
                height,
                frames,
                cache: cache.map(|c| c.stats()),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                match report.height {
                    Some(h) => println!(
                        "Ground at ({x}, {y}) {geo}: {h:.2} m (tile {}, {frames} frames)",
                        report.tile
                    ),
                    None => println!(
                        "No ground at ({x}, {y}) after {frames} frames (tile {})",
                        report.tile
                    ),
                }
            }
            field.clear(&mut scene);
        }
    }

    Ok(())
}
