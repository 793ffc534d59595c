mod ingest;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ingest::{find_inputs, read_feature_collection, TiledFeature};
use log::{info, warn};
use rayon::prelude::*;
use std::{
    fs,
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};
use tilegeom::{
    convert_feature, extract_to, group_into_batches, merge_tile_pipes, Alignment,
    ConversionConfig, Crs, Feature, TileEncoder, WeldOptions,
};

/// `geo2b3dm` - GeoJSON footprints and pipe centerlines to batched 3D tiles.
#[derive(Parser, Debug)]
#[command(name = "geo2b3dm", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert every FeatureCollection under a directory into `.b3dm` tiles.
    Convert(ConvertArgs),
    /// Write the geometry payload of one tile to a file.
    Extract(ExtractArgs),
}

#[derive(Args, Debug, Clone)]
struct ConvertArgs {
    #[arg(long, env = "GEO2B3DM_INPUT_DIR")]
    input_dir: PathBuf,

    #[arg(long, env = "GEO2B3DM_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Source coordinate system, e.g. EPSG:4326, EPSG:3857, EPSG:32652, EPSG:5186.
    #[arg(long, env = "GEO2B3DM_CRS", default_value = "EPSG:4326")]
    crs: String,

    /// Source coordinates are (y, x); swap them before projection.
    #[arg(long, env = "GEO2B3DM_FLIP_COORDINATE")]
    flip_coordinate: bool,

    #[arg(long, env = "GEO2B3DM_NAME_COLUMN", default_value = "name")]
    name_column: String,

    #[arg(long, env = "GEO2B3DM_HEIGHT_COLUMN", default_value = "height")]
    height_column: String,

    /// Per-feature floor altitude; falls back to --absolute-altitude.
    #[arg(long, env = "GEO2B3DM_ALTITUDE_COLUMN")]
    altitude_column: Option<String>,

    /// Circular pipe diameter in millimetres.
    #[arg(long, env = "GEO2B3DM_DIAMETER_COLUMN", default_value = "diameter")]
    diameter_column: String,

    #[arg(long, env = "GEO2B3DM_MINIMUM_HEIGHT", default_value_t = 1.0)]
    minimum_height: f64,

    #[arg(long, env = "GEO2B3DM_ABSOLUTE_ALTITUDE", default_value_t = 0.0)]
    absolute_altitude: f64,

    /// Extend every building this far below its floor.
    #[arg(long, env = "GEO2B3DM_SKIRT_HEIGHT", default_value_t = 0.0)]
    skirt_height: f64,

    /// Property holding the tile code; the input file stem is used when absent.
    #[arg(long, env = "GEO2B3DM_TILE_COLUMN")]
    tile_column: Option<String>,

    /// Join continuing pipe runs with equal profiles inside a tile.
    #[arg(long, env = "GEO2B3DM_MERGE_PIPES")]
    merge_pipes: bool,

    /// Pipe top depth below the ground elevation (metres).
    #[arg(long, env = "GEO2B3DM_PIPE_DEPTH", default_value_t = 2.0)]
    pipe_depth: f64,

    #[arg(long, env = "GEO2B3DM_CIRCLE_SEGMENTS", default_value_t = 16)]
    circle_segments: usize,

    /// Vertex weld distance (metres).
    #[arg(long, env = "GEO2B3DM_WELD_TOLERANCE", default_value_t = 1e-4)]
    weld_tolerance: f64,

    /// Pad tile JSON blocks to this byte boundary (unpadded when omitted).
    #[arg(long, env = "GEO2B3DM_ALIGN")]
    align: Option<usize>,

    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

#[derive(Args, Debug, Clone)]
struct ExtractArgs {
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    output: PathBuf,
}

impl ConvertArgs {
    fn to_config(&self) -> Result<ConversionConfig> {
        let crs = Crs::parse(&self.crs).map_err(anyhow::Error::msg)?;
        if !(self.weld_tolerance >= 0.0) {
            bail!("--weld-tolerance must be non-negative");
        }

        Ok(ConversionConfig {
            flip_coordinate: self.flip_coordinate,
            name_column: self.name_column.clone(),
            height_column: self.height_column.clone(),
            altitude_column: self.altitude_column.clone(),
            diameter_column: self.diameter_column.clone(),
            minimum_height: self.minimum_height,
            absolute_altitude: self.absolute_altitude,
            skirt_height: self.skirt_height,
            crs,
            pipe_depth: self.pipe_depth,
            circle_segments: self.circle_segments,
            merge_pipes: self.merge_pipes,
            weld: WeldOptions {
                position_tolerance: self.weld_tolerance,
                ..WeldOptions::default()
            },
            alignment: self.align.map_or(Alignment::Unpadded, Alignment::Boundary),
            ..ConversionConfig::default()
        })
    }
}

/// Apply the pipe merge policy tile by tile, keeping first-appearance order.
fn merge_pipes_per_tile(features: Vec<TiledFeature>, config: &ConversionConfig) -> Vec<TiledFeature> {
    let mut tiles: Vec<(String, Vec<Feature>)> = Vec::new();
    for tiled in features {
        match tiles.iter_mut().find(|(code, _)| *code == tiled.tile_code) {
            Some((_, group)) => group.push(tiled.feature),
            None => tiles.push((tiled.tile_code, vec![tiled.feature])),
        }
    }

    tiles
        .into_iter()
        .flat_map(|(tile_code, group)| {
            merge_tile_pipes(group, config)
                .into_iter()
                .map(move |feature| TiledFeature {
                    tile_code: tile_code.clone(),
                    feature,
                })
        })
        .collect()
}

fn convert(args: &ConvertArgs) -> Result<()> {
    let started = Instant::now();
    let config = args.to_config()?;

    if !args.input_dir.is_dir() {
        bail!("input directory {} does not exist", args.input_dir.display());
    }
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let inputs = find_inputs(&args.input_dir);
    if inputs.is_empty() {
        warn!("no .geojson/.json files under {}", args.input_dir.display());
        return Ok(());
    }
    info!("Reading {} input files (CRS {})", inputs.len(), config.crs);

    let tile_column = args.tile_column.as_deref();
    let mut features: Vec<TiledFeature> = inputs
        .par_iter()
        .filter_map(|path| match read_feature_collection(path, tile_column) {
            Ok(features) => Some(features),
            Err(err) => {
                warn!("Error reading {}: {:#}", path.display(), err);
                None
            }
        })
        .flatten()
        .collect();

    if config.merge_pipes {
        features = merge_pipes_per_tile(features, &config);
    }
    let total = features.len();
    info!("Converting {total} features...");

    let built: Vec<_> = features
        .par_iter()
        .filter_map(|tiled| {
            convert_feature(&tiled.feature, &config)
                .built()
                .map(|b| (tiled.tile_code.clone(), b))
        })
        .collect();
    let skipped = total - built.len();

    let encoder = TileEncoder::new(&args.output_dir).with_alignment(config.alignment);
    let batches: Vec<_> = group_into_batches(built)
        .into_iter()
        .filter(|batch| {
            let exists = encoder.tile_path(&batch.tile_code).exists();
            if exists && !args.overwrite {
                info!("{} exists, skipping (use --overwrite)", batch.tile_code);
            }
            args.overwrite || !exists
        })
        .collect();

    let failed = AtomicUsize::new(0);
    batches.par_iter().for_each(|batch| {
        if let Err(err) = encoder.encode(batch) {
            failed.fetch_add(1, Ordering::Relaxed);
            warn!("Error writing tile {}: {:#}", batch.tile_code, err);
        }
    });
    let failed = failed.into_inner();

    info!(
        "Done: {} tiles written, {} failed, {} features skipped in {:.1?}",
        batches.len() - failed,
        failed,
        skipped,
        started.elapsed()
    );
    Ok(())
}

fn extract(args: &ExtractArgs) -> Result<()> {
    let len = extract_to(&args.input, &args.output)
        .with_context(|| format!("extracting {}", args.input.display()))?;
    info!(
        "{} -> {} ({len} bytes)",
        args.input.display(),
        args.output.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Convert(args) => convert(args),
        Command::Extract(args) => extract(args),
    }
}
