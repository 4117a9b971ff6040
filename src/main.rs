mod data;
mod dxf;
mod dxf_gen;
mod errors;
mod etl;
mod projection;

use std::collections::hash_map::DefaultHasher;
use std::fs::{self, create_dir_all, File};
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{error, info};
use serde::Deserialize;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use crate::dxf_gen::FeatureFilter;
use crate::errors::{Error, Result};
use crate::etl::draw_dxf::DrawDxfEtl;
use crate::etl::parse_osm::ParseOsmEtl;
use crate::etl::Etl;
use crate::projection::DEFAULT_PROJECTION;

/// Drawing presets.
#[derive(Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PlanType {
    /// Monochrome, footpaths left out
    KeyPlan,
    /// Colored, full detail
    LocationPlan,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UserConfig {
    pub data_path: String,
    /// Defaults to the input path with a `.dxf` extension.
    pub dest_path: Option<String>,
    pub projection: String,
    pub plan: Option<PlanType>,
    pub use_colors: bool,
    pub use_cache: bool,
    pub cache_dir: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        UserConfig {
            data_path: String::new(),
            dest_path: None,
            projection: DEFAULT_PROJECTION.to_string(),
            plan: None,
            use_colors: true,
            use_cache: true,
            cache_dir: "output".to_string(),
        }
    }
}

impl UserConfig {
    pub fn output_path(&self) -> PathBuf {
        match &self.dest_path {
            Some(dest_path) => PathBuf::from(dest_path),
            None => Path::new(&self.data_path).with_extension("dxf"),
        }
    }

    pub fn effective_use_colors(&self) -> bool {
        self.use_colors && self.plan != Some(PlanType::KeyPlan)
    }

    pub fn feature_filter(&self) -> FeatureFilter {
        FeatureFilter {
            include_footpaths: self.plan != Some(PlanType::KeyPlan),
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(input) = &cli.input {
            self.data_path = input.display().to_string();
        }
        if let Some(output) = &cli.output {
            self.dest_path = Some(output.display().to_string());
        }
        if let Some(projection) = &cli.projection {
            self.projection = projection.clone();
        }
        if cli.plan.is_some() {
            self.plan = cli.plan;
        }
        if cli.no_colors {
            self.use_colors = false;
        }
        if cli.no_cache {
            self.use_cache = false;
        }
    }
}

/// Convert OpenStreetMap XML data to AutoCAD DXF drawings
#[derive(Parser, Debug)]
#[command(name = "osm_to_dxf", version, long_about = None)]
struct Cli {
    /// Input OSM file (.osm, .xml or .osm.xz)
    input: Option<PathBuf>,

    /// JSON config file, command line flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output DXF file path (default: input file with .dxf extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target coordinate system, e.g. EPSG:3857 or EPSG:32633
    #[arg(short, long)]
    projection: Option<String>,

    #[arg(long, value_enum)]
    plan: Option<PlanType>,

    /// Generate a monochrome DXF (all layers white)
    #[arg(long)]
    no_colors: bool,

    /// Reparse the input even if a cached parse exists
    #[arg(long)]
    no_cache: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn load_user_config(path: &Path) -> Result<UserConfig> {
    let file = File::open(path)
        .map_err(|err| Error::config(format!("Could not open config file {}: {}", path.display(), err)))?;
    Ok(serde_json::from_reader(file)?)
}

fn build_config(cli: &Cli) -> Result<UserConfig> {
    let mut config = match &cli.config {
        Some(path) => load_user_config(path)?,
        None => UserConfig::default(),
    };
    config.apply_cli(cli);

    if config.data_path.is_empty() {
        return Err(Error::config("No input file given"));
    }
    if !Path::new(&config.data_path).exists() {
        return Err(Error::config(format!("Input file not found: {}", config.data_path)));
    }
    Ok(config)
}

/// `<cache_dir>/<input file name>-<hash of the canonical input path>`, so inputs sharing a
/// file name get separate caches.
fn cache_dir_for(config: &UserConfig) -> Result<PathBuf> {
    let input_path = fs::canonicalize(&config.data_path)?;
    let input_fname = input_path
        .file_name()
        .ok_or("Could not get input file name")?
        .to_string_lossy();
    let mut hasher = DefaultHasher::new();
    input_path.hash(&mut hasher);
    Ok(Path::new(&config.cache_dir).join(format!("{}-{:016x}", input_fname, hasher.finish())))
}

fn create_cache_dir(config: &UserConfig) -> Result<PathBuf> {
    let cache_dir = cache_dir_for(config)?;
    create_dir_all(&cache_dir)?;
    Ok(cache_dir)
}

fn setup_logging(verbose: bool) {
    Builder::with_level(if verbose { "debug" } else { "info" })
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn convert(config: &UserConfig) -> Result<()> {
    let output_path = config.output_path();
    let output_str = output_path.display().to_string();
    info!(
        input = config.data_path.as_str(),
        output = output_str.as_str(),
        projection = config.projection.as_str();
        "Converting"
    );

    let cache_dir = create_cache_dir(config)?;

    let mut parse_etl = ParseOsmEtl::new(config);
    if config.use_cache {
        parse_etl.process(&cache_dir)?;
    } else {
        parse_etl.reprocess(&cache_dir)?;
    }

    let mut draw_etl = DrawDxfEtl::new(config)?;
    draw_etl.process(&cache_dir)?;

    if let Some(stats) = draw_etl.stats() {
        info!(
            nodes = stats.nodes,
            ways = stats.ways,
            relations = stats.relations,
            layers = stats.layers,
            markers = stats.markers,
            polylines = stats.polylines,
            output_bytes = stats.output_bytes;
            "Conversion completed"
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let result = build_config(&cli).and_then(|config| convert(&config));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(kind = format!("{:?}", err.kind).as_str(), err = err.message.as_str(); "Conversion failed");
            ExitCode::FAILURE
        },
    }
}
