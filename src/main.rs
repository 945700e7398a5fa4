/// Land valuation CLI: import parcels, landmarks and finance history, build the
/// normalized feature table, train the price model and serve predictions.
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod features;
mod geo;
mod io;
mod model;
mod predict;
mod store;

use config::{load_config, ValuationConfig};
use error::{Result, ValuationError};
use features::{LandAttributes, MacroFactors};
use geo::NearestResolver;
use io::{generate_normalized, import_store, read_normalized};
use model::{train, ModelStore};
use predict::Predictor;
use store::{MemoryStore, PropertyStore};

#[derive(Debug, Parser)]
#[command(name = "landval", version, about = "Land price features, training and prediction")]
struct Cli {
    /// Directory with lands.csv, landmarks.csv, land-finance.csv and the artifacts.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Distance to the nearest landmark of each category for a stored land.
    Nearest {
        #[arg(long)]
        land_id: i64,
    },
    /// The closest landmarks of any category to a point.
    Closest {
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lon: f64,
        #[arg(long, default_value_t = 5)]
        k: usize,
    },
    /// Write the normalized feature table.
    Normalize,
    /// Train the model from the normalized table.
    Train,
    /// Predict the price of a parcel for one year.
    Predict {
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lon: f64,
        #[arg(long)]
        land_size: f64,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        inflation: f64,
        #[arg(long)]
        interest_rate: f64,
        #[arg(long)]
        dist_transit: Option<f64>,
    },
    /// Predict years 1..N with macro factors held at the configured constants.
    PredictMulti {
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lon: f64,
        #[arg(long)]
        land_size: f64,
    },
    /// Import, normalize and train in one pass.
    Setup,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_store(cfg: &ValuationConfig) -> Result<MemoryStore> {
    let (store, _) = import_store(&cfg.lands_path(), &cfg.landmarks_path(), &cfg.finance_path())?;
    tracing::debug!(lands = store.lands().len(), landmarks = store.landmarks().len(), "store ready");
    Ok(store)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Train from the normalized table on disk and swap in the new model.
fn train_and_save(cfg: &ValuationConfig) -> Result<model::LinearPriceModel> {
    let table = read_normalized(&cfg.normalized_path())?;
    let mut fitted = train(&table, &cfg.training)?;
    ModelStore::new(cfg.model_path()).save(&mut fitted)?;
    Ok(fitted)
}

fn report(fitted: &model::LinearPriceModel) {
    println!("Model v{} trained on {} rows", fitted.version, fitted.train_rows);
    if let Some(m) = &fitted.metrics {
        match m.r2 {
            Some(r2) => println!("R2 {:.4}", r2),
            None => println!("R2 undefined"),
        }
        println!("MAE {:.4}  MSE {:.4}  ({} held-out rows)", m.mean_absolute_error, m.mean_squared_error, m.test_rows);
    }
    println!("\nFeature influence:");
    for (name, coef) in fitted.influences() {
        println!("{:<30} {:>14.4}", name, coef);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut cfg = load_config(&std::env::current_dir()?)?;
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = dir;
    }

    match cli.command {
        Command::Nearest { land_id } => {
            let store = load_store(&cfg)?;
            let land = store.land(land_id)?;
            let resolver = NearestResolver::from_store(&store);
            let distances: serde_json::Map<String, serde_json::Value> = resolver
                .nearest_by_category(land.latitude, land.longitude)
                .into_iter()
                .map(|(c, d)| (c.to_string(), serde_json::json!(d)))
                .collect();
            print_json(&distances)
        }
        Command::Closest { lat, lon, k } => {
            let store = load_store(&cfg)?;
            print_json(&NearestResolver::from_store(&store).closest(lat, lon, k))
        }
        Command::Normalize => {
            let store = load_store(&cfg)?;
            let rows = generate_normalized(&store, &cfg.normalized_path())?;
            println!("Wrote {} rows to {}", rows, cfg.normalized_path().display());
            Ok(())
        }
        Command::Train => {
            let fitted = train_and_save(&cfg)?;
            report(&fitted);
            Ok(())
        }
        Command::Predict { lat, lon, land_size, year, inflation, interest_rate, dist_transit } => {
            let store = load_store(&cfg)?;
            let predictor = Predictor::load(&ModelStore::new(cfg.model_path()), &store)?;
            tracing::debug!(version = predictor.model().version, lat, lon, year, "single prediction");
            let land = LandAttributes { latitude: lat, longitude: lon, land_size, dist_transit };
            let price = predictor.predict(&land, MacroFactors { year, inflation, interest_rate })?;
            println!("{:.2}", price);
            Ok(())
        }
        Command::PredictMulti { lat, lon, land_size } => {
            if cfg.forecast.years == 0 {
                return Err(ValuationError::InvalidInput("forecast.years must be at least 1".into()));
            }
            let store = load_store(&cfg)?;
            let predictor = Predictor::load(&ModelStore::new(cfg.model_path()), &store)?;
            let land = LandAttributes { latitude: lat, longitude: lon, land_size, dist_transit: None };
            let prices: Vec<i64> = predictor
                .predict_years(&land, &cfg.forecast)?
                .into_iter()
                .map(|p| p.price)
                .collect();
            print_json(&prices)
        }
        Command::Setup => {
            let store = load_store(&cfg)?;
            let rows = generate_normalized(&store, &cfg.normalized_path())?;
            println!("Normalized {} rows", rows);
            let fitted = train_and_save(&cfg)?;
            report(&fitted);
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(kind = ?e.kind(), "{}", e);
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
