//! Runtime configuration: where the data and artifacts live, how training splits
//! the dataset, and which macro factors the multi-year forecast holds constant.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationConfig {
    /// Directory holding the import CSVs and the generated artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_normalized_file")]
    pub normalized_file: String,
    #[serde(default = "default_model_file")]
    pub model_file: String,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Fraction of rows held out for evaluation.
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Ridge penalty on the min-max scaled features; 0 means plain least squares.
    #[serde(default = "default_ridge_penalty")]
    pub ridge_penalty: f64,
}

/// Macro factors used by the multi-year forecast. Only `year` varies across
/// the forecast; inflation and interest rate stay fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    #[serde(default = "default_years")]
    pub years: u32,
    #[serde(default = "default_inflation")]
    pub inflation: f64,
    #[serde(default = "default_interest_rate")]
    pub interest_rate: f64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_normalized_file() -> String {
    "normalized.csv".into()
}

fn default_model_file() -> String {
    "model.json".into()
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_ridge_penalty() -> f64 {
    1e-3
}

fn default_years() -> u32 {
    5
}

fn default_inflation() -> f64 {
    1.5
}

fn default_interest_rate() -> f64 {
    3.0
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            normalized_file: default_normalized_file(),
            model_file: default_model_file(),
            training: TrainingConfig::default(),
            forecast: ForecastConfig::default(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
            seed: default_seed(),
            ridge_penalty: default_ridge_penalty(),
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            years: default_years(),
            inflation: default_inflation(),
            interest_rate: default_interest_rate(),
        }
    }
}

impl ValuationConfig {
    pub fn normalized_path(&self) -> PathBuf {
        self.data_dir.join(&self.normalized_file)
    }

    pub fn model_path(&self) -> PathBuf {
        self.data_dir.join(&self.model_file)
    }

    pub fn lands_path(&self) -> PathBuf {
        self.data_dir.join("lands.csv")
    }

    pub fn landmarks_path(&self) -> PathBuf {
        self.data_dir.join("landmarks.csv")
    }

    pub fn finance_path(&self) -> PathBuf {
        self.data_dir.join("land-finance.csv")
    }
}

/// Load configuration.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`LANDVAL_DATA_DIR`, `LANDVAL_TRAINING__SEED`, ...)
/// 2. `landval.toml` in `workdir`, if present
/// 3. Built-in defaults
pub fn load_config(workdir: &Path) -> Result<ValuationConfig> {
    let mut figment = Figment::from(Serialized::defaults(ValuationConfig::default()));

    let file = workdir.join("landval.toml");
    if file.exists() {
        figment = figment.merge(Toml::file(&file));
    }

    figment = figment.merge(Env::prefixed("LANDVAL_").split("__"));

    Ok(figment.extract().map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_match_forecast_policy() {
        let cfg = ValuationConfig::default();
        assert_eq!(cfg.forecast.years, 5);
        assert_eq!(cfg.forecast.inflation, 1.5);
        assert_eq!(cfg.forecast.interest_rate, 3.0);
        assert_eq!(cfg.training.seed, 42);
        assert_eq!(cfg.model_path(), PathBuf::from("data").join("model.json"));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("landval.toml"),
            "model_file = \"m.json\"\n[training]\nseed = 7\n",
        )
        .unwrap();

        let cfg = load_config(dir.path()).unwrap();
        assert_eq!(cfg.model_file, "m.json");
        assert_eq!(cfg.training.seed, 7);
        assert_eq!(cfg.training.test_fraction, 0.2);
        assert_eq!(cfg.training.ridge_penalty, 1e-3);
    }
}
