/// Train the land price regressor and persist it together with its feature schema.
use chrono::{DateTime, Utc};
use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

use crate::config::TrainingConfig;
use crate::error::{Result, ValuationError};
use crate::features::FEATURE_COLUMNS;
use crate::io::NormalizedTable;

/// What the predictor needs from a fitted model: its column order and a scalar
/// prediction for one row given in that order.
pub trait Regressor {
    fn feature_names(&self) -> &[String];
    fn predict_row(&self, row: &[f64]) -> f64;
}

/// Per-column min-max bounds fitted on the training partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl MinMaxScaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let (min, max): (Vec<f64>, Vec<f64>) = x
            .axis_iter(Axis(1))
            .map(|col| {
                col.iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(mi, ma), &v| (mi.min(v), ma.max(v)))
            })
            .unzip();
        Self { min, max }
    }

    pub fn is_constant(&self, j: usize) -> bool {
        let range = self.max[j] - self.min[j];
        range.is_nan() || range <= 0.0
    }

    /// Scaled value of column `j`; constant columns map to 0.
    pub fn scale(&self, j: usize, v: f64) -> f64 {
        if self.is_constant(j) {
            0.0
        } else {
            (v - self.min[j]) / (self.max[j] - self.min[j])
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Undefined when the held-out labels have no variance.
    pub r2: Option<f64>,
    pub mean_absolute_error: f64,
    pub mean_squared_error: f64,
    pub test_rows: usize,
}

/// Persisted model: the feature schema travels with the coefficients, so the
/// two can never be replaced separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearPriceModel {
    pub version: u64,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub scaler: MinMaxScaler,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    pub train_rows: usize,
    pub metrics: Option<Metrics>,
}

impl Regressor for LinearPriceModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .zip(row)
            .enumerate()
            .map(|(j, (c, &v))| c * self.scaler.scale(j, v))
            .sum::<f64>()
            + self.intercept
    }
}

impl LinearPriceModel {
    fn predict_matrix(&self, x: &Array2<f64>) -> Array1<f64> {
        x.rows()
            .into_iter()
            .map(|r| self.predict_row(&r.to_vec()))
            .collect()
    }

    /// Features ordered by the magnitude of their coefficient.
    pub fn influences(&self) -> Vec<(String, f64)> {
        let mut vec: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(self.coefficients.iter().copied())
            .collect();
        vec.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        vec
    }

    fn check(&self) -> Result<()> {
        let n = self.feature_names.len();
        if n == 0
            || self.coefficients.len() != n
            || self.scaler.min.len() != n
            || self.scaler.max.len() != n
        {
            return Err(ValuationError::InvalidInput(
                "model artifact has inconsistent feature and coefficient counts".into(),
            ));
        }
        Ok(())
    }
}

fn split_indices(n: usize, cfg: &TrainingConfig) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    idx.shuffle(&mut rng);
    let n_test = ((n as f64) * cfg.test_fraction.clamp(0.0, 1.0)).ceil() as usize;
    let test = idx.split_off(n - n_test.min(n));
    (idx, test)
}

/// Ridge fit on the scaled active columns. Land-level columns repeat across a
/// land's finance years, so with few lands they are (nearly) collinear; the
/// penalty keeps the system positive definite. Solved as plain least squares on
/// centered data with `sqrt(penalty * n) * I` rows appended. A zero penalty is
/// ordinary least squares.
fn fit_ridge(x: &Array2<f64>, y: &Array1<f64>, penalty: f64) -> Result<(Array1<f64>, f64)> {
    let (n, p) = x.dim();
    let (x_mean, y_mean) = match (x.mean_axis(Axis(0)), y.mean()) {
        (Some(xm), Some(ym)) => (xm, ym),
        _ => return Err(ValuationError::EmptyDataset("no training rows".into())),
    };

    let extra = if penalty > 0.0 { p } else { 0 };
    let mut xa = Array2::<f64>::zeros((n + extra, p));
    let mut ya = Array1::<f64>::zeros(n + extra);
    xa.slice_mut(s![..n, ..]).assign(&(x - &x_mean));
    ya.slice_mut(s![..n]).assign(&(y - y_mean));
    let shrink = (penalty * n as f64).sqrt();
    for k in 0..extra {
        xa[(n + k, k)] = shrink;
    }

    let fitted = LinearRegression::new()
        .with_intercept(false)
        .fit(&Dataset::new(xa, ya))
        .map_err(|e| ValuationError::Training(e.to_string()))?;
    let weights = fitted.params().clone();
    let intercept = y_mean - x_mean.dot(&weights);
    Ok((weights, intercept))
}

/// Fit on the fixed feature columns of `table`, holding out `test_fraction` of
/// the rows (seeded shuffle) for the reported metrics.
pub fn train(table: &NormalizedTable, cfg: &TrainingConfig) -> Result<LinearPriceModel> {
    let names: Vec<String> = FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect();
    let x = table.select(&names)?;
    let y = table.label()?;
    if x.nrows() == 0 {
        return Err(ValuationError::EmptyDataset("normalized table has no rows".into()));
    }

    let (train_idx, test_idx) = split_indices(x.nrows(), cfg);
    if train_idx.is_empty() {
        return Err(ValuationError::EmptyDataset(format!(
            "{} rows leave nothing to train on after holding out {}",
            x.nrows(),
            test_idx.len()
        )));
    }
    let x_train = x.select(Axis(0), &train_idx);
    let y_train = y.select(Axis(0), &train_idx);

    let scaler = MinMaxScaler::fit(&x_train);
    let active: Vec<usize> = (0..names.len()).filter(|&j| !scaler.is_constant(j)).collect();
    if active.is_empty() {
        return Err(ValuationError::EmptyDataset("every feature column is constant".into()));
    }
    if cfg.ridge_penalty <= 0.0 && x_train.nrows() <= active.len() {
        return Err(ValuationError::EmptyDataset(format!(
            "{} training rows cannot fit {} varying features without a ridge penalty",
            x_train.nrows(),
            active.len()
        )));
    }

    let mut scaled = Array2::<f64>::zeros((x_train.nrows(), active.len()));
    for (i, row) in x_train.rows().into_iter().enumerate() {
        for (k, &j) in active.iter().enumerate() {
            scaled[(i, k)] = scaler.scale(j, row[j]);
        }
    }

    let (weights, intercept) = fit_ridge(&scaled, &y_train, cfg.ridge_penalty)?;

    let mut coefficients = vec![0.0; names.len()];
    for (&j, &c) in active.iter().zip(weights.iter()) {
        coefficients[j] = c;
    }
    if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
        return Err(ValuationError::Training("regression produced non-finite coefficients".into()));
    }

    let mut model = LinearPriceModel {
        version: 0,
        trained_at: Utc::now(),
        feature_names: names,
        scaler,
        intercept,
        coefficients,
        train_rows: train_idx.len(),
        metrics: None,
    };

    if test_idx.len() >= 2 {
        let x_test = x.select(Axis(0), &test_idx);
        let y_test = y.select(Axis(0), &test_idx);
        let pred = model.predict_matrix(&x_test);
        let metric_err = |e: linfa::Error| ValuationError::Training(e.to_string());
        model.metrics = Some(Metrics {
            r2: pred.r2(&y_test).ok().filter(|v| v.is_finite()),
            mean_absolute_error: pred.mean_absolute_error(&y_test).map_err(metric_err)?,
            mean_squared_error: pred.mean_squared_error(&y_test).map_err(metric_err)?,
            test_rows: test_idx.len(),
        });
    }

    tracing::info!(
        train_rows = model.train_rows,
        test_rows = test_idx.len(),
        varying = active.len(),
        penalty = cfg.ridge_penalty,
        r2 = ?model.metrics.as_ref().and_then(|m| m.r2),
        "model fitted"
    );
    Ok(model)
}

// Serializes saves within the process; across processes the rename keeps the
// artifact whole and the last writer wins.
static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Single-file artifact store. Saves write a temp file in the target directory
/// and persist it over the target, so readers see either the previous or the
/// new model.
#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<LinearPriceModel> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ValuationError::missing_artifact(self.path.display().to_string(), "Train the model first.")
            }
            _ => ValuationError::Io(e),
        })?;
        let model: LinearPriceModel = serde_json::from_str(&content)?;
        model.check()?;
        Ok(model)
    }

    /// Persist `model` as the next version and return that version. An existing
    /// artifact that cannot be read is an error, not a reason to restart at 1.
    pub fn save(&self, model: &mut LinearPriceModel) -> Result<u64> {
        model.check()?;
        let _guard = WRITE_LOCK
            .lock()
            .map_err(|_| ValuationError::Training("model store lock poisoned".into()))?;

        let previous = match self.load() {
            Ok(m) => m.version,
            Err(ValuationError::MissingArtifact { .. }) => 0,
            Err(e) => return Err(e),
        };
        model.version = previous + 1;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &*model)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| ValuationError::Io(e.error))?;

        tracing::info!(version = model.version, path = %self.path.display(), "model saved");
        Ok(model.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::features::LABEL_COLUMN;
    use ndarray::array;

    fn table(rows: Vec<Vec<f64>>) -> NormalizedTable {
        let mut columns: Vec<String> = FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.push(LABEL_COLUMN.to_string());
        NormalizedTable { columns, rows }
    }

    // price = 1000 + 2 * land_size - 50 * dist_cbd, other features constant or noise-free
    fn linear_rows(n: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| {
                let land_size = 100.0 + (i * 37 % 101) as f64;
                let dist_cbd = 0.5 + (i * 13 % 17) as f64 * 0.25;
                let mut row = vec![0.0; FEATURE_COLUMNS.len()];
                row[0] = land_size;
                row[6] = dist_cbd;
                row[10] = 2020.0;
                row.push(1000.0 + 2.0 * land_size - 50.0 * dist_cbd);
                row
            })
            .collect()
    }

    #[test]
    fn scaler_maps_range_to_unit_interval() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let s = MinMaxScaler::fit(&x);
        assert_eq!(s.scale(0, 2.0), 0.5);
        assert!(s.is_constant(1));
        assert_eq!(s.scale(1, 42.0), 0.0);
    }

    #[test]
    fn split_is_reproducible() {
        let cfg = TrainingConfig { test_fraction: 0.2, seed: 42, ..TrainingConfig::default() };
        let (a_train, a_test) = split_indices(10, &cfg);
        let (b_train, b_test) = split_indices(10, &cfg);
        assert_eq!(a_test.len(), 2);
        assert_eq!(a_train.len(), 8);
        assert_eq!((a_train, a_test), (b_train, b_test));
    }

    fn least_squares() -> TrainingConfig {
        TrainingConfig { ridge_penalty: 0.0, ..TrainingConfig::default() }
    }

    #[test]
    fn recovers_linear_relation() {
        let model = train(&table(linear_rows(40)), &least_squares()).unwrap();
        let mut row = vec![0.0; FEATURE_COLUMNS.len()];
        row[0] = 150.0;
        row[6] = 2.0;
        row[10] = 2020.0;
        let p = model.predict_row(&row);
        assert!((p - (1000.0 + 300.0 - 100.0)).abs() < 1e-6, "got {p}");

        let metrics = model.metrics.as_ref().unwrap();
        assert_eq!(metrics.test_rows, 8);
        assert!(metrics.mean_absolute_error < 1e-6);

        let influences = model.influences();
        let top: Vec<&str> = influences.iter().take(2).map(|(n, _)| n.as_str()).collect();
        assert!(top.contains(&"land_size") && top.contains(&"dist_cbd"));
        // constant columns never enter the fit
        assert_eq!(model.coefficients[10], 0.0);
    }

    #[test]
    fn penalty_only_shrinks_slightly() {
        let model = train(&table(linear_rows(40)), &TrainingConfig::default()).unwrap();
        let mut row = vec![0.0; FEATURE_COLUMNS.len()];
        row[0] = 150.0;
        row[6] = 2.0;
        row[10] = 2020.0;
        let p = model.predict_row(&row);
        assert!((p - 1200.0).abs() < 12.0, "got {p}");
    }

    // Three lands with ten finance years each. land_size, dist_transit and
    // latitude are exact multiples of each other across the lands.
    fn three_land_rows() -> Vec<Vec<f64>> {
        let mut rows = Vec::new();
        for (land, size) in [400.0, 900.0, 1500.0].into_iter().enumerate() {
            for year in 0..10 {
                let mut row = vec![0.0; FEATURE_COLUMNS.len()];
                row[0] = size;
                row[1] = size * 0.002;
                row[2] = 13.6 + size * 0.0001;
                row[10] = 2010.0 + year as f64;
                row[11] = 1.0 + (year % 3) as f64 * 0.5;
                row[12] = 2.0 + (year % 4) as f64 * 0.25;
                row.push(50_000.0 + 1_500.0 * year as f64 + 4_000.0 * land as f64);
                rows.push(row);
            }
        }
        rows
    }

    #[test]
    fn collinear_lands_still_train_to_sane_prices() {
        let rows = three_land_rows();
        let labels: Vec<f64> = rows.iter().map(|r| r[FEATURE_COLUMNS.len()]).collect();
        let lo = labels.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = labels.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let spread = hi - lo;

        let model = train(&table(rows.clone()), &TrainingConfig::default()).unwrap();
        assert!(model.coefficients.iter().all(|c| c.abs() < 1e6), "{:?}", model.coefficients);
        for (row, label) in rows.iter().zip(&labels) {
            let p = model.predict_row(&row[..FEATURE_COLUMNS.len()]);
            assert!(p.is_finite());
            assert!(p > lo - spread && p < hi + spread, "predicted {p} for {label}");
        }
    }

    #[test]
    fn missing_label_is_a_schema_error() {
        let mut t = table(linear_rows(5));
        t.columns.pop();
        for r in &mut t.rows {
            r.pop();
        }
        let err = train(&t, &TrainingConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn single_row_leaves_nothing_to_train() {
        let err = train(&table(linear_rows(1)), &TrainingConfig::default()).unwrap_err();
        assert!(matches!(err, ValuationError::EmptyDataset(_)), "{err}");
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn underdetermined_least_squares_is_reported() {
        let err = train(&table(linear_rows(3)), &least_squares()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn store_swaps_versions_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("model.json"));
        assert_eq!(store.load().unwrap_err().kind(), ErrorKind::MissingPrerequisite);

        let mut model = train(&table(linear_rows(40)), &TrainingConfig::default()).unwrap();
        assert_eq!(store.save(&mut model).unwrap(), 1);
        assert_eq!(store.save(&mut model).unwrap(), 2);

        let loaded = store.load().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.feature_names, model.feature_names);
        assert_eq!(loaded.coefficients, model.coefficients);
        // no temp files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn corrupt_artifact_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "{not json").unwrap();

        let mut model = train(&table(linear_rows(40)), &TrainingConfig::default()).unwrap();
        let err = ModelStore::new(&path).save(&mut model).unwrap_err();
        assert!(matches!(err, ValuationError::Json(_)), "{err}");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[test]
    fn concurrent_saves_get_distinct_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let model = train(&table(linear_rows(40)), &TrainingConfig::default()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = ModelStore::new(&path);
                let mut m = model.clone();
                std::thread::spawn(move || store.save(&mut m).unwrap())
            })
            .collect();
        let mut versions: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        versions.sort_unstable();

        assert_eq!(versions, vec![1, 2, 3, 4]);
        assert_eq!(ModelStore::new(&path).load().unwrap().version, 4);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
