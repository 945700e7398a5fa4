// Module for loading the bulk-import CSVs and for reading/writing the normalized
// table. It validates headers, skips blank or malformed lines, and maps a missing
// file to a "run the previous step first" error.
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Result, ValuationError};
use crate::features::{build_training_rows, table_header, TrainingRow, LABEL_COLUMN};
use crate::store::{LandmarkCategory, MemoryStore, PropertyStore};

#[derive(Debug, Deserialize)]
pub struct LandRecord {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub land_size: f64,
    pub dist_transit: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct LandmarkRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct FinanceRecord {
    pub land_id: i64,
    pub year: i32,
    pub land_price: f64,
    pub inflation: f64,
    pub interest_rate: f64,
}

pub const LAND_COLUMNS: [&str; 4] = ["name", "latitude", "longitude", "land_size"];
pub const LANDMARK_COLUMNS: [&str; 4] = ["type", "name", "latitude", "longitude"];
pub const FINANCE_COLUMNS: [&str; 5] = ["land_id", "year", "land_price", "inflation", "interest_rate"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub lands: usize,
    pub landmarks: usize,
    pub finance: usize,
    pub skipped: usize,
}

fn open(path: &Path, hint: &str) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ValuationError::missing_artifact(path.display().to_string(), hint),
        _ => ValuationError::Io(e),
    })
}

fn missing_columns(headers: &StringRecord, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|c| !headers.iter().any(|h| h.trim() == **c))
        .map(|c| c.to_string())
        .collect()
}

/// Parse typed records, returning them together with the number of skipped lines.
pub fn read_records<T: DeserializeOwned, R: Read>(reader: R, required: &[&str]) -> Result<(Vec<T>, usize)> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b',')
        .flexible(true)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let missing = missing_columns(&headers, required);
    if !missing.is_empty() {
        return Err(ValuationError::SchemaMismatch { missing });
    }
    let expected_len = headers.len();

    let mut out = Vec::new();
    let mut skipped = 0;
    for result in rdr.records() {
        let raw: StringRecord = result?;
        let line = raw.position().map(|p| p.line()).unwrap_or(0);

        if raw.iter().all(|f| f.is_empty()) {
            continue;
        }

        if raw.len() != expected_len {
            tracing::warn!(line, expected = expected_len, found = raw.len(), "skipping line with wrong field count");
            skipped += 1;
            continue;
        }

        match raw.deserialize::<T>(Some(&headers)) {
            Ok(rec) => out.push(rec),
            Err(e) => {
                tracing::warn!(line, error = %e, "skipping malformed record");
                skipped += 1;
            }
        }
    }

    Ok((out, skipped))
}

pub fn load_csv<T: DeserializeOwned>(path: &Path, required: &[&str]) -> Result<(Vec<T>, usize)> {
    let file = open(path, "Place the import CSVs in the data directory.")?;
    read_records(file, required)
}

/// Populate a store from the three import files. Lands get ids 1..N in file order,
/// which is what `land_id` in the finance file refers to.
pub fn import_store(lands: &Path, landmarks: &Path, finance: &Path) -> Result<(MemoryStore, ImportSummary)> {
    let mut store = MemoryStore::new();
    let mut summary = ImportSummary::default();

    let (land_rows, skipped) = load_csv::<LandRecord>(lands, &LAND_COLUMNS)?;
    summary.skipped += skipped;
    for r in land_rows {
        store.insert_land(&r.name, r.latitude, r.longitude, r.land_size, r.dist_transit);
        summary.lands += 1;
    }

    let (landmark_rows, skipped) = load_csv::<LandmarkRecord>(landmarks, &LANDMARK_COLUMNS)?;
    summary.skipped += skipped;
    for r in landmark_rows {
        match r.kind.parse::<LandmarkCategory>() {
            Ok(category) => {
                store.insert_landmark(category, &r.name, r.latitude, r.longitude);
                summary.landmarks += 1;
            }
            Err(e) => {
                tracing::warn!(name = %r.name, "{}", e);
                summary.skipped += 1;
            }
        }
    }

    let (finance_rows, skipped) = load_csv::<FinanceRecord>(finance, &FINANCE_COLUMNS)?;
    summary.skipped += skipped;
    for r in finance_rows {
        match store.insert_finance(r.land_id, r.year, r.land_price, r.inflation, r.interest_rate) {
            Ok(_) => summary.finance += 1,
            Err(e) => {
                tracing::warn!(land_id = r.land_id, year = r.year, "skipping finance row: {}", e);
                summary.skipped += 1;
            }
        }
    }

    tracing::info!(
        lands = summary.lands,
        landmarks = summary.landmarks,
        finance = summary.finance,
        skipped = summary.skipped,
        "import finished"
    );
    Ok((store, summary))
}

/// Write the normalized table with the fixed header.
pub fn write_normalized(path: &Path, rows: &[TrainingRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.write_record(table_header())?;
    for row in rows {
        wtr.write_record(row.record().iter().map(|v| v.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Build the training rows from `store` and write them to `path`. Zero rows is an
/// error: a table nobody can train on should fail here, not at training time.
pub fn generate_normalized<S: PropertyStore + ?Sized>(store: &S, path: &Path) -> Result<usize> {
    let rows = build_training_rows(store);
    if rows.is_empty() {
        return Err(ValuationError::EmptyDataset("no lands with finance history to normalize".into()));
    }
    write_normalized(path, &rows)?;
    tracing::info!(rows = rows.len(), path = %path.display(), "normalized table written");
    Ok(rows.len())
}

/// Numeric table read back from disk, addressed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl NormalizedTable {
    fn index_of(&self, names: &[String]) -> Result<Vec<usize>> {
        let mut missing = Vec::new();
        let mut idx = Vec::with_capacity(names.len());
        for n in names {
            match self.columns.iter().position(|c| c == n) {
                Some(i) => idx.push(i),
                None => missing.push(n.clone()),
            }
        }
        if missing.is_empty() {
            Ok(idx)
        } else {
            Err(ValuationError::SchemaMismatch { missing })
        }
    }

    /// Matrix of the named columns, in the order given.
    pub fn select(&self, names: &[String]) -> Result<Array2<f64>> {
        let idx = self.index_of(names)?;
        let mut x = Array2::<f64>::zeros((self.rows.len(), idx.len()));
        for (i, row) in self.rows.iter().enumerate() {
            for (j, &col) in idx.iter().enumerate() {
                x[(i, j)] = row[col];
            }
        }
        Ok(x)
    }

    pub fn label(&self) -> Result<Array1<f64>> {
        let idx = self.index_of(&[LABEL_COLUMN.to_string()])?[0];
        Ok(self.rows.iter().map(|r| r[idx]).collect())
    }
}

pub fn read_normalized(path: &Path) -> Result<NormalizedTable> {
    let file = open(path, "Please run CSV generation first.")?;
    let mut rdr = ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(file);

    let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for result in rdr.records() {
        let raw = result?;
        let line = raw.position().map(|p| p.line()).unwrap_or(0);
        let values = raw
            .iter()
            .map(|f| f.parse::<f64>())
            .collect::<std::result::Result<Vec<f64>, _>>()
            .map_err(|e| ValuationError::InvalidInput(format!("line {}: {}", line, e)))?;
        rows.push(values);
    }

    Ok(NormalizedTable { columns, rows })
}
