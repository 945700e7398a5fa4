// Feature schema, row assembly and dataset generation. Training and prediction
// both build rows through `assemble`, so column order cannot drift between them.
use crate::geo::NearestResolver;
use crate::store::{Land, LandFinance, LandmarkCategory, PropertyStore};

const BASIC_COUNT: usize = 4;
const MACRO_COUNT: usize = 3;

pub const FEATURE_COUNT: usize = BASIC_COUNT + LandmarkCategory::COUNT + MACRO_COUNT;

/// Feature columns in table order: basic attributes, one distance per landmark
/// category (in `LandmarkCategory::ALL` order), then temporal/macro fields.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "land_size",
    "dist_transit",
    "latitude",
    "longitude",
    "dist_mrt",
    "dist_bts",
    "dist_cbd",
    "dist_office",
    "dist_condo",
    "dist_tourist",
    "year",
    "inflation",
    "interest_rate",
];

pub const LABEL_COLUMN: &str = "land_price";

/// Columns of the normalized table: every feature column, then the label.
pub fn table_header() -> Vec<&'static str> {
    let mut header = FEATURE_COLUMNS.to_vec();
    header.push(LABEL_COLUMN);
    header
}

/// The attributes of a parcel the assembler needs. Prediction inputs are not
/// stored lands, so this is separate from `Land`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandAttributes {
    pub latitude: f64,
    pub longitude: f64,
    pub land_size: f64,
    pub dist_transit: Option<f64>,
}

impl From<&Land> for LandAttributes {
    fn from(land: &Land) -> Self {
        Self {
            latitude: land.latitude,
            longitude: land.longitude,
            land_size: land.land_size,
            dist_transit: land.dist_transit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacroFactors {
    pub year: i32,
    pub inflation: f64,
    pub interest_rate: f64,
}

impl From<&LandFinance> for MacroFactors {
    fn from(f: &LandFinance) -> Self {
        Self {
            year: f.year,
            inflation: f.inflation,
            interest_rate: f.interest_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRow {
    pub land_size: f64,
    pub dist_transit: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Indexed by `LandmarkCategory::index`.
    pub distances: [f64; LandmarkCategory::COUNT],
    pub year: f64,
    pub inflation: f64,
    pub interest_rate: f64,
}

impl FeatureRow {
    /// Values in `FEATURE_COLUMNS` order.
    pub fn values(&self) -> [f64; FEATURE_COUNT] {
        let mut out = [0.0; FEATURE_COUNT];
        out[..BASIC_COUNT].copy_from_slice(&[self.land_size, self.dist_transit, self.latitude, self.longitude]);
        out[BASIC_COUNT..BASIC_COUNT + LandmarkCategory::COUNT].copy_from_slice(&self.distances);
        out[FEATURE_COUNT - MACRO_COUNT..].copy_from_slice(&[self.year, self.inflation, self.interest_rate]);
        out
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        FEATURE_COLUMNS
            .iter()
            .position(|c| *c == column)
            .map(|i| self.values()[i])
    }

    /// Values reordered to `columns`; fails with every name the row lacks.
    pub fn select(&self, columns: &[String]) -> Result<Vec<f64>, Vec<String>> {
        let mut missing = Vec::new();
        let mut out = Vec::with_capacity(columns.len());
        for c in columns {
            match self.get(c) {
                Some(v) => out.push(v),
                None => missing.push(c.clone()),
            }
        }
        if missing.is_empty() {
            Ok(out)
        } else {
            Err(missing)
        }
    }

    pub fn with_macro(mut self, factors: MacroFactors) -> Self {
        self.year = factors.year as f64;
        self.inflation = factors.inflation;
        self.interest_rate = factors.interest_rate;
        self
    }
}

/// Build one feature row. The single code path for both training and prediction.
pub fn assemble(resolver: &NearestResolver, land: &LandAttributes, factors: MacroFactors) -> FeatureRow {
    let mut distances = [0.0; LandmarkCategory::COUNT];
    for category in LandmarkCategory::ALL {
        distances[category.index()] = resolver.distance(land.latitude, land.longitude, category);
    }

    let dist_transit = land.dist_transit.unwrap_or_else(|| {
        distances[LandmarkCategory::Mrt.index()].min(distances[LandmarkCategory::Bts.index()])
    });

    FeatureRow {
        land_size: land.land_size,
        dist_transit,
        latitude: land.latitude,
        longitude: land.longitude,
        distances,
        year: factors.year as f64,
        inflation: factors.inflation,
        interest_rate: factors.interest_rate,
    }
}

/// One labelled observation: a land in one finance year.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub land_id: i64,
    pub features: FeatureRow,
    pub land_price: f64,
}

impl TrainingRow {
    /// Values in `table_header()` order.
    pub fn record(&self) -> Vec<f64> {
        let mut values = self.features.values().to_vec();
        values.push(self.land_price);
        values
    }
}

/// One row per (land, finance year). Lands without finance history are skipped;
/// an empty result is left for the caller to reject.
pub fn build_training_rows<S: PropertyStore + ?Sized>(store: &S) -> Vec<TrainingRow> {
    let resolver = NearestResolver::from_store(store);
    let mut rows = Vec::new();

    for land in store.lands() {
        let finance = store.finance_for(land.id);
        if finance.is_empty() {
            tracing::debug!(land_id = land.id, "skipping land without finance history");
            continue;
        }

        let attrs = LandAttributes::from(&land);
        // distances only depend on the land, so compute them once per land
        let base = assemble(&resolver, &attrs, MacroFactors::from(&finance[0]));
        for record in &finance {
            rows.push(TrainingRow {
                land_id: land.id,
                features: base.with_macro(MacroFactors::from(record)),
                land_price: record.land_price,
            });
        }
    }

    rows
}
