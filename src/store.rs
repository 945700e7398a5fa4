// Land, landmark and finance records plus the store the pipeline queries.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ValuationError};

/// Landmark category. Declaration order is the feature column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LandmarkCategory {
    #[serde(rename = "MRT")]
    Mrt,
    #[serde(rename = "BTS")]
    Bts,
    #[serde(rename = "CBD")]
    Cbd,
    Office,
    Condo,
    Tourist,
}

impl LandmarkCategory {
    pub const COUNT: usize = 6;

    pub const ALL: [LandmarkCategory; Self::COUNT] = [
        LandmarkCategory::Mrt,
        LandmarkCategory::Bts,
        LandmarkCategory::Cbd,
        LandmarkCategory::Office,
        LandmarkCategory::Condo,
        LandmarkCategory::Tourist,
    ];

    /// Position in `ALL`, which is also the offset of its distance column.
    pub fn index(self) -> usize {
        match self {
            LandmarkCategory::Mrt => 0,
            LandmarkCategory::Bts => 1,
            LandmarkCategory::Cbd => 2,
            LandmarkCategory::Office => 3,
            LandmarkCategory::Condo => 4,
            LandmarkCategory::Tourist => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LandmarkCategory::Mrt => "MRT",
            LandmarkCategory::Bts => "BTS",
            LandmarkCategory::Cbd => "CBD",
            LandmarkCategory::Office => "Office",
            LandmarkCategory::Condo => "Condo",
            LandmarkCategory::Tourist => "Tourist",
        }
    }
}

impl fmt::Display for LandmarkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LandmarkCategory {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        LandmarkCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown landmark type: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Land {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub land_size: f64,
    /// Precomputed transit distance; derived from MRT/BTS when absent.
    pub dist_transit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: i64,
    pub category: LandmarkCategory,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandFinance {
    pub id: i64,
    pub land_id: i64,
    pub year: i32,
    pub land_price: f64,
    pub inflation: f64,
    pub interest_rate: f64,
}

/// Read side of the land/landmark/finance store consumed by the pipeline.
pub trait PropertyStore {
    fn lands(&self) -> Vec<Land>;
    fn land(&self, id: i64) -> Result<Land>;
    fn landmarks(&self) -> Vec<Landmark>;
    fn landmarks_by_category(&self, category: LandmarkCategory) -> Vec<Landmark>;
    /// Finance history of one land, ascending by year.
    fn finance_for(&self, land_id: i64) -> Vec<LandFinance>;
}

/// In-process store; ids are assigned sequentially from 1 on insert.
#[derive(Debug, Default)]
pub struct MemoryStore {
    lands: Vec<Land>,
    landmarks: Vec<Landmark>,
    finance: Vec<LandFinance>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_land(
        &mut self,
        name: &str,
        latitude: f64,
        longitude: f64,
        land_size: f64,
        dist_transit: Option<f64>,
    ) -> i64 {
        let id = self.lands.len() as i64 + 1;
        self.lands.push(Land {
            id,
            name: name.to_string(),
            latitude,
            longitude,
            land_size,
            dist_transit,
        });
        id
    }

    pub fn insert_landmark(
        &mut self,
        category: LandmarkCategory,
        name: &str,
        latitude: f64,
        longitude: f64,
    ) -> i64 {
        let id = self.landmarks.len() as i64 + 1;
        self.landmarks.push(Landmark {
            id,
            category,
            name: name.to_string(),
            latitude,
            longitude,
        });
        id
    }

    pub fn insert_finance(
        &mut self,
        land_id: i64,
        year: i32,
        land_price: f64,
        inflation: f64,
        interest_rate: f64,
    ) -> Result<i64> {
        // finance rows must reference an existing land
        self.land(land_id)?;
        let id = self.finance.len() as i64 + 1;
        self.finance.push(LandFinance {
            id,
            land_id,
            year,
            land_price,
            inflation,
            interest_rate,
        });
        Ok(id)
    }
}

impl PropertyStore for MemoryStore {
    fn lands(&self) -> Vec<Land> {
        self.lands.clone()
    }

    fn land(&self, id: i64) -> Result<Land> {
        self.lands
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or(ValuationError::NotFound { entity: "land", id })
    }

    fn landmarks(&self) -> Vec<Landmark> {
        self.landmarks.clone()
    }

    fn landmarks_by_category(&self, category: LandmarkCategory) -> Vec<Landmark> {
        self.landmarks
            .iter()
            .filter(|lm| lm.category == category)
            .cloned()
            .collect()
    }

    fn finance_for(&self, land_id: i64) -> Vec<LandFinance> {
        let mut rows: Vec<LandFinance> = self
            .finance
            .iter()
            .filter(|f| f.land_id == land_id)
            .cloned()
            .collect();
        rows.sort_by_key(|f| f.year);
        rows
    }
}
