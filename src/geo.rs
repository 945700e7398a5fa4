//! Great-circle distance and nearest-landmark lookups.
//!
//! The resolver scans every landmark of a category, which is fine for the
//! hundreds of landmarks a city dataset holds. A grid or k-d tree index would
//! slot in behind [`NearestResolver::distance`] if that ever changes.

use serde::Serialize;
use std::collections::HashMap;

use crate::store::{Landmark, LandmarkCategory, PropertyStore};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres between two (lat, lon) points given in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Serialize)]
pub struct LandmarkDistance {
    pub id: i64,
    pub category: LandmarkCategory,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
}

/// Landmarks grouped by category, loaded once per normalization or prediction pass.
#[derive(Debug, Default)]
pub struct NearestResolver {
    by_category: HashMap<LandmarkCategory, Vec<Landmark>>,
}

impl NearestResolver {
    pub fn from_store<S: PropertyStore + ?Sized>(store: &S) -> Self {
        let by_category = LandmarkCategory::ALL
            .into_iter()
            .map(|c| (c, store.landmarks_by_category(c)))
            .filter(|(_, lms)| !lms.is_empty())
            .collect();
        Self { by_category }
    }

    fn nearest_raw(&self, lat: f64, lon: f64, category: LandmarkCategory) -> Option<f64> {
        self.by_category
            .get(&category)?
            .iter()
            .map(|lm| haversine_km(lat, lon, lm.latitude, lm.longitude))
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Feature distance to the nearest landmark of `category`, rounded to 4 decimals.
    ///
    /// An empty category yields `0.0`, which cannot be told apart from a
    /// colocated landmark. See DESIGN.md.
    pub fn distance(&self, lat: f64, lon: f64, category: LandmarkCategory) -> f64 {
        match self.nearest_raw(lat, lon, category) {
            Some(d) => round_to(d, 4),
            None => 0.0,
        }
    }

    /// Reporting view: `None` for categories without landmarks, 3 decimals otherwise.
    pub fn nearest_by_category(&self, lat: f64, lon: f64) -> Vec<(LandmarkCategory, Option<f64>)> {
        LandmarkCategory::ALL
            .into_iter()
            .map(|c| (c, self.nearest_raw(lat, lon, c).map(|d| round_to(d, 3))))
            .collect()
    }

    /// The `k` closest landmarks of any category, ascending by distance.
    pub fn closest(&self, lat: f64, lon: f64, k: usize) -> Vec<LandmarkDistance> {
        let mut all: Vec<LandmarkDistance> = self
            .by_category
            .values()
            .flatten()
            .map(|lm| LandmarkDistance {
                id: lm.id,
                category: lm.category,
                name: lm.name.clone(),
                latitude: lm.latitude,
                longitude: lm.longitude,
                distance_km: round_to(haversine_km(lat, lon, lm.latitude, lm.longitude), 3),
            })
            .collect();
        all.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km).then(a.id.cmp(&b.id)));
        all.truncate(k);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const BANGKOK: (f64, f64) = (13.7563, 100.5018);
    const CHIANG_MAI: (f64, f64) = (18.7883, 98.9853);

    // Point `km` kilometres due north of (lat, lon).
    fn north_of(lat: f64, lon: f64, km: f64) -> (f64, f64) {
        (lat + (km / EARTH_RADIUS_KM).to_degrees(), lon)
    }

    #[test]
    fn haversine_is_zero_for_same_point() {
        assert_eq!(haversine_km(BANGKOK.0, BANGKOK.1, BANGKOK.0, BANGKOK.1), 0.0);
    }

    #[test]
    fn haversine_is_symmetric() {
        let ab = haversine_km(BANGKOK.0, BANGKOK.1, CHIANG_MAI.0, CHIANG_MAI.1);
        let ba = haversine_km(CHIANG_MAI.0, CHIANG_MAI.1, BANGKOK.0, BANGKOK.1);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn bangkok_to_chiang_mai() {
        let d = haversine_km(BANGKOK.0, BANGKOK.1, CHIANG_MAI.0, CHIANG_MAI.1);
        assert!((d - 585.0).abs() <= 5.0, "got {d}");
    }

    #[test]
    fn nearest_picks_minimum_distance() {
        let mut store = MemoryStore::new();
        for km in [3.1, 1.2, 5.0] {
            let (lat, lon) = north_of(BANGKOK.0, BANGKOK.1, km);
            store.insert_landmark(LandmarkCategory::Mrt, "station", lat, lon);
        }
        let resolver = NearestResolver::from_store(&store);
        assert_eq!(resolver.distance(BANGKOK.0, BANGKOK.1, LandmarkCategory::Mrt), 1.2);
    }

    #[test]
    fn empty_category_is_zero_distance() {
        let mut store = MemoryStore::new();
        store.insert_landmark(LandmarkCategory::Bts, "Siam", 13.7456, 100.5341);
        let resolver = NearestResolver::from_store(&store);
        assert_eq!(resolver.distance(BANGKOK.0, BANGKOK.1, LandmarkCategory::Condo), 0.0);

        let report = resolver.nearest_by_category(BANGKOK.0, BANGKOK.1);
        assert_eq!(report.len(), LandmarkCategory::ALL.len());
        assert_eq!(report[4], (LandmarkCategory::Condo, None));
        assert!(report[1].1.is_some());
    }

    #[test]
    fn closest_returns_k_sorted() {
        let mut store = MemoryStore::new();
        for (i, km) in [4.0, 0.5, 2.0, 8.0].into_iter().enumerate() {
            let (lat, lon) = north_of(BANGKOK.0, BANGKOK.1, km);
            let cat = LandmarkCategory::ALL[i % LandmarkCategory::ALL.len()];
            store.insert_landmark(cat, &format!("lm{i}"), lat, lon);
        }
        let resolver = NearestResolver::from_store(&store);
        let top = resolver.closest(BANGKOK.0, BANGKOK.1, 3);
        let names: Vec<&str> = top.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["lm1", "lm2", "lm0"]);
    }
}
