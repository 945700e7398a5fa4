// Price prediction for parcels that are not in the store. Rows are assembled
// exactly as during normalization, then reordered to the model's own schema.
use serde::Serialize;

use crate::config::ForecastConfig;
use crate::error::{Result, ValuationError};
use crate::features::{assemble, FeatureRow, LandAttributes, MacroFactors};
use crate::geo::{round_to, NearestResolver};
use crate::model::{LinearPriceModel, ModelStore, Regressor};
use crate::store::PropertyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YearlyPrice {
    pub year: i32,
    pub price: i64,
}

pub struct Predictor<R> {
    model: R,
    resolver: NearestResolver,
}

impl Predictor<LinearPriceModel> {
    /// Load the persisted model; a missing artifact surfaces as "train first".
    pub fn load<S: PropertyStore + ?Sized>(models: &ModelStore, store: &S) -> Result<Self> {
        Ok(Self::new(models.load()?, NearestResolver::from_store(store)))
    }
}

impl<R: Regressor> Predictor<R> {
    pub fn new(model: R, resolver: NearestResolver) -> Self {
        Self { model, resolver }
    }

    pub fn model(&self) -> &R {
        &self.model
    }

    fn evaluate(&self, row: &FeatureRow) -> Result<f64> {
        let values = row
            .select(self.model.feature_names())
            .map_err(|missing| ValuationError::SchemaMismatch { missing })?;
        let price = self.model.predict_row(&values);
        if !price.is_finite() {
            return Err(ValuationError::InvalidInput(
                "model produced a non-finite prediction".into(),
            ));
        }
        Ok(price)
    }

    /// Single prediction with explicit macro factors, rounded to 2 decimals.
    pub fn predict(&self, land: &LandAttributes, factors: MacroFactors) -> Result<f64> {
        let row = assemble(&self.resolver, land, factors);
        Ok(round_to(self.evaluate(&row)?, 2))
    }

    /// One prediction per year `1..=forecast.years`, rounded to whole units.
    /// Inflation and interest rate stay at the configured constants.
    pub fn predict_years(&self, land: &LandAttributes, forecast: &ForecastConfig) -> Result<Vec<YearlyPrice>> {
        let base = assemble(
            &self.resolver,
            land,
            MacroFactors {
                year: 1,
                inflation: forecast.inflation,
                interest_rate: forecast.interest_rate,
            },
        );

        (1..=forecast.years as i32)
            .map(|year| {
                let row = base.with_macro(MacroFactors {
                    year,
                    inflation: forecast.inflation,
                    interest_rate: forecast.interest_rate,
                });
                Ok(YearlyPrice {
                    year,
                    price: self.evaluate(&row)?.round() as i64,
                })
            })
            .collect()
    }
}
