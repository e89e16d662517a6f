//! Prediction engine: encode → run both regressors over the whole batch →
//! derive the match outcome per row.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::features::{EncodeError, FeatureMatrix, SchemaError, SchemaKind};
use crate::model::{ModelSide, ModelStore, StoreError};

/// Three-way match outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    #[serde(rename = "Home Win")]
    HomeWin,
    #[serde(rename = "Away Win")]
    AwayWin,
    #[serde(rename = "Draw")]
    Draw,
}

impl Outcome {
    /// Strict comparison of the two goal predictions.
    ///
    /// Equality is exact floating-point equality with no tolerance: only
    /// bit-identical predictions are a Draw. Two independently trained
    /// regressors rarely agree exactly, so draws are uncommon, and any
    /// change to the arithmetic path (f32 vs f64, rounding) shifts which
    /// pairs tie.
    pub fn from_goals(home: f64, away: f64) -> Self {
        if home > away {
            Outcome::HomeWin
        } else if home < away {
            Outcome::AwayWin
        } else {
            Outcome::Draw
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionResult {
    pub pred_home_goals: f64,
    pub pred_away_goals: f64,
    pub predicted_result: Outcome,
}

impl PredictionResult {
    /// Build a result from raw regressor output. Goal counts are clamped at
    /// zero and rounded before the outcome is derived, so the outcome always
    /// agrees with the numbers returned to the client.
    pub fn from_raw(home: f64, away: f64, round_digits: Option<u32>) -> Self {
        let home = round_to(home.max(0.0), round_digits);
        let away = round_to(away.max(0.0), round_digits);
        PredictionResult {
            pred_home_goals: home,
            pred_away_goals: away,
            predicted_result: Outcome::from_goals(home, away),
        }
    }
}

fn round_to(value: f64, digits: Option<u32>) -> f64 {
    match digits {
        Some(d) => {
            let scale = 10f64.powi(d as i32);
            (value * scale).round() / scale
        }
        None => value,
    }
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Request rows, in the shape the endpoint received them.
#[derive(Debug, Clone, Copy)]
pub enum Rows<'a> {
    One(&'a Value),
    Many(&'a [Value]),
}

pub struct Predictor {
    store: Arc<ModelStore>,
    round_digits: Option<u32>,
}

impl Predictor {
    pub fn new(store: Arc<ModelStore>, round_digits: Option<u32>) -> Self {
        Predictor {
            store,
            round_digits,
        }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Predict every row, returning results in input order. Any bad row
    /// fails the whole call.
    pub async fn predict(&self, rows: Rows<'_>) -> Result<Vec<PredictionResult>, PredictError> {
        let (_, results) = self.predict_with_schema(rows).await?;
        Ok(results)
    }

    /// Like [`Predictor::predict`], also returning the schema the rows were
    /// encoded with.
    pub async fn predict_with_schema(
        &self,
        rows: Rows<'_>,
    ) -> Result<(SchemaKind, Vec<PredictionResult>), PredictError> {
        let models = self.store.ensure_loaded().await?;
        let encoder = models.encoder()?;
        let matrix = match rows {
            Rows::One(row) => encoder.encode_one(row)?,
            Rows::Many(rows) => encoder.encode_batch(rows)?,
        };
        Ok((encoder.kind(), self.predict_matrix(&matrix)?))
    }

    /// Run both regressors over the same encoded matrix.
    pub fn predict_matrix(&self, matrix: &FeatureMatrix) -> Result<Vec<PredictionResult>, PredictError> {
        let home = self.store.predict(ModelSide::Home, matrix)?;
        let away = self.store.predict(ModelSide::Away, matrix)?;
        debug!("Predicted {} row(s)", matrix.n_rows());
        Ok(home
            .into_iter()
            .zip(away)
            .map(|(h, a)| PredictionResult::from_raw(h, a, self.round_digits))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadPolicy;
    use crate::features::SchemaPolicy;
    use crate::model::fixtures;
    use approx::assert_relative_eq;
    use serde_json::json;

    const AGGREGATES: [&str; 8] = crate::features::schema::AGGREGATE_FEATURES;

    fn example_row() -> Value {
        json!({
            "home_matches_played": 10,
            "home_goals_for": 15,
            "home_goals_against": 8,
            "home_goals_diff": 7,
            "away_matches_played": 10,
            "away_goals_for": 9,
            "away_goals_against": 12,
            "away_goals_diff": -3
        })
    }

    async fn predictor_with(home: &[u8], away: &[u8], round_digits: Option<u32>) -> (Predictor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_pair(dir.path(), home, away);
        let store = Arc::new(ModelStore::new(dir.path(), LoadPolicy::Eager, SchemaPolicy::Auto));
        store.load().await.unwrap();
        (Predictor::new(store, round_digits), dir)
    }

    #[test]
    fn outcome_uses_strict_comparison() {
        assert_eq!(Outcome::from_goals(2.0, 1.0), Outcome::HomeWin);
        assert_eq!(Outcome::from_goals(0.9, 1.0), Outcome::AwayWin);
        assert_eq!(Outcome::from_goals(1.25, 1.25), Outcome::Draw);
        // No epsilon: the smallest representable gap is still decisive.
        let a = 1.0f64;
        let b = f64::from_bits(a.to_bits() + 1);
        assert_eq!(Outcome::from_goals(b, a), Outcome::HomeWin);
    }

    #[test]
    fn outcome_serializes_as_display_label() {
        assert_eq!(serde_json::to_value(Outcome::AwayWin).unwrap(), json!("Away Win"));
        assert_eq!(serde_json::to_value(Outcome::Draw).unwrap(), json!("Draw"));
    }

    #[test]
    fn results_are_clamped_and_rounding_is_applied_before_outcome() {
        let r = PredictionResult::from_raw(-0.2, 0.0, None);
        assert_eq!(r.pred_home_goals, 0.0);
        assert_eq!(r.predicted_result, Outcome::Draw);

        let r = PredictionResult::from_raw(1.23449, 1.23451, Some(3));
        assert_relative_eq!(r.pred_home_goals, 1.234, epsilon = 1e-12);
        assert_relative_eq!(r.pred_away_goals, 1.235, epsilon = 1e-12);
        assert_eq!(r.predicted_result, Outcome::AwayWin);

        let r = PredictionResult::from_raw(1.00001, 1.00002, Some(2));
        assert_eq!(r.predicted_result, Outcome::Draw);
    }

    #[tokio::test]
    async fn constant_stub_models_give_home_win() {
        let (predictor, _dir) = predictor_with(
            &fixtures::constant_model(2.0, &AGGREGATES),
            &fixtures::constant_model(1.0, &AGGREGATES),
            None,
        )
        .await;
        let row = example_row();
        let results = predictor.predict(Rows::One(&row)).await.unwrap();
        assert_eq!(
            results,
            vec![PredictionResult {
                pred_home_goals: 2.0,
                pred_away_goals: 1.0,
                predicted_result: Outcome::HomeWin,
            }]
        );
    }

    #[tokio::test]
    async fn batch_matches_single_and_keeps_order() {
        // Home goals depend on home_goals_for (column 1).
        let (predictor, _dir) = predictor_with(
            &fixtures::stump_model(1.0, &AGGREGATES, 1, 12.0, 0.0, 1.0),
            &fixtures::constant_model(1.5, &AGGREGATES),
            None,
        )
        .await;
        let x = example_row();
        let mut y = example_row();
        y["home_goals_for"] = json!(3);
        let z = example_row();

        let single = predictor.predict(Rows::One(&x)).await.unwrap();
        let batch = predictor
            .predict(Rows::Many(&[x.clone(), y, z]))
            .await
            .unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(single[0], batch[0]);
        assert_eq!(batch[0].predicted_result, Outcome::HomeWin);
        assert_eq!(batch[1].pred_home_goals, 1.0);
        assert_eq!(batch[1].predicted_result, Outcome::AwayWin);
        assert_eq!(batch[2], batch[0]);
    }

    #[tokio::test]
    async fn identical_requests_give_identical_results() {
        let (predictor, _dir) = predictor_with(
            &fixtures::stump_model(0.7, &AGGREGATES, 5, 10.0, 0.3, 0.9),
            &fixtures::stump_model(0.4, &AGGREGATES, 0, 5.0, 0.1, 0.6),
            Some(3),
        )
        .await;
        let row = example_row();
        let first = predictor.predict(Rows::One(&row)).await.unwrap();
        let second = predictor.predict(Rows::One(&row)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn lazy_prediction_reports_schema_after_a_single_load() {
        let teams = ["home_team_Arsenal", "away_team_Chelsea"];
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_pair(
            dir.path(),
            &fixtures::constant_model(1.0, &teams),
            &fixtures::constant_model(1.5, &teams),
        );
        let store = Arc::new(ModelStore::new(dir.path(), LoadPolicy::Lazy, SchemaPolicy::Auto));
        let predictor = Predictor::new(store.clone(), None);

        let row = json!({"home_team": "Arsenal", "away_team": "Chelsea"});
        let (kind, results) = predictor.predict_with_schema(Rows::One(&row)).await.unwrap();
        assert_eq!(kind, SchemaKind::Categorical);
        assert_eq!(results[0].predicted_result, Outcome::AwayWin);
        assert_eq!(store.status().await.load_attempts, 1);
    }

    #[tokio::test]
    async fn unready_store_is_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ModelStore::new(dir.path(), LoadPolicy::Eager, SchemaPolicy::Auto));
        let predictor = Predictor::new(store, None);
        let row = example_row();
        let err = predictor.predict(Rows::One(&row)).await.unwrap_err();
        assert!(matches!(err, PredictError::Store(StoreError::NotReady)));
    }

    #[tokio::test]
    async fn encoding_errors_propagate() {
        let (predictor, _dir) = predictor_with(
            &fixtures::constant_model(2.0, &AGGREGATES),
            &fixtures::constant_model(1.0, &AGGREGATES),
            None,
        )
        .await;
        let mut row = example_row();
        row.as_object_mut().unwrap().remove("away_goals_diff");
        let err = predictor.predict(Rows::One(&row)).await.unwrap_err();
        assert!(matches!(err, PredictError::Encode(EncodeError::MissingFields(_))));
    }
}
