//! Request-row → feature-vector encoding.
//!
//! [`FeatureEncoder`] is selected from the resolved [`FeatureSchema`] so the
//! HTTP layer never needs to know which schema family the loaded models use.

use serde_json::{Map, Value};
use thiserror::Error;

use super::schema::{FeatureSchema, SchemaKind, AGGREGATE_FEATURES, AWAY_TEAM_PREFIX, HOME_TEAM_PREFIX};
use super::FeatureMatrix;

/// Client-side input problems. All of these are rejected with HTTP 400.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EncodeError {
    #[error("request row must be a JSON object")]
    NotAnObject,
    #[error("missing required field(s): {}", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("field '{field}' {reason}")]
    InvalidField { field: String, reason: String },
    #[error("batch must contain at least one item")]
    EmptyBatch,
    #[error("items[{index}]: {source}")]
    InBatch {
        index: usize,
        #[source]
        source: Box<EncodeError>,
    },
}

/// Encodes a single request row into a dense vector in schema order.
pub trait RowEncoder {
    fn encode_row(&self, row: &Value) -> Result<Vec<f32>, EncodeError>;
}

/// One-hot team identity encoder.
#[derive(Debug, Clone)]
pub struct CategoricalEncoder {
    schema: FeatureSchema,
}

impl CategoricalEncoder {
    pub fn new(schema: FeatureSchema) -> Self {
        CategoricalEncoder { schema }
    }

    /// Encode a `(home_team, away_team)` pair.
    ///
    /// A team unseen during training has no column, so its slot simply stays
    /// zero and the model falls back to its baseline for that side.
    pub fn encode_teams(&self, home_team: &str, away_team: &str) -> Vec<f32> {
        let home_key = format!("{HOME_TEAM_PREFIX}{home_team}");
        let away_key = format!("{AWAY_TEAM_PREFIX}{away_team}");
        self.schema
            .reindex([(home_key.as_str(), 1.0), (away_key.as_str(), 1.0)])
    }
}

impl RowEncoder for CategoricalEncoder {
    fn encode_row(&self, row: &Value) -> Result<Vec<f32>, EncodeError> {
        let obj = row.as_object().ok_or(EncodeError::NotAnObject)?;
        let missing: Vec<String> = ["home_team", "away_team"]
            .iter()
            .filter(|f| !obj.contains_key(**f))
            .map(|f| f.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(EncodeError::MissingFields(missing));
        }
        let home = team_name(obj, "home_team")?;
        let away = team_name(obj, "away_team")?;
        Ok(self.encode_teams(home, away))
    }
}

fn team_name<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a str, EncodeError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| EncodeError::InvalidField {
            field: field.to_string(),
            reason: "must be a string".into(),
        })
}

/// Dense match-aggregate encoder. Every field is mandatory; nothing is
/// zero-filled.
#[derive(Debug, Clone)]
pub struct AggregateEncoder {
    schema: FeatureSchema,
}

impl AggregateEncoder {
    pub fn new(schema: FeatureSchema) -> Self {
        AggregateEncoder { schema }
    }
}

/// Goal difference may be negative; every other aggregate is a count.
fn is_signed(field: &str) -> bool {
    field.ends_with("_goals_diff")
}

impl RowEncoder for AggregateEncoder {
    fn encode_row(&self, row: &Value) -> Result<Vec<f32>, EncodeError> {
        let obj = row.as_object().ok_or(EncodeError::NotAnObject)?;

        let missing: Vec<String> = AGGREGATE_FEATURES
            .iter()
            .filter(|f| !obj.contains_key(**f))
            .map(|f| f.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(EncodeError::MissingFields(missing));
        }

        let mut values = Vec::with_capacity(AGGREGATE_FEATURES.len());
        for field in AGGREGATE_FEATURES {
            let value = obj.get(field).and_then(Value::as_f64).ok_or_else(|| {
                EncodeError::InvalidField {
                    field: field.to_string(),
                    reason: "must be a number".into(),
                }
            })?;
            if !is_signed(field) && value < 0.0 {
                return Err(EncodeError::InvalidField {
                    field: field.to_string(),
                    reason: "must be greater than or equal to 0".into(),
                });
            }
            values.push((field, value as f32));
        }
        Ok(self.schema.reindex(values))
    }
}

/// Schema-selected encoder.
#[derive(Debug, Clone)]
pub enum FeatureEncoder {
    Categorical(CategoricalEncoder),
    Aggregate(AggregateEncoder),
}

impl FeatureEncoder {
    pub fn for_schema(schema: &FeatureSchema) -> Self {
        match schema.kind() {
            SchemaKind::Categorical => {
                FeatureEncoder::Categorical(CategoricalEncoder::new(schema.clone()))
            }
            SchemaKind::Aggregate => FeatureEncoder::Aggregate(AggregateEncoder::new(schema.clone())),
        }
    }

    pub fn kind(&self) -> SchemaKind {
        match self {
            FeatureEncoder::Categorical(_) => SchemaKind::Categorical,
            FeatureEncoder::Aggregate(_) => SchemaKind::Aggregate,
        }
    }

    /// Number of columns each encoded row has.
    pub fn width(&self) -> usize {
        match self {
            FeatureEncoder::Categorical(e) => e.schema.names().len(),
            FeatureEncoder::Aggregate(e) => e.schema.names().len(),
        }
    }

    /// Encode exactly one row (single-prediction path).
    pub fn encode_one(&self, row: &Value) -> Result<FeatureMatrix, EncodeError> {
        let vector = self.encode_row(row)?;
        Ok(FeatureMatrix::from_rows(self.width(), vec![vector]))
    }

    /// Encode a batch, preserving request order. The first bad row fails the
    /// whole batch and is reported with its index.
    pub fn encode_batch(&self, rows: &[Value]) -> Result<FeatureMatrix, EncodeError> {
        if rows.is_empty() {
            return Err(EncodeError::EmptyBatch);
        }
        let vectors = rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                self.encode_row(row).map_err(|e| EncodeError::InBatch {
                    index,
                    source: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FeatureMatrix::from_rows(self.width(), vectors))
    }
}

impl RowEncoder for FeatureEncoder {
    fn encode_row(&self, row: &Value) -> Result<Vec<f32>, EncodeError> {
        match self {
            FeatureEncoder::Categorical(e) => e.encode_row(row),
            FeatureEncoder::Aggregate(e) => e.encode_row(row),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::schema::{resolve, SchemaPolicy};
    use serde_json::json;

    fn categorical() -> FeatureEncoder {
        let names: Vec<String> = [
            "home_team_Arsenal",
            "home_team_Chelsea",
            "away_team_Arsenal",
            "away_team_Chelsea",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        FeatureEncoder::for_schema(&resolve(SchemaPolicy::Auto, &names).unwrap())
    }

    fn aggregate() -> FeatureEncoder {
        FeatureEncoder::for_schema(&resolve(SchemaPolicy::Aggregate, &[]).unwrap())
    }

    fn full_row() -> Value {
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

    #[test]
    fn one_hot_sets_both_known_teams() {
        let enc = categorical();
        let v = enc
            .encode_row(&json!({"home_team": "Chelsea", "away_team": "Arsenal"}))
            .unwrap();
        assert_eq!(v, vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn unseen_team_contributes_nothing() {
        let enc = categorical();
        let v = enc
            .encode_row(&json!({"home_team": "Wrexham", "away_team": "Chelsea"}))
            .unwrap();
        assert_eq!(v, vec![0.0, 0.0, 0.0, 1.0]);

        let v = enc
            .encode_row(&json!({"home_team": "Wrexham", "away_team": "Luton"}))
            .unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn categorical_requires_string_teams() {
        let enc = categorical();
        let err = enc.encode_row(&json!({"home_team": "Chelsea"})).unwrap_err();
        assert_eq!(err, EncodeError::MissingFields(vec!["away_team".into()]));

        let err = enc
            .encode_row(&json!({"home_team": 3, "away_team": "Chelsea"}))
            .unwrap_err();
        assert!(matches!(err, EncodeError::InvalidField { ref field, .. } if field == "home_team"));
    }

    #[test]
    fn aggregate_encodes_in_schema_order() {
        let v = aggregate().encode_row(&full_row()).unwrap();
        assert_eq!(v, vec![10.0, 15.0, 8.0, 7.0, 10.0, 9.0, 12.0, -3.0]);
    }

    #[test]
    fn aggregate_follows_model_column_order() {
        let mut names: Vec<String> = AGGREGATE_FEATURES.iter().map(|s| s.to_string()).collect();
        names.reverse();
        let enc = FeatureEncoder::for_schema(&resolve(SchemaPolicy::Auto, &names).unwrap());
        let v = enc.encode_row(&full_row()).unwrap();
        assert_eq!(v, vec![-3.0, 12.0, 9.0, 10.0, 7.0, 8.0, 15.0, 10.0]);
    }

    #[test]
    fn each_missing_field_is_named_exactly() {
        let enc = aggregate();
        for field in AGGREGATE_FEATURES {
            let mut row = full_row();
            row.as_object_mut().unwrap().remove(field);
            let err = enc.encode_row(&row).unwrap_err();
            assert_eq!(err, EncodeError::MissingFields(vec![field.to_string()]));
            assert!(err.to_string().ends_with(field));
        }
    }

    #[test]
    fn all_missing_fields_are_listed_in_canonical_order() {
        let err = aggregate().encode_row(&json!({"home_goals_for": 1})).unwrap_err();
        match err {
            EncodeError::MissingFields(fields) => {
                assert_eq!(fields.len(), 7);
                assert_eq!(fields[0], "home_matches_played");
                assert_eq!(fields[6], "away_goals_diff");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn negative_counts_are_rejected_but_diffs_are_not() {
        let enc = aggregate();
        let mut row = full_row();
        row["away_goals_against"] = json!(-1);
        let err = enc.encode_row(&row).unwrap_err();
        assert!(err.to_string().contains("away_goals_against"));

        let mut row = full_row();
        row["home_goals_diff"] = json!(-20);
        assert!(enc.encode_row(&row).is_ok());
    }

    #[test]
    fn non_numeric_aggregate_is_rejected() {
        let mut row = full_row();
        row["home_goals_for"] = json!("lots");
        let err = aggregate().encode_row(&row).unwrap_err();
        assert_eq!(err.to_string(), "field 'home_goals_for' must be a number");
    }

    #[test]
    fn batch_preserves_order_and_reports_index() {
        let enc = aggregate();
        let mut second = full_row();
        second["home_matches_played"] = json!(20);
        let m = enc.encode_batch(&[full_row(), second.clone()]).unwrap();
        assert_eq!(m.n_rows(), 2);
        assert_eq!(m.row(0)[0], 10.0);
        assert_eq!(m.row(1)[0], 20.0);

        second.as_object_mut().unwrap().remove("away_goals_for");
        let err = enc.encode_batch(&[full_row(), second]).unwrap_err();
        assert_eq!(err.to_string(), "items[1]: missing required field(s): away_goals_for");
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert_eq!(aggregate().encode_batch(&[]).unwrap_err(), EncodeError::EmptyBatch);
    }

    #[test]
    fn non_object_rows_are_rejected() {
        assert_eq!(aggregate().encode_row(&json!([1, 2])).unwrap_err(), EncodeError::NotAnObject);
        assert_eq!(categorical().kind(), SchemaKind::Categorical);
    }
}
