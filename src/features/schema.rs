//! Feature schema resolution.
//!
//! A loaded regressor expects an exact, ordered set of input columns. Two
//! schema families exist and are not interchangeable:
//!
//! - **Categorical**: one-hot team identity columns (`home_team_<name>`,
//!   `away_team_<name>`) taken verbatim from the model's embedded feature list.
//! - **Aggregate**: a dense, fixed set of eight match-aggregate statistics.
//!
//! The family is picked once per model load, by inspecting the home model's
//! embedded feature names (or forced through [`SchemaPolicy`]).

use clap::ValueEnum;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// The eight aggregate statistics, in canonical column order.
pub const AGGREGATE_FEATURES: [&str; 8] = [
    "home_matches_played",
    "home_goals_for",
    "home_goals_against",
    "home_goals_diff",
    "away_matches_played",
    "away_goals_for",
    "away_goals_against",
    "away_goals_diff",
];

/// Prefix of the one-hot home team columns produced at training time.
pub const HOME_TEAM_PREFIX: &str = "home_team_";
/// Prefix of the one-hot away team columns produced at training time.
pub const AWAY_TEAM_PREFIX: &str = "away_team_";

/// How the schema family is selected at load time.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaPolicy {
    /// Aggregate when the embedded names are exactly the eight statistics,
    /// categorical otherwise.
    Auto,
    Categorical,
    Aggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Categorical,
    Aggregate,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::Categorical => "categorical",
            SchemaKind::Aggregate => "aggregate",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("model feature names are empty; re-train the models with feature metadata")]
    Unavailable,
    #[error("model features are missing aggregate column(s): {}", .0.join(", "))]
    MissingAggregateColumns(Vec<String>),
}

/// The resolved, ordered feature set a model expects.
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    kind: SchemaKind,
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl FeatureSchema {
    fn new(kind: SchemaKind, names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        FeatureSchema { kind, names, index }
    }

    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Build a dense vector in schema order from sparse `(name, value)` pairs.
    ///
    /// Names absent from the schema are dropped; schema columns not supplied
    /// are zero-filled. Later pairs overwrite earlier ones.
    pub fn reindex<'a, I>(&self, sparse: I) -> Vec<f32>
    where
        I: IntoIterator<Item = (&'a str, f32)>,
    {
        let mut dense = vec![0.0f32; self.names.len()];
        for (name, value) in sparse {
            if let Some(&i) = self.index.get(name) {
                dense[i] = value;
            }
        }
        dense
    }
}

/// Resolve the feature schema from the home model's embedded feature names.
pub fn resolve(policy: SchemaPolicy, embedded: &[String]) -> Result<FeatureSchema, SchemaError> {
    match policy {
        SchemaPolicy::Categorical => categorical(embedded),
        SchemaPolicy::Aggregate => aggregate(embedded),
        SchemaPolicy::Auto => {
            if embedded.is_empty() {
                Err(SchemaError::Unavailable)
            } else if is_exact_aggregate_set(embedded) {
                aggregate(embedded)
            } else {
                categorical(embedded)
            }
        }
    }
}

fn categorical(embedded: &[String]) -> Result<FeatureSchema, SchemaError> {
    if embedded.is_empty() {
        return Err(SchemaError::Unavailable);
    }
    Ok(FeatureSchema::new(SchemaKind::Categorical, embedded.to_vec()))
}

fn aggregate(embedded: &[String]) -> Result<FeatureSchema, SchemaError> {
    if embedded.is_empty() {
        let names = AGGREGATE_FEATURES.iter().map(|s| s.to_string()).collect();
        return Ok(FeatureSchema::new(SchemaKind::Aggregate, names));
    }
    let present: HashSet<&str> = embedded.iter().map(String::as_str).collect();
    let missing: Vec<String> = AGGREGATE_FEATURES
        .iter()
        .filter(|name| !present.contains(*name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingAggregateColumns(missing));
    }
    // Keep the model's own column order; the encoder reindexes by name.
    Ok(FeatureSchema::new(SchemaKind::Aggregate, embedded.to_vec()))
}

fn is_exact_aggregate_set(embedded: &[String]) -> bool {
    if embedded.len() != AGGREGATE_FEATURES.len() {
        return false;
    }
    let present: HashSet<&str> = embedded.iter().map(String::as_str).collect();
    present.len() == AGGREGATE_FEATURES.len()
        && AGGREGATE_FEATURES.iter().all(|name| present.contains(name))
}
