//! Native evaluation of XGBoost JSON tree ensembles.
//!
//! The training job saves each regressor with `save_model("*.json")`, which
//! produces the XGBoost JSON document format. Only the pieces needed for
//! inference are decoded: the embedded feature names, `base_score`, the
//! objective (for the link function) and the per-tree node arrays.
//!
//! Node semantics follow XGBoost:
//! - a node is a leaf when `left_children[i] == -1`; its value lives in
//!   `split_conditions[i]`
//! - otherwise go left when `x[split_indices[i]] < split_conditions[i]`,
//!   and follow `default_left[i]` when the value is missing (NaN)

use serde::Deserialize;
use thiserror::Error;

use super::Regressor;
use crate::features::FeatureMatrix;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid model JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported model: {0}")]
    Unsupported(String),
    #[error("malformed model: {0}")]
    Malformed(String),
}

// ── JSON document layout ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ModelDoc {
    learner: LearnerDoc,
}

#[derive(Deserialize)]
struct LearnerDoc {
    #[serde(default)]
    feature_names: Vec<String>,
    gradient_booster: BoosterDoc,
    learner_model_param: LearnerParamDoc,
    objective: ObjectiveDoc,
}

#[derive(Deserialize)]
struct BoosterDoc {
    name: String,
    #[serde(default)]
    model: Option<GbTreeDoc>,
}

#[derive(Deserialize)]
struct GbTreeDoc {
    #[serde(default)]
    trees: Vec<TreeDoc>,
    #[serde(default)]
    tree_info: Vec<i64>,
}

#[derive(Deserialize)]
struct LearnerParamDoc {
    base_score: NumberLike,
    #[serde(default)]
    num_class: Option<NumberLike>,
    #[serde(default)]
    num_feature: Option<NumberLike>,
    #[serde(default)]
    num_target: Option<NumberLike>,
}

#[derive(Deserialize)]
struct ObjectiveDoc {
    name: String,
}

#[derive(Deserialize)]
struct TreeDoc {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<i64>,
    split_conditions: Vec<f32>,
    default_left: Vec<Flag>,
    #[serde(default)]
    split_type: Vec<i32>,
}

/// XGBoost writes learner params as strings (`"5E-1"`, `"[5E-1]"` since 2.1)
/// but older tooling emits bare numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Num(f64),
    Str(String),
}

impl NumberLike {
    fn parse(&self, what: &str) -> Result<f64, DecodeError> {
        match self {
            NumberLike::Num(v) => Ok(*v),
            NumberLike::Str(s) => {
                let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
                let first = trimmed.split(',').next().unwrap_or("").trim();
                first
                    .parse::<f64>()
                    .map_err(|_| DecodeError::Malformed(format!("{what} '{s}' is not a number")))
            }
        }
    }
}

/// `default_left` is a 0/1 integer array in older models and a bool array in
/// newer ones.
#[derive(Deserialize, Clone, Copy)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

// ── Evaluation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Identity,
    Log,
}

impl Link {
    fn for_objective(name: &str) -> Result<Self, DecodeError> {
        match name {
            "reg:squarederror" | "reg:linear" | "reg:absoluteerror" | "reg:pseudohubererror"
            | "reg:squaredlogerror" | "reg:quantileerror" => Ok(Link::Identity),
            "count:poisson" | "reg:gamma" | "reg:tweedie" => Ok(Link::Log),
            other => Err(DecodeError::Unsupported(format!(
                "objective '{other}' is not a regression objective"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct Tree {
    left: Vec<i32>,
    right: Vec<i32>,
    split_index: Vec<u32>,
    split_condition: Vec<f32>,
    default_left: Vec<bool>,
}

impl Tree {
    fn from_doc(id: usize, doc: TreeDoc) -> Result<Self, DecodeError> {
        let n = doc.left_children.len();
        if n == 0 {
            return Err(DecodeError::Malformed(format!("tree {id} has no nodes")));
        }
        let lengths = [
            doc.right_children.len(),
            doc.split_indices.len(),
            doc.split_conditions.len(),
            doc.default_left.len(),
        ];
        if lengths.iter().any(|&l| l != n) {
            return Err(DecodeError::Malformed(format!(
                "tree {id} node arrays have different lengths"
            )));
        }
        if doc.split_type.iter().any(|&t| t != 0) {
            return Err(DecodeError::Unsupported(format!(
                "tree {id} uses categorical splits"
            )));
        }

        let mut split_index = Vec::with_capacity(n);
        for (node, (&left, &right)) in doc.left_children.iter().zip(&doc.right_children).enumerate() {
            let raw_index = doc.split_indices[node];
            if left == -1 {
                split_index.push(0);
                continue;
            }
            // Children always carry larger ids than their parent, which also
            // guarantees traversal terminates.
            let in_range = |child: i32| child > node as i32 && (child as usize) < n;
            if !in_range(left) || !in_range(right) {
                return Err(DecodeError::Malformed(format!(
                    "tree {id} node {node} has out-of-range children"
                )));
            }
            let index = u32::try_from(raw_index).map_err(|_| {
                DecodeError::Malformed(format!("tree {id} node {node} has a negative split index"))
            })?;
            split_index.push(index);
        }

        Ok(Tree {
            left: doc.left_children,
            right: doc.right_children,
            split_index,
            split_condition: doc.split_conditions,
            default_left: doc.default_left.into_iter().map(Flag::is_set).collect(),
        })
    }

    fn leaf_value(&self, row: &[f32]) -> f32 {
        let mut node = 0usize;
        loop {
            let left = self.left[node];
            if left == -1 {
                return self.split_condition[node];
            }
            let value = row
                .get(self.split_index[node] as usize)
                .copied()
                .unwrap_or(f32::NAN);
            let go_left = if value.is_nan() {
                self.default_left[node]
            } else {
                value < self.split_condition[node]
            };
            let next = if go_left { left } else { self.right[node] };
            node = next as usize;
        }
    }

    fn max_split_index(&self) -> Option<u32> {
        self.left
            .iter()
            .zip(&self.split_index)
            .filter(|(l, _)| **l != -1)
            .map(|(_, i)| *i)
            .max()
    }
}

/// A gradient-boosted regression tree ensemble decoded from XGBoost JSON.
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    feature_names: Vec<String>,
    base_margin: f32,
    link: Link,
    trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn from_json(bytes: &[u8]) -> Result<Self, DecodeError> {
        let doc: ModelDoc = serde_json::from_slice(bytes)?;
        let learner = doc.learner;

        if learner.gradient_booster.name != "gbtree" {
            return Err(DecodeError::Unsupported(format!(
                "booster '{}' (only gbtree is supported)",
                learner.gradient_booster.name
            )));
        }
        let params = &learner.learner_model_param;
        if let Some(num_class) = &params.num_class {
            if num_class.parse("num_class")? > 1.0 {
                return Err(DecodeError::Unsupported("multi-class model".into()));
            }
        }
        if let Some(num_target) = &params.num_target {
            if num_target.parse("num_target")? > 1.0 {
                return Err(DecodeError::Unsupported("multi-target model".into()));
            }
        }

        let link = Link::for_objective(&learner.objective.name)?;
        let base_score = params.base_score.parse("base_score")?;
        let base_margin = match link {
            Link::Identity => base_score as f32,
            Link::Log => {
                if base_score <= 0.0 {
                    return Err(DecodeError::Malformed(format!(
                        "base_score {base_score} must be positive for a log-link objective"
                    )));
                }
                base_score.ln() as f32
            }
        };

        let gbtree = learner.gradient_booster.model.unwrap_or(GbTreeDoc {
            trees: Vec::new(),
            tree_info: Vec::new(),
        });
        if gbtree.tree_info.iter().any(|&group| group != 0) {
            return Err(DecodeError::Unsupported("multiple output groups".into()));
        }
        let trees = gbtree
            .trees
            .into_iter()
            .enumerate()
            .map(|(id, t)| Tree::from_doc(id, t))
            .collect::<Result<Vec<_>, _>>()?;

        let declared_features = match &params.num_feature {
            Some(n) => Some(n.parse("num_feature")? as usize),
            None => None,
        };
        let width = if learner.feature_names.is_empty() {
            declared_features
        } else {
            Some(learner.feature_names.len())
        };
        if let Some(width) = width {
            let max_index = trees.iter().filter_map(Tree::max_split_index).max();
            if let Some(max_index) = max_index {
                if max_index as usize >= width {
                    return Err(DecodeError::Malformed(format!(
                        "split on feature {max_index} but the model has {width} features"
                    )));
                }
            }
        }

        Ok(TreeEnsemble {
            feature_names: learner.feature_names,
            base_margin,
            link,
            trees,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn predict_row(&self, row: &[f32]) -> f64 {
        let margin = self
            .trees
            .iter()
            .fold(self.base_margin, |acc, tree| acc + tree.leaf_value(row));
        match self.link {
            Link::Identity => margin as f64,
            Link::Log => (margin as f64).exp(),
        }
    }
}

impl Regressor for TreeEnsemble {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, matrix: &FeatureMatrix) -> Vec<f64> {
        matrix.rows().map(|row| self.predict_row(row)).collect()
    }
}
