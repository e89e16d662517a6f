pub mod booster;
pub mod store;

pub use store::{ModelStore, StoreError, StoreStatus};

use crate::features::FeatureMatrix;

/// A trained model mapping a feature row to a single goal-count estimate.
pub trait Regressor: Send + Sync + std::fmt::Debug {
    /// Ordered feature names the model was fit on (empty when the training
    /// job did not retain them).
    fn feature_names(&self) -> &[String];

    /// Predict every row of `matrix`, in row order.
    fn predict(&self, matrix: &FeatureMatrix) -> Vec<f64>;
}

/// Which of the two regressors to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSide {
    Home,
    Away,
}
