pub mod encoder;
pub mod schema;

pub use encoder::{EncodeError, FeatureEncoder};
pub use schema::{SchemaError, SchemaKind, SchemaPolicy};

/// Dense row-major feature matrix handed to the regressors.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    n_rows: usize,
    n_cols: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    /// Build a matrix from equally sized rows.
    pub fn from_rows(n_cols: usize, rows: Vec<Vec<f32>>) -> Self {
        let n_rows = rows.len();
        let mut data = Vec::with_capacity(n_cols * n_rows);
        for row in rows {
            debug_assert_eq!(row.len(), n_cols, "row width mismatch");
            data.extend(row);
        }
        FeatureMatrix { n_rows, n_cols, data }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.n_rows()).map(move |i| self.row(i))
    }
}
