use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::features::SchemaPolicy;

/// Largest rounding precision accepted for returned goal predictions.
const MAX_ROUND_DIGITS: u32 = 12;

/// When the model artifacts are read from disk.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Load both models at startup; a failure leaves the service degraded.
    Eager,
    /// Load on the first prediction request, retrying until it succeeds.
    Lazy,
}

impl LoadPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadPolicy::Eager => "eager",
            LoadPolicy::Lazy => "lazy",
        }
    }
}

/// Football goal prediction API
#[derive(Parser, Debug, Clone)]
#[command(name = "goal-predictor", version, about)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    pub listen_addr: String,

    /// Directory holding home_model.json and away_model.json
    #[arg(long, env = "MODEL_DIR", default_value = "app/model")]
    pub model_dir: PathBuf,

    /// Model loading policy
    #[arg(long, env = "MODEL_LOAD_POLICY", value_enum, default_value = "eager")]
    pub load_policy: LoadPolicy,

    /// Feature schema: detect from the model metadata, or force one
    #[arg(long, env = "FEATURE_SCHEMA", value_enum, default_value = "auto")]
    pub schema: SchemaPolicy,

    /// Round returned goal predictions to this many decimal digits
    #[arg(long, env = "PREDICTION_ROUND_DIGITS")]
    pub round_digits: Option<u32>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            anyhow::bail!("listen_addr '{}' is not a valid socket address", self.listen_addr);
        }
        if self.model_dir.as_os_str().is_empty() {
            anyhow::bail!("model_dir must not be empty");
        }
        if let Some(digits) = self.round_digits {
            if digits > MAX_ROUND_DIGITS {
                anyhow::bail!("round_digits must be between 0 and {}", MAX_ROUND_DIGITS);
            }
        }
        Ok(())
    }
}
