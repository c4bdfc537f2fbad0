//! Engine configuration file
//!
//! ```json
//! {
//!   "calculation": { "mode": "manual", "max_iterations": 200, "epsilon": 0.0001 },
//!   "validation": { "threshold": 0.98, "tolerance": { "relative": 1e-6 } }
//! }
//! ```
//!
//! Every field is optional and falls back to its default.

use crate::calculation::CalculationOptions;
use crate::error::Result;
use crate::validation::ValidationOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub calculation: CalculationOptions,
    pub validation: ValidationOptions,
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::from_json(&std::fs::read_to_string(path)?)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }
}
