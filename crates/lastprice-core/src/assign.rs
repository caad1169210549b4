//! Deterministic variant bucketing.
//!
//! `bucket` is shared with client SDKs: the same key must land in the same
//! bucket everywhere, so the hash and reduction below are fixed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Control,
    Experiment,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Control, Variant::Experiment];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Experiment => "experiment",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control" => Ok(Self::Control),
            "experiment" => Ok(Self::Experiment),
            other => Err(CoreError::invalid(format!("unknown variant '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantWeights {
    pub control_weight: f64,
}

impl Default for VariantWeights {
    fn default() -> Self {
        Self {
            control_weight: 0.5,
        }
    }
}

impl VariantWeights {
    pub fn new(control_weight: f64) -> Result<Self, CoreError> {
        let weights = Self { control_weight };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.control_weight.is_finite() || !(0.0..=1.0).contains(&self.control_weight) {
            return Err(CoreError::invalid(format!(
                "control weight must be within [0, 1], got {}",
                self.control_weight
            )));
        }
        Ok(())
    }
}

/// Map `key` into `[0, 100)`: SHA-256, first four bytes big-endian, modulo 100.
pub fn bucket(key: &str) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % 100
}

pub fn assignment_key(user_id: &str, experiment_id: &str) -> String {
    format!("{user_id}:{experiment_id}")
}

/// Pure variant choice for a user; callers persist the first result.
pub fn choose_variant(user_id: &str, experiment_id: &str, weights: VariantWeights) -> Variant {
    let position = f64::from(bucket(&assignment_key(user_id, experiment_id))) / 100.0;
    if position < weights.control_weight {
        Variant::Control
    } else {
        Variant::Experiment
    }
}
