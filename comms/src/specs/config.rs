use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A configuration value sent along an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl Scalar {
    /// Reads the value as a count, doubles are accepted when they hold a whole number.
    pub fn as_count(&self) -> Option<usize> {
        match *self {
            Scalar::Int(v) => usize::try_from(v).ok(),
            Scalar::Double(v) if v >= 0.0 && v.fract() == 0.0 => Some(v as usize),
            _ => None,
        }
    }
}

/// The configuration map of an instruction.
pub type Config = BTreeMap<String, Scalar>;
