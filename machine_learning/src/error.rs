use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidDataset {
        len: usize,
        row_size: usize,
    },
    InvalidModelBuffer {
        got: usize,
        expected: usize,
    },
    EmptyDataset(&'static str),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
            ),
            MlErr::InvalidDataset { len, row_size } => write!(
                f,
                "A dataset of {len} values can't be split into rows of {row_size} values"
            ),
            MlErr::InvalidModelBuffer { got, expected } => write!(
                f,
                "The model buffer has {got} bytes but the model needs {expected}"
            ),
            MlErr::EmptyDataset(which) => write!(f, "The {which} dataset is empty"),
        }
    }
}

impl Error for MlErr {}
