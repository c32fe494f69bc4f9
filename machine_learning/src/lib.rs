pub mod dataset;
pub mod error;
pub mod linear;
pub mod loss;
pub mod optimization;
pub mod training;

pub use dataset::Dataset;
pub use error::{MlErr, Result};
pub use linear::{LinearRegression, LinearRegressionBuilder};
pub use training::{Trainer, TrainerBuilder};
