use comms::specs::model::ModelDescriptor;

use super::Trainer;
use crate::Result;

/// Builds `Trainer`s from a downloaded model artifact.
pub trait TrainerBuilder {
    type Trainer: Trainer;

    /// Builds a new trainer bound to the given model.
    ///
    /// # Arguments
    /// * `model` - The advertised model's descriptor.
    /// * `buffer` - The model artifact's raw bytes.
    fn build(&self, model: &ModelDescriptor, buffer: &[u8]) -> Result<Self::Trainer>;
}
