use crate::Result;

/// A model loaded on the device, able to train and evaluate on its own samples.
///
/// Parameters are exchanged as one `f32` vector per layer, in the model's layer order.
pub trait Trainer: Send + 'static {
    /// Returns a copy of the current parameters.
    fn get_parameters(&self) -> Vec<Vec<f32>>;

    /// Replaces the current parameters.
    ///
    /// # Arguments
    /// * `params` - The new parameters, one vector per layer.
    ///
    /// # Errors
    /// Returns `MlErr::SizeMismatch` if the layout doesn't match the model's.
    fn update_parameters(&mut self, params: Vec<Vec<f32>>) -> Result<()>;

    /// Trains on the training samples.
    ///
    /// # Arguments
    /// * `epochs` - The amount of passes over the training samples.
    /// * `batch_size` - Overrides the trainer's own batch size when present.
    /// * `on_loss` - Called after every epoch with that epoch's batch losses.
    fn fit(
        &mut self,
        epochs: usize,
        batch_size: Option<usize>,
        on_loss: &mut dyn FnMut(&[f32]),
    ) -> Result<()>;

    /// Evaluates the current parameters on the test samples.
    ///
    /// # Returns
    /// The `(loss, accuracy)` pair.
    fn evaluate(&mut self) -> Result<(f32, f32)>;

    fn training_sample_count(&self) -> usize;

    fn test_sample_count(&self) -> usize;
}
