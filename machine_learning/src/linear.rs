//! A dense linear regression model, `y = x·W + b`, trained with mean squared error.

use comms::specs::model::ModelDescriptor;
use log::debug;
use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Dataset, MlErr, Result, Trainer, TrainerBuilder,
    loss::{LossFn, Mse},
    optimization::{GradientDescent, Optimizer},
};

const LAYERS: usize = 2;

/// Linear regression with its own training and test samples.
///
/// Its parameters are two layers: the `x_size * y_size` row-major weights and
/// the `y_size` biases.
#[derive(Debug)]
pub struct LinearRegression<O: Optimizer = GradientDescent> {
    x_size: usize,
    y_size: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,

    optimizer: O,
    loss: Mse,
    batch_size: usize,
    tolerance: f32,
    rng: StdRng,

    train: Dataset,
    test: Dataset,
}

impl<O: Optimizer> LinearRegression<O> {
    /// Creates a new `LinearRegression` with zeroed parameters and no samples.
    ///
    /// # Arguments
    /// * `x_size` - The amount of inputs.
    /// * `y_size` - The amount of outputs.
    /// * `optimizer` - The rule used to update the parameters.
    /// * `batch_size` - The default amount of samples per batch.
    /// * `tolerance` - The largest absolute error a prediction may have to count as correct.
    /// * `rng` - Drives the sample shuffling between epochs.
    pub fn new(
        x_size: usize,
        y_size: usize,
        optimizer: O,
        batch_size: usize,
        tolerance: f32,
        rng: StdRng,
    ) -> Self {
        Self {
            x_size,
            y_size,
            weights: vec![0.0; x_size * y_size],
            bias: vec![0.0; y_size],
            optimizer,
            loss: Mse::new(),
            batch_size: batch_size.max(1),
            tolerance,
            rng,
            train: Dataset::default(),
            test: Dataset::default(),
        }
    }

    /// Loads the training samples, replacing the previous ones.
    pub fn load_training(&mut self, dataset: Dataset) -> Result<()> {
        self.check_dataset(&dataset)?;
        self.train = dataset;
        Ok(())
    }

    /// Loads the test samples, replacing the previous ones.
    pub fn load_test(&mut self, dataset: Dataset) -> Result<()> {
        self.check_dataset(&dataset)?;
        self.test = dataset;
        Ok(())
    }

    fn check_dataset(&self, dataset: &Dataset) -> Result<()> {
        if dataset.x_size() != self.x_size {
            return Err(MlErr::SizeMismatch {
                a: "dataset inputs",
                b: "model inputs",
                got: dataset.x_size(),
                expected: self.x_size,
            });
        }

        if dataset.y_size() != self.y_size {
            return Err(MlErr::SizeMismatch {
                a: "dataset targets",
                b: "model outputs",
                got: dataset.y_size(),
                expected: self.y_size,
            });
        }

        Ok(())
    }

    fn views(&self) -> (ArrayView2<'_, f32>, ArrayView1<'_, f32>) {
        // SAFETY: Both buffers keep their lengths, `update_parameters` checks them.
        let w = ArrayView2::from_shape((self.x_size, self.y_size), &self.weights).unwrap();
        let b = ArrayView1::from_shape(self.y_size, &self.bias).unwrap();
        (w, b)
    }

    /// Runs one pass over the training samples.
    ///
    /// # Returns
    /// The loss of every batch.
    fn epoch(&mut self, batch_size: usize) -> Vec<f32> {
        self.train.shuffle(&mut self.rng);

        let mut losses = Vec::new();
        let mut grad_w = Vec::with_capacity(self.weights.len());
        let mut grad_b = Vec::with_capacity(self.bias.len());

        for (x, y) in self.train.batches(batch_size) {
            // SAFETY: Both buffers keep their lengths, `update_parameters` checks them.
            let w = ArrayView2::from_shape((self.x_size, self.y_size), &self.weights).unwrap();
            let b = ArrayView1::from_shape(self.y_size, &self.bias).unwrap();

            let y_pred = x.dot(&w) + &b;
            losses.push(self.loss.loss(y_pred.view(), y));

            let d = self.loss.loss_prime(y_pred.view(), y);
            grad_w.clear();
            grad_w.extend(x.t().dot(&d).iter().copied());
            grad_b.clear();
            grad_b.extend(d.sum_axis(Axis(0)).iter().copied());

            self.optimizer.update_params(&mut self.weights, &grad_w);
            self.optimizer.update_params(&mut self.bias, &grad_b);
        }

        losses
    }
}

impl<O: Optimizer + Send + 'static> Trainer for LinearRegression<O> {
    fn get_parameters(&self) -> Vec<Vec<f32>> {
        vec![self.weights.clone(), self.bias.clone()]
    }

    fn update_parameters(&mut self, params: Vec<Vec<f32>>) -> Result<()> {
        let [weights, bias] = match <[Vec<f32>; LAYERS]>::try_from(params) {
            Ok(layers) => layers,
            Err(params) => {
                return Err(MlErr::SizeMismatch {
                    a: "received layers",
                    b: "model layers",
                    got: params.len(),
                    expected: LAYERS,
                });
            }
        };

        if weights.len() != self.weights.len() {
            return Err(MlErr::SizeMismatch {
                a: "received weights",
                b: "model weights",
                got: weights.len(),
                expected: self.weights.len(),
            });
        }

        if bias.len() != self.bias.len() {
            return Err(MlErr::SizeMismatch {
                a: "received biases",
                b: "model biases",
                got: bias.len(),
                expected: self.bias.len(),
            });
        }

        self.weights = weights;
        self.bias = bias;
        Ok(())
    }

    fn fit(
        &mut self,
        epochs: usize,
        batch_size: Option<usize>,
        on_loss: &mut dyn FnMut(&[f32]),
    ) -> Result<()> {
        if self.train.is_empty() {
            return Err(MlErr::EmptyDataset("training"));
        }

        let batch_size = batch_size.unwrap_or(self.batch_size).max(1);

        for epoch in 0..epochs {
            let losses = self.epoch(batch_size);
            debug!("epoch {epoch} done over {} batches", losses.len());
            on_loss(&losses);
        }

        Ok(())
    }

    fn evaluate(&mut self) -> Result<(f32, f32)> {
        if self.test.is_empty() {
            return Err(MlErr::EmptyDataset("test"));
        }

        let (w, b) = self.views();
        let (x, y) = self.test.full();
        let y_pred = x.dot(&w) + &b;

        let loss = self.loss.loss(y_pred.view(), y);
        let hits = y_pred
            .rows()
            .into_iter()
            .zip(y.rows())
            .filter(|(pred, y)| {
                pred.iter()
                    .zip(y.iter())
                    .all(|(p, t)| (p - t).abs() <= self.tolerance)
            })
            .count();

        Ok((loss, hits as f32 / self.test.len() as f32))
    }

    fn training_sample_count(&self) -> usize {
        self.train.len()
    }

    fn test_sample_count(&self) -> usize {
        self.test.len()
    }
}

/// Builds `LinearRegression` trainers from a model artifact holding the initial
/// parameters as little-endian `f32`s, weights first.
#[derive(Debug, Clone)]
pub struct LinearRegressionBuilder {
    pub x_size: usize,
    pub y_size: usize,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub tolerance: f32,
    pub seed: Option<u64>,
}

impl LinearRegressionBuilder {
    /// Creates a builder with a `0.01` learning rate, batches of 32 and a `0.5` tolerance.
    pub fn new(x_size: usize, y_size: usize) -> Self {
        Self {
            x_size,
            y_size,
            learning_rate: 0.01,
            batch_size: 32,
            tolerance: 0.5,
            seed: None,
        }
    }

    fn generate_rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

impl TrainerBuilder for LinearRegressionBuilder {
    type Trainer = LinearRegression;

    fn build(&self, model: &ModelDescriptor, buffer: &[u8]) -> Result<Self::Trainer> {
        let weights = self.x_size * self.y_size;
        let expected = (weights + self.y_size) * size_of::<f32>();
        if buffer.len() != expected {
            return Err(MlErr::InvalidModelBuffer {
                got: buffer.len(),
                expected,
            });
        }

        debug!("building linear regression for model {} ({})", model.id, model.name);

        let mut params = comms::f32s_from_le(buffer);
        let bias = params.split_off(weights);

        let mut trainer = LinearRegression::new(
            self.x_size,
            self.y_size,
            GradientDescent::new(self.learning_rate),
            self.batch_size,
            self.tolerance,
            self.generate_rng(),
        );
        trainer.update_parameters(vec![params, bias])?;

        Ok(trainer)
    }
}
