use ndarray::{ArrayView2, Axis};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result};

/// Row-major samples, each row holding `x_size` inputs followed by `y_size` targets.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    x_size: usize,
    y_size: usize,
    data: Vec<f32>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `data` - The samples, one row after the other.
    /// * `x_size` - The amount of inputs per row.
    /// * `y_size` - The amount of targets per row.
    ///
    /// # Errors
    /// `MlErr::InvalidDataset` if `data` isn't made of whole rows.
    pub fn new(data: Vec<f32>, x_size: usize, y_size: usize) -> Result<Self> {
        let row_size = x_size + y_size;
        if row_size == 0 || data.len() % row_size != 0 {
            return Err(MlErr::InvalidDataset {
                len: data.len(),
                row_size,
            });
        }

        Ok(Self {
            x_size,
            y_size,
            data,
        })
    }

    /// The amount of samples.
    pub fn len(&self) -> usize {
        match self.row_size() {
            0 => 0,
            row_size => self.data.len() / row_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn x_size(&self) -> usize {
        self.x_size
    }

    pub fn y_size(&self) -> usize {
        self.y_size
    }

    fn row_size(&self) -> usize {
        self.x_size + self.y_size
    }

    /// Shuffles the rows in place.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        let row_size = self.row_size();
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);

        let mut shuffled = Vec::with_capacity(self.data.len());
        for row in order {
            shuffled.extend_from_slice(&self.data[row * row_size..(row + 1) * row_size]);
        }

        self.data = shuffled;
    }

    /// Splits the samples in `(x, y)` batches of at most `batch_size` rows.
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> impl Iterator<Item = (ArrayView2<'_, f32>, ArrayView2<'_, f32>)> {
        let row_size = self.row_size();
        let x_size = self.x_size;

        self.data
            .chunks(batch_size.max(1) * row_size.max(1))
            .map(move |chunk| {
                // SAFETY: Every chunk is made of whole rows, checked on construction.
                let rows = ArrayView2::from_shape((chunk.len() / row_size, row_size), chunk).unwrap();
                let (x, y) = rows.split_at(Axis(1), x_size);
                (x, y)
            })
    }

    /// The whole dataset as a single `(x, y)` batch.
    pub fn full(&self) -> (ArrayView2<'_, f32>, ArrayView2<'_, f32>) {
        // SAFETY: The data is made of whole rows, checked on construction.
        let all = ArrayView2::from_shape((self.len(), self.row_size()), &self.data[..]).unwrap();
        all.split_at(Axis(1), self.x_size)
    }
}
