use ml_core::{Labels, MlError, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Zip};

use super::{LossFn, loss_fn::labeled_rows};

pub fn sigmoid(z: f32) -> f32 {
    1. / (1. + (-z).exp())
}

/// Binary cross-entropy on logits for multi-label classification, averaged
/// over every class of the unmasked rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct BceWithLogits;

impl BceWithLogits {
    fn multi_hot<'a>(&self, labels: &'a Labels, logits: ArrayView2<f32>) -> Result<&'a Array2<f32>> {
        let Labels::MultiHot(hot) = labels else {
            return Err(MlError::InvalidInput("binary cross entropy expects multi-hot labels"));
        };

        if hot.ncols() != logits.ncols() {
            return Err(MlError::ShapeMismatch {
                what: "multi-hot classes",
                got: hot.ncols(),
                expected: logits.ncols(),
            });
        }

        Ok(hot)
    }
}

impl LossFn for BceWithLogits {
    fn loss(&self, logits: ArrayView2<f32>, labels: &Labels, mask: ArrayView1<f32>) -> Result<f32> {
        let labeled = labeled_rows(logits, labels, mask)?;
        let hot = self.multi_hot(labels, logits)?;

        if labeled <= 0. {
            return Ok(0.);
        }

        let mut total = 0.;
        Zip::from(logits.rows())
            .and(hot.rows())
            .and(mask)
            .for_each(|z_row, y_row, &m| {
                if m <= 0. {
                    return;
                }

                let row: f32 = z_row
                    .iter()
                    .zip(y_row)
                    .map(|(&z, &y)| z.max(0.) - z * y + (-z.abs()).exp().ln_1p())
                    .sum();
                total += m * row;
            });

        Ok(total / (labeled * logits.ncols() as f32))
    }

    fn loss_prime(
        &self,
        logits: ArrayView2<f32>,
        labels: &Labels,
        mask: ArrayView1<f32>,
    ) -> Result<Array2<f32>> {
        let labeled = labeled_rows(logits, labels, mask)?;
        let hot = self.multi_hot(labels, logits)?;

        if labeled <= 0. {
            return Ok(Array2::zeros(logits.raw_dim()));
        }

        let scale = labeled * logits.ncols() as f32;
        let mut d = logits.mapv(sigmoid) - hot;
        Zip::from(d.rows_mut()).and(mask).for_each(|mut row, &m| {
            row *= m / scale;
        });

        Ok(d)
    }
}
