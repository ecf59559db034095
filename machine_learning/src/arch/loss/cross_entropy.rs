use ml_core::{Labels, MlError, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};

use super::{LossFn, loss_fn::labeled_rows};

/// Row-wise softmax, shifted by the row maximum for stability.
pub fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut p = logits.to_owned();

    for mut row in p.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }

    p
}

/// Softmax cross-entropy for single-label classification.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    fn classes<'a>(&self, labels: &'a Labels, num_classes: usize) -> Result<&'a [usize]> {
        let Labels::Classes(classes) = labels else {
            return Err(MlError::InvalidInput("cross entropy expects class labels"));
        };

        if let Some(&label) = classes.iter().find(|&&c| c >= num_classes) {
            return Err(MlError::LabelOutOfRange { label, num_classes });
        }

        Ok(classes)
    }
}

impl LossFn for CrossEntropy {
    fn loss(&self, logits: ArrayView2<f32>, labels: &Labels, mask: ArrayView1<f32>) -> Result<f32> {
        let labeled = labeled_rows(logits, labels, mask)?;
        let classes = self.classes(labels, logits.ncols())?;

        if labeled <= 0. {
            return Ok(0.);
        }

        let mut total = 0.;
        for ((row, &m), &y) in logits.axis_iter(Axis(0)).zip(mask).zip(classes) {
            if m <= 0. {
                continue;
            }

            let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
            let log_sum_exp = max + row.mapv(|v| (v - max).exp()).sum().ln();
            total += m * (log_sum_exp - row[y]);
        }

        Ok(total / labeled)
    }

    fn loss_prime(
        &self,
        logits: ArrayView2<f32>,
        labels: &Labels,
        mask: ArrayView1<f32>,
    ) -> Result<Array2<f32>> {
        let labeled = labeled_rows(logits, labels, mask)?;
        let classes = self.classes(labels, logits.ncols())?;

        if labeled <= 0. {
            return Ok(Array2::zeros(logits.raw_dim()));
        }

        let mut d = softmax(logits);
        Zip::from(d.rows_mut())
            .and(mask)
            .and(classes)
            .for_each(|mut row, &m, &y| {
                row[y] -= 1.;
                row *= m / labeled;
            });

        Ok(d)
    }
}
