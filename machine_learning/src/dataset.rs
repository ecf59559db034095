use std::num::NonZeroUsize;

use ml_core::{Batch, Labels, MlError, Result, Target, TaskKind};
use ndarray::{Array1, Array2, ArrayView1};
use rand::{Rng, seq::SliceRandom};

/// A single multimodal sample, ready to be batched.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    features: Vec<Vec<f32>>,
    target: Target,
    labeled: bool,
}

impl Sample {
    /// Returns a new `Sample`.
    ///
    /// # Arguments
    /// * `features` - One feature vector per modality.
    /// * `target` - The label of the sample.
    /// * `labeled` - Whether the label may be used by a supervised loss.
    pub fn new(features: Vec<Vec<f32>>, target: Target, labeled: bool) -> Self {
        Self {
            features,
            target,
            labeled,
        }
    }

    pub fn features(&self) -> &[Vec<f32>] {
        &self.features
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn labeled(&self) -> bool {
        self.labeled
    }
}

/// An in-memory client dataset.
///
/// Keeps the samples in their original order and a separate visiting order
/// that `shuffle` permutes, so that batches can be drawn without moving data.
#[derive(Debug, Clone)]
pub struct Dataset {
    samples: Vec<Sample>,
    dims: Vec<usize>,
    task: TaskKind,
    num_classes: usize,
    order: Vec<usize>,
}

impl Dataset {
    /// Returns a new `Dataset`.
    ///
    /// # Arguments
    /// * `samples` - The samples of the dataset.
    /// * `dims` - The feature width of every modality.
    /// * `task` - The task every target must belong to.
    /// * `num_classes` - The size of the label set.
    ///
    /// # Errors
    /// Returns an `MlError` if a sample doesn't match the declared modalities,
    /// task or label set, or holds a non finite feature.
    pub fn new(
        samples: Vec<Sample>,
        dims: Vec<usize>,
        task: TaskKind,
        num_classes: usize,
    ) -> Result<Self> {
        if dims.is_empty() {
            return Err(MlError::InvalidInput("a dataset needs at least one modality"));
        }

        for sample in &samples {
            if sample.features.len() != dims.len() {
                return Err(MlError::ShapeMismatch {
                    what: "sample modalities",
                    got: sample.features.len(),
                    expected: dims.len(),
                });
            }

            for (features, &dim) in sample.features.iter().zip(&dims) {
                if features.len() != dim {
                    return Err(MlError::ShapeMismatch {
                        what: "sample features",
                        got: features.len(),
                        expected: dim,
                    });
                }

                if features.iter().any(|v| !v.is_finite()) {
                    return Err(MlError::NonFinite {
                        what: "sample features",
                    });
                }
            }

            if sample.target.task() != task {
                return Err(MlError::InvalidInput("sample target doesn't match the task"));
            }

            sample.target.check_range(num_classes)?;
        }

        let order = (0..samples.len()).collect();

        Ok(Self {
            samples,
            dims,
            task,
            num_classes,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn task(&self) -> TaskKind {
        self.task
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Returns the amount of samples whose label is usable.
    pub fn labeled_len(&self) -> usize {
        self.samples.iter().filter(|s| s.labeled).count()
    }

    /// Counts the usable labels of every class.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_classes];

        for sample in self.samples.iter().filter(|s| s.labeled) {
            match &sample.target {
                Target::Class(class) => counts[*class] += 1,
                Target::MultiLabel(classes) => classes.iter().for_each(|&c| counts[c] += 1),
            }
        }

        counts
    }

    /// Permutes the order in which `batches` visits the samples.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.order.shuffle(rng);
    }

    /// Iterates the dataset in `batch_size` chunks, the last one possibly smaller.
    pub fn batches(&self, batch_size: NonZeroUsize) -> impl Iterator<Item = Result<Batch>> + '_ {
        self.order
            .chunks(batch_size.get())
            .map(move |chunk| self.batch(chunk))
    }

    fn batch(&self, indices: &[usize]) -> Result<Batch> {
        let rows = indices.len();

        let inputs = self
            .dims
            .iter()
            .enumerate()
            .map(|(m, &dim)| {
                let mut x = Array2::zeros((rows, dim));
                for (mut row, &i) in x.rows_mut().into_iter().zip(indices) {
                    row.assign(&ArrayView1::from(self.samples[i].features[m].as_slice()));
                }
                x
            })
            .collect();

        let labels = match self.task {
            TaskKind::SingleLabel => Labels::Classes(
                indices
                    .iter()
                    .map(|&i| self.samples[i].target.primary_class().unwrap_or_default())
                    .collect(),
            ),
            TaskKind::MultiLabel => {
                let mut hot = Array2::zeros((rows, self.num_classes));
                for (r, &i) in indices.iter().enumerate() {
                    if let Target::MultiLabel(classes) = &self.samples[i].target {
                        classes.iter().for_each(|&c| hot[[r, c]] = 1.);
                    }
                }
                Labels::MultiHot(hot)
            }
        };

        let mask = indices
            .iter()
            .map(|&i| if self.samples[i].labeled { 1. } else { 0. })
            .collect::<Array1<f32>>();

        Batch::new(inputs, labels, mask)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn dataset(n: usize) -> Dataset {
        let samples = (0..n)
            .map(|i| Sample::new(vec![vec![i as f32; 2], vec![0.; 1]], Target::Class(i % 3), i % 2 == 0))
            .collect();

        Dataset::new(samples, vec![2, 1], TaskKind::SingleLabel, 3).unwrap()
    }

    #[test]
    fn batches_cover_every_sample() {
        let dataset = dataset(7);
        let sizes: Vec<usize> = dataset
            .batches(NonZeroUsize::new(3).unwrap())
            .map(|b| b.unwrap().len())
            .collect();

        assert_eq!(sizes, [3, 3, 1]);
    }

    #[test]
    fn batch_carries_mask_and_features() {
        let dataset = dataset(4);
        let batch = dataset.batches(NonZeroUsize::new(4).unwrap()).next().unwrap().unwrap();

        assert_eq!(batch.inputs()[0][[3, 1]], 3.);
        assert_eq!(batch.label_mask().to_vec(), [1., 0., 1., 0.]);
        assert_eq!(batch.labels(), &Labels::Classes(vec![0, 1, 2, 0]));
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut dataset = dataset(10);
        dataset.shuffle(&mut StdRng::seed_from_u64(42));

        let mut seen: Vec<f32> = dataset
            .batches(NonZeroUsize::new(10).unwrap())
            .flat_map(|b| b.unwrap().inputs()[0].column(0).to_vec())
            .collect();
        seen.sort_by(f32::total_cmp);

        assert_eq!(seen, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn class_counts_skip_unlabeled() {
        // labeled samples are 0, 2, 4 with classes 0, 2, 1
        assert_eq!(dataset(6).class_counts(), [1, 1, 1]);
    }

    #[test]
    fn rejects_wrong_feature_width() {
        let samples = vec![Sample::new(vec![vec![0.; 3]], Target::Class(0), true)];
        let err = Dataset::new(samples, vec![2], TaskKind::SingleLabel, 2).unwrap_err();

        assert_eq!(
            err,
            MlError::ShapeMismatch {
                what: "sample features",
                got: 3,
                expected: 2
            }
        );
    }

    #[test]
    fn rejects_non_finite_features() {
        let samples = vec![Sample::new(vec![vec![0., f32::NAN]], Target::Class(0), true)];
        let err = Dataset::new(samples, vec![2], TaskKind::SingleLabel, 2).unwrap_err();

        assert_eq!(err, MlError::NonFinite { what: "sample features" });
    }
}
