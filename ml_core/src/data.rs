use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::{MlError, Result};

/// The kind of supervised task a model is trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Exactly one class per sample, scored with a softmax.
    #[default]
    SingleLabel,
    /// Any subset of classes per sample, scored with independent sigmoids.
    MultiLabel,
}

/// The label of a single sample.
///
/// Serialized untagged, so a single-label target reads as `3` and a
/// multi-label target as `[0, 4]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Class(usize),
    MultiLabel(Vec<usize>),
}

impl Target {
    /// Returns the task this target belongs to.
    pub fn task(&self) -> TaskKind {
        match self {
            Target::Class(_) => TaskKind::SingleLabel,
            Target::MultiLabel(_) => TaskKind::MultiLabel,
        }
    }

    /// Returns the first class of the target, if any.
    pub fn primary_class(&self) -> Option<usize> {
        match self {
            Target::Class(class) => Some(*class),
            Target::MultiLabel(classes) => classes.first().copied(),
        }
    }

    /// Checks that every class of the target is below `num_classes`.
    ///
    /// # Errors
    /// Returns `MlError::LabelOutOfRange` for the first offending class.
    pub fn check_range(&self, num_classes: usize) -> Result<()> {
        let classes: &[usize] = match self {
            Target::Class(class) => std::slice::from_ref(class),
            Target::MultiLabel(classes) => classes,
        };

        match classes.iter().find(|&&label| label >= num_classes) {
            Some(&label) => Err(MlError::LabelOutOfRange { label, num_classes }),
            None => Ok(()),
        }
    }
}

/// The supervision targets of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Labels {
    /// One class index per row.
    Classes(Vec<usize>),
    /// A `(rows, num_classes)` matrix of zeros and ones.
    MultiHot(Array2<f32>),
}

impl Labels {
    /// Returns the number of rows covered by these labels.
    pub fn len(&self) -> usize {
        match self {
            Labels::Classes(classes) => classes.len(),
            Labels::MultiHot(hot) => hot.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn task(&self) -> TaskKind {
        match self {
            Labels::Classes(_) => TaskKind::SingleLabel,
            Labels::MultiHot(_) => TaskKind::MultiLabel,
        }
    }
}

/// A batch of multimodal samples.
///
/// Holds one `(rows, dim_m)` input matrix per modality, the labels of every
/// row and a label mask whose entries are `1.0` for rows that may contribute
/// to a supervised loss and `0.0` for rows whose label is unusable.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    inputs: Vec<Array2<f32>>,
    labels: Labels,
    label_mask: Array1<f32>,
}

impl Batch {
    /// Returns a new `Batch`.
    ///
    /// # Arguments
    /// * `inputs` - One input matrix per modality, all with the same number of rows.
    /// * `labels` - The labels of every row.
    /// * `label_mask` - `1.0` for usable labels, `0.0` otherwise.
    ///
    /// # Errors
    /// Returns `MlError::InvalidInput` if there are no modalities and
    /// `MlError::ShapeMismatch` if row counts disagree.
    pub fn new(inputs: Vec<Array2<f32>>, labels: Labels, label_mask: Array1<f32>) -> Result<Self> {
        if inputs.is_empty() {
            return Err(MlError::InvalidInput("a batch needs at least one modality"));
        }

        let rows = labels.len();
        for input in &inputs {
            if input.nrows() != rows {
                return Err(MlError::ShapeMismatch {
                    what: "batch inputs",
                    got: input.nrows(),
                    expected: rows,
                });
            }
        }

        if label_mask.len() != rows {
            return Err(MlError::ShapeMismatch {
                what: "label mask",
                got: label_mask.len(),
                expected: rows,
            });
        }

        Ok(Self {
            inputs,
            labels,
            label_mask,
        })
    }

    pub fn inputs(&self) -> &[Array2<f32>] {
        &self.inputs
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn label_mask(&self) -> ArrayView1<'_, f32> {
        self.label_mask.view()
    }

    /// Returns the number of rows in the batch.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of rows whose label is usable.
    pub fn labeled(&self) -> usize {
        self.label_mask.iter().filter(|&&m| m > 0.0).count()
    }
}
