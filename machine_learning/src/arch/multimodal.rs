use std::ops::Range;

use ml_core::{Batch, MlError, Model, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, concatenate, s};
use rand::Rng;

use super::{Sequential, activations::ActFn, layers::Dense};
use crate::initialization::{self, ParamGen, RandParamGen};

/// How the per-modality embeddings are combined before the classification head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fusion {
    /// Embeddings are concatenated side by side.
    #[default]
    Concat,
    /// Embeddings are averaged with per-sample softmax weights scored by `h · a + c`.
    Attention,
}

/// Parameter ranges of every block of a `MultimodalClassifier`.
struct Layout {
    encoders: Vec<Range<usize>>,
    attention: Range<usize>,
    head: Range<usize>,
}

/// A late-fusion classifier: one dense encoder per modality, a fusion step and
/// a two layer classification head.
///
/// The flat parameter vector is laid out as every encoder in modality order,
/// then the attention vector and bias (attention fusion only), then the head.
#[derive(Clone, Debug)]
pub struct MultimodalClassifier {
    encoders: Vec<Sequential>,
    head: Sequential,
    fusion: Fusion,
    hidden: usize,
    num_classes: usize,

    // Forward metadata
    encoded: Vec<Array2<f32>>,
    attention: Array2<f32>,
}

impl MultimodalClassifier {
    /// Returns a new `MultimodalClassifier`.
    ///
    /// # Arguments
    /// * `input_dims` - The feature width of every modality.
    /// * `hidden` - The embedding width of the encoders and the head.
    /// * `num_classes` - The width of the logits.
    /// * `fusion` - How embeddings are combined.
    ///
    /// # Errors
    /// Returns `MlError::InvalidInput` if there are no modalities or any dimension is zero.
    pub fn new(
        input_dims: &[usize],
        hidden: usize,
        num_classes: usize,
        fusion: Fusion,
    ) -> Result<Self> {
        if input_dims.is_empty() {
            return Err(MlError::InvalidInput("a classifier needs at least one modality"));
        }

        if input_dims.contains(&0) || hidden == 0 || num_classes == 0 {
            return Err(MlError::InvalidInput("classifier dimensions must be positive"));
        }

        let encoders = input_dims
            .iter()
            .map(|&dim| Sequential::new([Dense::new((dim, hidden), Some(ActFn::relu()))]))
            .collect();

        let fused = match fusion {
            Fusion::Concat => hidden * input_dims.len(),
            Fusion::Attention => hidden,
        };

        let head = Sequential::new([
            Dense::new((fused, hidden), Some(ActFn::relu())),
            Dense::new((hidden, num_classes), None),
        ]);

        Ok(Self {
            encoders,
            head,
            fusion,
            hidden,
            num_classes,
            encoded: Vec::new(),
            attention: Array2::zeros((0, input_dims.len())),
        })
    }

    pub fn num_modalities(&self) -> usize {
        self.encoders.len()
    }

    pub fn fusion(&self) -> Fusion {
        self.fusion
    }

    /// Samples a fresh parameter vector for this classifier.
    ///
    /// # Arguments
    /// * `rng` - The random number generator to draw from.
    ///
    /// # Returns
    /// A vector of `num_params()` parameters.
    pub fn init_params<R: Rng>(&self, rng: &mut R) -> initialization::Result<Vec<f32>> {
        let mut params = Vec::with_capacity(self.num_params());

        for encoder in &self.encoders {
            params.extend(encoder.init_params(rng)?);
        }

        if self.fusion == Fusion::Attention {
            let mut param_gen = RandParamGen::xavier_uniform(rng, self.hidden, 1)?;
            params.extend(param_gen.sample(self.hidden));
            params.push(0.);
        }

        params.extend(self.head.init_params(rng)?);
        Ok(params)
    }

    fn attention_size(&self) -> usize {
        match self.fusion {
            Fusion::Concat => 0,
            Fusion::Attention => self.hidden + 1,
        }
    }

    fn layout(&self) -> Layout {
        let mut offset = 0;
        let encoders = self
            .encoders
            .iter()
            .map(|encoder| {
                let range = offset..offset + encoder.size();
                offset = range.end;
                range
            })
            .collect();

        let attention = offset..offset + self.attention_size();
        let head = attention.end..attention.end + self.head.size();

        Layout {
            encoders,
            attention,
            head,
        }
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        let expected = self.num_params();
        if got != expected {
            return Err(MlError::ShapeMismatch {
                what,
                got,
                expected,
            });
        }

        Ok(())
    }

    /// Splits the attention block into the scoring vector and its bias.
    fn attention_params<'a>(&self, params: &'a [f32], range: &Range<usize>) -> (ArrayView1<'a, f32>, f32) {
        let block = &params[range.clone()];
        let (a, c) = block.split_at(self.hidden);
        (ArrayView1::from(a), c.first().copied().unwrap_or_default())
    }
}

/// Per-sample softmax over the modality scores `h_m · a + c`.
fn attention_weights(encoded: &[Array2<f32>], a: ArrayView1<f32>, c: f32) -> Array2<f32> {
    let rows = encoded.first().map_or(0, |h| h.nrows());
    let mut scores = Array2::zeros((rows, encoded.len()));

    for (k, h) in encoded.iter().enumerate() {
        scores.column_mut(k).assign(&(h.dot(&a) + c));
    }

    for mut row in scores.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }

    scores
}

impl Model for MultimodalClassifier {
    fn num_params(&self) -> usize {
        self.encoders.iter().map(Sequential::size).sum::<usize>()
            + self.attention_size()
            + self.head.size()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&mut self, params: &[f32], batch: &Batch) -> Result<Array2<f32>> {
        self.check_len("classifier parameters", params.len())?;

        let inputs = batch.inputs();
        if inputs.len() != self.encoders.len() {
            return Err(MlError::ShapeMismatch {
                what: "modalities",
                got: inputs.len(),
                expected: self.encoders.len(),
            });
        }

        let layout = self.layout();
        let mut encoded = Vec::with_capacity(inputs.len());

        for ((encoder, range), x) in self.encoders.iter_mut().zip(&layout.encoders).zip(inputs) {
            encoded.push(encoder.forward(&params[range.clone()], x.view())?);
        }

        let fused = match self.fusion {
            Fusion::Concat => {
                let views: Vec<ArrayView2<f32>> = encoded.iter().map(|h| h.view()).collect();
                concatenate(Axis(1), &views)
                    .map_err(|_| MlError::InvalidInput("modality embeddings"))?
            }
            Fusion::Attention => {
                let (a, c) = self.attention_params(params, &layout.attention);
                let weights = attention_weights(&encoded, a, c);

                let mut fused = Array2::zeros(encoded[0].raw_dim());
                for (k, h) in encoded.iter().enumerate() {
                    let w = weights.column(k).insert_axis(Axis(1));
                    fused += &(h * &w);
                }

                self.attention = weights;
                fused
            }
        };

        let logits = self.head.forward(&params[layout.head.clone()], fused.view())?;
        self.encoded = encoded;
        Ok(logits)
    }

    fn backward(&mut self, params: &[f32], d_logits: ArrayView2<f32>, grads: &mut [f32]) -> Result<()> {
        self.check_len("classifier parameters", params.len())?;
        self.check_len("classifier gradient", grads.len())?;

        if self.encoded.len() != self.encoders.len() {
            return Err(MlError::InvalidInput("backward called before forward"));
        }

        let layout = self.layout();
        let d_fused = self.head.backward(
            &params[layout.head.clone()],
            &mut grads[layout.head.clone()],
            d_logits.to_owned(),
        )?;

        let hidden = self.hidden;
        let deltas: Vec<Array2<f32>> = match self.fusion {
            Fusion::Concat => (0..self.encoders.len())
                .map(|k| d_fused.slice(s![.., k * hidden..(k + 1) * hidden]).to_owned())
                .collect(),
            Fusion::Attention => {
                let (a, _) = self.attention_params(params, &layout.attention);

                // dL/d(score_m) = alpha_m * (g·h_m - sum_k alpha_k g·h_k)
                let gh: Vec<Array1<f32>> = self
                    .encoded
                    .iter()
                    .map(|h| (&d_fused * h).sum_axis(Axis(1)))
                    .collect();

                let mut mean = Array1::<f32>::zeros(d_fused.nrows());
                for (k, g) in gh.iter().enumerate() {
                    mean += &(&self.attention.column(k) * g);
                }

                let mut da = Array1::<f32>::zeros(hidden);
                let mut dc = 0.;
                let mut deltas = Vec::with_capacity(self.encoded.len());

                for (k, h) in self.encoded.iter().enumerate() {
                    let alpha = self.attention.column(k);
                    let ds = &alpha * &(&gh[k] - &mean);

                    let mut d_h = &d_fused * &alpha.insert_axis(Axis(1));
                    d_h += &ds.view().insert_axis(Axis(1)).dot(&a.insert_axis(Axis(0)));

                    da += &h.t().dot(&ds);
                    dc += ds.sum();
                    deltas.push(d_h);
                }

                let att_grad = &mut grads[layout.attention.clone()];
                for (g, d) in att_grad.iter_mut().zip(da.iter()) {
                    *g += d;
                }
                att_grad[hidden] += dc;

                deltas
            }
        };

        for ((encoder, range), d) in self.encoders.iter_mut().zip(&layout.encoders).zip(deltas) {
            encoder.backward(&params[range.clone()], &mut grads[range.clone()], d)?;
        }

        Ok(())
    }
}
