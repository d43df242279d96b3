use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sift_abstraction::{Batch, ClassifierHead, CollaboratorError, CollaboratorResult, Encoder, Objective};

/// Encoder with a single learned prototype: `embed(x) = x - p`.
#[derive(Debug, Clone, PartialEq)]
pub struct PrototypeEncoder {
    id: String,
    prototype: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct EncoderState {
    id: String,
    prototype: Vec<f32>,
}

impl PrototypeEncoder {
    /// Prototype drawn uniformly from `[-0.1, 0.1)` with a seeded generator.
    #[must_use]
    pub fn new(id: impl Into<String>, dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let prototype = (0..dim).map(|_| rng.gen_range(-0.1_f32..0.1)).collect();
        Self { id: id.into(), prototype }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.prototype.len()
    }
}

impl Encoder for PrototypeEncoder {
    fn id(&self) -> &str {
        &self.id
    }

    fn embed(&self, input: &[f32]) -> CollaboratorResult<Vec<f32>> {
        if input.len() != self.prototype.len() {
            return Err(CollaboratorError::ShapeMismatch { expected: self.prototype.len(), actual: input.len() });
        }
        Ok(input.iter().zip(&self.prototype).map(|(x, p)| x - p).collect())
    }

    fn parameters(&self) -> &[f32] {
        &self.prototype
    }

    fn parameters_mut(&mut self) -> &mut [f32] {
        &mut self.prototype
    }

    fn state_dict(&self) -> CollaboratorResult<Vec<u8>> {
        let state = EncoderState { id: self.id.clone(), prototype: self.prototype.clone() };
        serde_json::to_vec(&state).map_err(|e| CollaboratorError::Encoder(e.to_string()))
    }

    fn load_state_dict(&mut self, state: &[u8]) -> CollaboratorResult<()> {
        let state: EncoderState =
            serde_json::from_slice(state).map_err(|e| CollaboratorError::Encoder(format!("invalid state: {e}")))?;
        if state.prototype.len() != self.prototype.len() {
            return Err(CollaboratorError::ShapeMismatch {
                expected: self.prototype.len(),
                actual: state.prototype.len(),
            });
        }
        self.prototype = state.prototype;
        Ok(())
    }
}

/// Mean squared distance of each item's embedding from zero, scaled by the
/// embedding width. Items far from the prototype score high.
#[derive(Debug, Clone, Default)]
pub struct PrototypeObjective;

impl PrototypeObjective {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn item_loss(embedding: &[f32]) -> f64 {
        if embedding.is_empty() {
            return 0.0;
        }
        let sum: f64 = embedding.iter().map(|v| f64::from(*v) * f64::from(*v)).sum();
        sum / embedding.len() as f64
    }
}

impl Objective for PrototypeObjective {
    fn name(&self) -> &str {
        "prototype"
    }

    fn loss_and_gradient(&self, encoder: &dyn Encoder, batch: &Batch) -> CollaboratorResult<(f64, Vec<f32>)> {
        let dim = encoder.parameters().len();
        let mut gradient = vec![0.0_f32; dim];
        if batch.is_empty() {
            return Ok((0.0, gradient));
        }

        let n = batch.len() as f32;
        let scale = -2.0 / (dim.max(1) as f32 * n);
        let mut total = 0.0;
        for item in &batch.items {
            let embedding = encoder.embed(&item.input)?;
            total += Self::item_loss(&embedding);
            // d/dp of |x - p|^2 / d is -2 (x - p) / d
            for (g, e) in gradient.iter_mut().zip(&embedding) {
                *g += scale * e;
            }
        }
        Ok((total / batch.len() as f64, gradient))
    }

    fn item_losses(&self, encoder: &dyn Encoder, batch: &Batch) -> CollaboratorResult<Vec<f64>> {
        batch.items.iter().map(|item| encoder.embed(&item.input).map(|e| Self::item_loss(&e))).collect()
    }
}

/// Linear softmax classifier trained with cross-entropy.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxHead {
    dim: usize,
    classes: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl SoftmaxHead {
    #[must_use]
    pub fn new(dim: usize, classes: usize) -> Self {
        Self { dim, classes, weights: vec![0.0; dim * classes], bias: vec![0.0; classes] }
    }

    fn logits(&self, features: &[f32]) -> Vec<f32> {
        (0..self.classes)
            .map(|c| {
                let row = &self.weights[c * self.dim..(c + 1) * self.dim];
                row.iter().zip(features).map(|(w, x)| w * x).sum::<f32>() + self.bias[c]
            })
            .collect()
    }

    fn softmax(logits: &[f32]) -> Vec<f32> {
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        exps.into_iter().map(|e| e / sum).collect()
    }
}

impl ClassifierHead for SoftmaxHead {
    fn fit_batch(
        &mut self,
        features: &[Vec<f32>],
        labels: &[usize],
        learning_rate: f64,
        weight_decay: f64,
    ) -> CollaboratorResult<f64> {
        if features.len() != labels.len() {
            return Err(CollaboratorError::ShapeMismatch { expected: features.len(), actual: labels.len() });
        }
        if features.is_empty() {
            return Ok(0.0);
        }

        let mut grad_w = vec![0.0_f32; self.weights.len()];
        let mut grad_b = vec![0.0_f32; self.classes];
        let mut loss = 0.0_f64;

        for (x, &label) in features.iter().zip(labels) {
            if x.len() != self.dim {
                return Err(CollaboratorError::ShapeMismatch { expected: self.dim, actual: x.len() });
            }
            if label >= self.classes {
                return Err(CollaboratorError::Data(format!("label {label} out of range for {} classes", self.classes)));
            }

            let probs = Self::softmax(&self.logits(x));
            loss -= f64::from(probs[label].max(f32::MIN_POSITIVE).ln());

            for c in 0..self.classes {
                let delta = probs[c] - if c == label { 1.0 } else { 0.0 };
                grad_b[c] += delta;
                for (g, xi) in grad_w[c * self.dim..(c + 1) * self.dim].iter_mut().zip(x) {
                    *g += delta * xi;
                }
            }
        }

        let n = features.len() as f32;
        let lr = learning_rate as f32;
        let wd = weight_decay as f32;
        for (w, g) in self.weights.iter_mut().zip(&grad_w) {
            *w -= lr * (g / n + wd * *w);
        }
        for (b, g) in self.bias.iter_mut().zip(&grad_b) {
            *b -= lr * g / n;
        }

        Ok(loss / features.len() as f64)
    }

    fn predict(&self, features: &[f32]) -> usize {
        self.logits(features)
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(idx, _)| idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_abstraction::Item;

    fn item(path: &str, input: Vec<f32>) -> Item {
        Item { path: path.to_string(), input, label: None }
    }

    #[test]
    fn test_encoder_is_seeded() {
        let a = PrototypeEncoder::new("prototype", 8, 3);
        let b = PrototypeEncoder::new("prototype", 8, 3);
        let c = PrototypeEncoder::new("prototype", 8, 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.parameters().iter().all(|p| (-0.1..0.1).contains(p)));
    }

    #[test]
    fn test_encoder_state_round_trip() {
        let trained = PrototypeEncoder::new("prototype", 4, 1);
        let mut fresh = PrototypeEncoder::new("prototype", 4, 2);
        fresh.load_state_dict(&trained.state_dict().unwrap()).unwrap();
        assert_eq!(fresh, trained);

        let mut narrow = PrototypeEncoder::new("prototype", 2, 2);
        assert!(narrow.load_state_dict(&trained.state_dict().unwrap()).is_err());
    }

    #[test]
    fn test_objective_gradient_moves_prototype_toward_data() {
        let mut encoder = PrototypeEncoder::new("prototype", 2, 0);
        encoder.parameters_mut().copy_from_slice(&[0.0, 0.0]);
        let batch = Batch::new(vec![item("a", vec![1.0, 1.0]), item("b", vec![3.0, 1.0])]);

        let objective = PrototypeObjective::new();
        let (loss, gradient) = objective.loss_and_gradient(&encoder, &batch).unwrap();

        // item losses 1.0 and 5.0
        assert!((loss - 3.0).abs() < 1e-9);
        assert_eq!(gradient, vec![-2.0, -1.0]);
        assert_eq!(objective.item_losses(&encoder, &batch).unwrap(), vec![1.0, 5.0]);
    }

    #[test]
    fn test_softmax_head_learns_separable_data() {
        let mut head = SoftmaxHead::new(2, 2);
        let features = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let labels = vec![0, 1];

        let first = head.fit_batch(&features, &labels, 0.5, 0.0).unwrap();
        let mut last = first;
        for _ in 0..50 {
            last = head.fit_batch(&features, &labels, 0.5, 0.0).unwrap();
        }

        assert!(last < first);
        assert_eq!(head.predict(&[1.0, 0.0]), 0);
        assert_eq!(head.predict(&[0.0, 1.0]), 1);
        assert!(head.fit_batch(&features, &[0], 0.5, 0.0).is_err());
    }
}
