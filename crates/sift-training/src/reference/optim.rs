//! Flat-vector optimizers: SGD with momentum, Adam and LARS.
//!
//! All three accumulate gradients between `zero_grad` calls and apply the
//! sum on `step`. State blobs are JSON.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sift_abstraction::{CollaboratorError, CollaboratorResult, Optimizer};

const MOMENTUM: f32 = 0.9;

fn check_len(expected: usize, actual: usize) -> CollaboratorResult<()> {
    if expected != actual {
        return Err(CollaboratorError::ShapeMismatch { expected, actual });
    }
    Ok(())
}

fn add_into(acc: &mut [f32], gradient: &[f32]) -> CollaboratorResult<()> {
    check_len(acc.len(), gradient.len())?;
    for (a, g) in acc.iter_mut().zip(gradient) {
        *a += g;
    }
    Ok(())
}

fn encode<T: Serialize>(state: &T) -> CollaboratorResult<Vec<u8>> {
    serde_json::to_vec(state).map_err(|e| CollaboratorError::Optimizer(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CollaboratorResult<T> {
    serde_json::from_slice(bytes).map_err(|e| CollaboratorError::Optimizer(format!("invalid state: {e}")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sgd {
    learning_rate: f64,
    weight_decay: f64,
    velocity: Vec<f32>,
    #[serde(skip)]
    grad: Vec<f32>,
}

impl Sgd {
    #[must_use]
    pub fn new(learning_rate: f64, weight_decay: f64, parameter_count: usize) -> Self {
        Self {
            learning_rate,
            weight_decay,
            velocity: vec![0.0; parameter_count],
            grad: vec![0.0; parameter_count],
        }
    }
}

impl Optimizer for Sgd {
    fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    fn accumulate(&mut self, gradient: &[f32]) -> CollaboratorResult<()> {
        add_into(&mut self.grad, gradient)
    }

    fn step(&mut self, parameters: &mut [f32]) -> CollaboratorResult<()> {
        check_len(self.grad.len(), parameters.len())?;
        let lr = self.learning_rate as f32;
        let wd = self.weight_decay as f32;
        for ((p, v), g) in parameters.iter_mut().zip(&mut self.velocity).zip(&self.grad) {
            *v = MOMENTUM * *v + g + wd * *p;
            *p -= lr * *v;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    fn state(&self) -> CollaboratorResult<Vec<u8>> {
        encode(self)
    }

    fn load_state(&mut self, state: &[u8]) -> CollaboratorResult<()> {
        let loaded: Self = decode(state)?;
        check_len(self.velocity.len(), loaded.velocity.len())?;
        self.learning_rate = loaded.learning_rate;
        self.weight_decay = loaded.weight_decay;
        self.velocity = loaded.velocity;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f64,
    weight_decay: f64,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: Vec<f32>,
    v: Vec<f32>,
    #[serde(skip)]
    grad: Vec<f32>,
}

impl Adam {
    #[must_use]
    pub fn new(learning_rate: f64, weight_decay: f64, parameter_count: usize) -> Self {
        Self {
            learning_rate,
            weight_decay,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            m: vec![0.0; parameter_count],
            v: vec![0.0; parameter_count],
            grad: vec![0.0; parameter_count],
        }
    }

    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    fn accumulate(&mut self, gradient: &[f32]) -> CollaboratorResult<()> {
        add_into(&mut self.grad, gradient)
    }

    fn step(&mut self, parameters: &mut [f32]) -> CollaboratorResult<()> {
        check_len(self.grad.len(), parameters.len())?;
        self.t += 1;

        let t = i32::try_from(self.t).unwrap_or(i32::MAX);
        let lr_t = self.learning_rate as f32 * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t));
        let wd = self.weight_decay as f32;

        for (i, p) in parameters.iter_mut().enumerate() {
            let g = self.grad[i] + wd * *p;
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            *p -= lr_t * self.m[i] / (self.v[i].sqrt() + self.epsilon);
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    fn state(&self) -> CollaboratorResult<Vec<u8>> {
        encode(self)
    }

    fn load_state(&mut self, state: &[u8]) -> CollaboratorResult<()> {
        let loaded: Self = decode(state)?;
        check_len(self.m.len(), loaded.m.len())?;
        check_len(self.v.len(), loaded.v.len())?;
        let grad = std::mem::take(&mut self.grad);
        *self = Self { grad, ..loaded };
        Ok(())
    }
}

/// Layer-wise adaptive rate scaling over the whole parameter vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lars {
    learning_rate: f64,
    weight_decay: f64,
    trust_coefficient: f32,
    velocity: Vec<f32>,
    #[serde(skip)]
    grad: Vec<f32>,
}

impl Lars {
    #[must_use]
    pub fn new(learning_rate: f64, weight_decay: f64, parameter_count: usize) -> Self {
        Self {
            learning_rate,
            weight_decay,
            trust_coefficient: 0.001,
            velocity: vec![0.0; parameter_count],
            grad: vec![0.0; parameter_count],
        }
    }

    fn trust_ratio(&self, parameters: &[f32]) -> f32 {
        let param_norm = parameters.iter().map(|p| p * p).sum::<f32>().sqrt();
        let grad_norm = self.grad.iter().map(|g| g * g).sum::<f32>().sqrt();
        if param_norm > 0.0 && grad_norm > 0.0 {
            self.trust_coefficient * param_norm / (grad_norm + self.weight_decay as f32 * param_norm)
        } else {
            1.0
        }
    }
}

impl Optimizer for Lars {
    fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    fn accumulate(&mut self, gradient: &[f32]) -> CollaboratorResult<()> {
        add_into(&mut self.grad, gradient)
    }

    fn step(&mut self, parameters: &mut [f32]) -> CollaboratorResult<()> {
        check_len(self.grad.len(), parameters.len())?;
        let local_lr = self.learning_rate as f32 * self.trust_ratio(parameters);
        let wd = self.weight_decay as f32;
        for ((p, v), g) in parameters.iter_mut().zip(&mut self.velocity).zip(&self.grad) {
            *v = MOMENTUM * *v + local_lr * (g + wd * *p);
            *p -= *v;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    fn state(&self) -> CollaboratorResult<Vec<u8>> {
        encode(self)
    }

    fn load_state(&mut self, state: &[u8]) -> CollaboratorResult<()> {
        let loaded: Self = decode(state)?;
        check_len(self.velocity.len(), loaded.velocity.len())?;
        self.learning_rate = loaded.learning_rate;
        self.weight_decay = loaded.weight_decay;
        self.trust_coefficient = loaded.trust_coefficient;
        self.velocity = loaded.velocity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descend(optimizer: &mut dyn Optimizer, params: &mut [f32]) {
        // minimize sum(p^2); gradient is 2p
        for _ in 0..200 {
            optimizer.zero_grad();
            let gradient: Vec<f32> = params.iter().map(|p| 2.0 * p).collect();
            optimizer.accumulate(&gradient).unwrap();
            optimizer.step(params).unwrap();
        }
    }

    #[test]
    fn test_optimizers_descend() {
        let mut sgd = Sgd::new(0.05, 0.0, 2);
        let mut params = vec![1.0, -1.0];
        descend(&mut sgd, &mut params);
        assert!(params.iter().all(|p| p.abs() < 1e-2));

        let mut adam = Adam::new(0.05, 0.0, 2);
        let mut params = vec![1.0, -1.0];
        descend(&mut adam, &mut params);
        assert!(params.iter().all(|p| p.abs() < 0.1));
        assert_eq!(adam.step_count(), 200);

        let mut lars = Lars::new(1.0, 0.0, 2);
        let mut params = vec![1.0, -1.0];
        descend(&mut lars, &mut params);
        assert!(params.iter().all(|p| p.abs() < 1.0));
    }

    #[test]
    fn test_length_checks() {
        let mut sgd = Sgd::new(0.1, 0.0, 2);
        assert!(sgd.accumulate(&[1.0]).is_err());
        assert!(sgd.step(&mut [0.0; 3]).is_err());
    }

    #[test]
    fn test_state_round_trip_restores_moments() {
        let mut adam = Adam::new(0.01, 0.0, 2);
        let mut params = vec![1.0, 1.0];
        adam.accumulate(&[0.5, -0.5]).unwrap();
        adam.step(&mut params).unwrap();

        let mut restored = Adam::new(0.5, 0.0, 2);
        restored.load_state(&adam.state().unwrap()).unwrap();
        assert_eq!(restored.step_count(), 1);
        assert_eq!(restored.learning_rate(), 0.01);

        let mut wrong = Adam::new(0.5, 0.0, 3);
        assert!(wrong.load_state(&adam.state().unwrap()).is_err());
    }
}
