//! Per-epoch learning rate schedules.

use sift_abstraction::Optimizer;
use std::f64::consts::PI;

pub trait LrScheduler: Send + Sync {
    /// Learning rate for the current epoch.
    fn learning_rate(&self) -> f64;

    /// Advance one epoch.
    fn step(&mut self);

    fn apply(&self, optimizer: &mut dyn Optimizer) {
        optimizer.set_learning_rate(self.learning_rate());
    }
}

/// Cosine decay from `lr_max` to `lr_min` over `total` epochs:
/// `lr_t = lr_min + 0.5 * (lr_max - lr_min) * (1 + cos(pi * t / T))`.
#[derive(Debug, Clone, PartialEq)]
pub struct CosineAnnealing {
    lr_max: f64,
    lr_min: f64,
    total: u32,
    current: u32,
}

impl CosineAnnealing {
    #[must_use]
    pub fn new(lr_max: f64, total: u32) -> Self {
        Self { lr_max, lr_min: 0.0, total, current: 0 }
    }

    /// Fast-forwards to `epoch`, used when a stage resumes from a checkpoint.
    #[must_use]
    pub fn starting_at(mut self, epoch: u32) -> Self {
        self.current = epoch.min(self.total);
        self
    }

    #[must_use]
    pub fn epoch(&self) -> u32 {
        self.current
    }
}

impl LrScheduler for CosineAnnealing {
    fn learning_rate(&self) -> f64 {
        if self.total == 0 || self.current >= self.total {
            return self.lr_min;
        }
        let progress = f64::from(self.current) / f64::from(self.total);
        self.lr_min + (self.lr_max - self.lr_min) * 0.5 * (1.0 + (PI * progress).cos())
    }

    fn step(&mut self) {
        self.current = self.current.saturating_add(1);
    }
}
