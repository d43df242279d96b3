//! Collaborator abstraction layer for Sift.
//!
//! This module defines the traits the orchestration core talks to: encoders,
//! data loaders, datasets, optimizers, pretext objectives and classifier heads.
//! The core never inspects what sits behind them; it only calls them and moves
//! their opaque state blobs in and out of checkpoints.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error raised by an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollaboratorError {
    /// A data item could not be read or decoded.
    #[error("Data Error: {0}")]
    Data(String),

    /// The encoder rejected an input or its state blob.
    #[error("Encoder Error: {0}")]
    Encoder(String),

    /// The optimizer rejected a gradient or its state blob.
    #[error("Optimizer Error: {0}")]
    Optimizer(String),

    /// The pretext objective could not produce a loss.
    #[error("Objective Error: {0}")]
    Objective(String),

    /// Input and parameter shapes disagree.
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// The expected length.
        expected: usize,
        /// The length that was provided.
        actual: usize,
    },

    /// Other unexpected errors.
    #[error("Other Collaborator Error: {0}")]
    Other(String),
}

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// A single data item as yielded by a loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier of the item (usually its file location).
    pub path: String,
    /// Decoded input features.
    pub input: Vec<f32>,
    /// Class index, when the item is labelled.
    #[serde(default)]
    pub label: Option<usize>,
}

/// A batch of items. The batch size is the number of items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Items in loader order.
    pub items: Vec<Item>,
}

impl Batch {
    /// Creates a batch from items.
    #[must_use]
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }

    /// Number of items in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the batch holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Iterator over the batches of one pass.
pub type BatchIter<'a> = Box<dyn Iterator<Item = CollaboratorResult<Batch>> + Send + 'a>;

/// A finite, restartable sequence of batches.
///
/// Every call to [`DataLoader::batches`] starts a fresh pass.
pub trait DataLoader: Send + Sync {
    /// Starts a new pass over the data.
    fn batches(&self) -> BatchIter<'_>;

    /// Number of items a full pass yields, when known up front.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// A pool of items that can build loaders over itself or over a subset.
pub trait Dataset: Send + Sync {
    /// Identifier of the dataset (e.g. "cifar10").
    fn id(&self) -> &str;

    /// All item paths, in the pool's canonical order.
    fn paths(&self) -> Vec<String>;

    /// Number of classes, or 0 for unlabelled pools.
    fn class_count(&self) -> usize {
        0
    }

    /// Builds a loader.
    ///
    /// # Arguments
    /// * `subset` - Restrict the loader to these paths, in this order. `None` loads the whole pool.
    /// * `batch_size` - Maximum items per batch; the final batch may be smaller.
    ///
    /// # Errors
    /// Returns a `CollaboratorError` if a requested path is not part of the pool.
    fn loader(
        &self,
        subset: Option<&[String]>,
        batch_size: usize,
    ) -> CollaboratorResult<Box<dyn DataLoader>>;
}

/// The shared backbone whose representation is being learned.
pub trait Encoder: Send + Sync {
    /// Backbone identifier.
    fn id(&self) -> &str;

    /// Forward pass for a single input.
    ///
    /// # Errors
    /// Returns a `CollaboratorError` if the input shape is wrong.
    fn embed(&self, input: &[f32]) -> CollaboratorResult<Vec<f32>>;

    /// Flat view of the trainable parameters.
    fn parameters(&self) -> &[f32];

    /// Mutable flat view of the trainable parameters.
    fn parameters_mut(&mut self) -> &mut [f32];

    /// Serializes the encoder state into an opaque blob.
    ///
    /// # Errors
    /// Returns a `CollaboratorError` if serialization fails.
    fn state_dict(&self) -> CollaboratorResult<Vec<u8>>;

    /// Restores the encoder state from a blob produced by [`Encoder::state_dict`].
    ///
    /// # Errors
    /// Returns a `CollaboratorError` if the blob does not fit this encoder.
    fn load_state_dict(&mut self, state: &[u8]) -> CollaboratorResult<()>;
}

/// Gradient-descent optimizer over a flat parameter vector.
pub trait Optimizer: Send + Sync {
    /// Clears accumulated gradients.
    fn zero_grad(&mut self);

    /// Adds a gradient to the accumulator.
    ///
    /// # Errors
    /// Returns a `CollaboratorError` if the gradient length is wrong.
    fn accumulate(&mut self, gradient: &[f32]) -> CollaboratorResult<()>;

    /// Applies the accumulated gradient to `parameters`.
    ///
    /// # Errors
    /// Returns a `CollaboratorError` if the parameter length is wrong.
    fn step(&mut self, parameters: &mut [f32]) -> CollaboratorResult<()>;

    /// Current learning rate.
    fn learning_rate(&self) -> f64;

    /// Overrides the learning rate (used by schedulers).
    fn set_learning_rate(&mut self, learning_rate: f64);

    /// Serializes optimizer state (moments, step counters) into an opaque blob.
    ///
    /// # Errors
    /// Returns a `CollaboratorError` if serialization fails.
    fn state(&self) -> CollaboratorResult<Vec<u8>>;

    /// Restores optimizer state.
    ///
    /// # Errors
    /// Returns a `CollaboratorError` if the blob does not fit this optimizer.
    fn load_state(&mut self, state: &[u8]) -> CollaboratorResult<()>;
}

/// A self-supervised pretext loss.
///
/// How the loss is computed is entirely up to the implementation.
pub trait Objective: Send + Sync {
    /// Objective name, for logs.
    fn name(&self) -> &str;

    /// Mean loss over the batch and its gradient with respect to the encoder parameters.
    ///
    /// # Errors
    /// Returns a `CollaboratorError` if the batch cannot be evaluated.
    fn loss_and_gradient(
        &self,
        encoder: &dyn Encoder,
        batch: &Batch,
    ) -> CollaboratorResult<(f64, Vec<f32>)>;

    /// One loss per item, in batch order. Must not mutate the encoder.
    ///
    /// # Errors
    /// Returns a `CollaboratorError` if the batch cannot be evaluated.
    fn item_losses(&self, encoder: &dyn Encoder, batch: &Batch) -> CollaboratorResult<Vec<f64>>;
}

/// A supervised classification head trained on frozen encoder features.
pub trait ClassifierHead: Send + Sync {
    /// One gradient step on a batch of features. Returns the mean loss.
    ///
    /// # Errors
    /// Returns a `CollaboratorError` if features and labels disagree.
    fn fit_batch(
        &mut self,
        features: &[Vec<f32>],
        labels: &[usize],
        learning_rate: f64,
        weight_decay: f64,
    ) -> CollaboratorResult<f64>;

    /// Predicted class index for one feature vector.
    fn predict(&self, features: &[f32]) -> usize;
}
