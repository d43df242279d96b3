use crate::error::{TrainingError, TrainingResult};
use crate::stage::{Method, TrainingStage};
use crate::trainer::PretextTrainer;
use std::collections::HashMap;
use std::sync::Arc;

/// Inputs handed to a trainer factory when a stage is entered.
#[derive(Debug, Clone, Copy)]
pub struct TrainerSpec {
    pub method: Method,
    pub stage: TrainingStage,
    pub log_step: usize,
}

pub type TrainerFactory = Arc<dyn Fn(&TrainerSpec) -> TrainingResult<Arc<dyn PretextTrainer>> + Send + Sync>;

/// Maps method tags to trainer constructors.
///
/// The orchestrator resolves the trainer once per stage entry instead of
/// branching on the method tag at every call site.
#[derive(Clone, Default)]
pub struct TrainerRegistry {
    factories: HashMap<Method, TrainerFactory>,
}

impl std::fmt::Debug for TrainerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainerRegistry").field("methods", &self.methods()).finish()
    }
}

impl TrainerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for `method`.
    pub fn register<F>(&mut self, method: Method, factory: F)
    where
        F: Fn(&TrainerSpec) -> TrainingResult<Arc<dyn PretextTrainer>> + Send + Sync + 'static,
    {
        self.factories.insert(method, Arc::new(factory));
    }

    #[must_use]
    pub fn contains(&self, method: Method) -> bool {
        self.factories.contains_key(&method)
    }

    /// Registered methods, sorted by tag.
    #[must_use]
    pub fn methods(&self) -> Vec<Method> {
        let mut methods: Vec<Method> = self.factories.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());
        methods
    }

    pub fn create(&self, spec: &TrainerSpec) -> TrainingResult<Arc<dyn PretextTrainer>> {
        let factory = self.factories.get(&spec.method).ok_or_else(|| {
            TrainingError::config(format!("no trainer registered for method '{}'", spec.method))
        })?;
        factory(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::PrototypeObjective;
    use crate::trainer::ObjectiveTrainer;

    fn spec(method: Method) -> TrainerSpec {
        TrainerSpec { method, stage: TrainingStage::BasePretrain, log_step: 10 }
    }

    #[test]
    fn test_unregistered_method_is_configuration_error() {
        let registry = TrainerRegistry::new();
        let err = registry.create(&spec(Method::Simclr)).err().unwrap();
        assert!(matches!(err, TrainingError::Configuration(_)));
    }

    #[test]
    fn test_create_uses_registered_factory() {
        let mut registry = TrainerRegistry::new();
        registry.register(Method::Prototype, |spec| {
            Ok(Arc::new(ObjectiveTrainer::new(spec.method, Arc::new(PrototypeObjective::new()), spec.log_step)))
        });

        assert!(registry.contains(Method::Prototype));
        assert_eq!(registry.methods(), vec![Method::Prototype]);
        let trainer = registry.create(&spec(Method::Prototype)).unwrap();
        assert_eq!(trainer.method(), Method::Prototype);
    }
}
