//! # Step Registry
//!
//! Explicit step-name to runner mapping. The registry is assembled with a
//! builder at start-up and is read-only afterwards, so lookups need no locking.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use super::PartitionRunner;
use crate::error::{BatchError, BatchResult};

#[derive(Clone, Default)]
pub struct StepRegistry {
    runners: Arc<HashMap<String, Arc<dyn PartitionRunner>>>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.step_names())
            .finish()
    }
}

impl StepRegistry {
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::default()
    }

    pub fn get(&self, step_name: &str) -> Option<Arc<dyn PartitionRunner>> {
        self.runners.get(step_name).cloned()
    }

    /// Fails with `UnknownStep` when nothing is registered under `step_name`
    pub fn resolve(&self, step_name: &str) -> BatchResult<Arc<dyn PartitionRunner>> {
        self.get(step_name)
            .ok_or_else(|| BatchError::UnknownStep(step_name.to_string()))
    }

    pub fn contains(&self, step_name: &str) -> bool {
        self.runners.contains_key(step_name)
    }

    pub fn step_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.runners.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

#[derive(Default)]
pub struct StepRegistryBuilder {
    runners: HashMap<String, Arc<dyn PartitionRunner>>,
}

impl StepRegistryBuilder {
    pub fn register(mut self, step_name: impl Into<String>, runner: Arc<dyn PartitionRunner>) -> Self {
        let step_name = step_name.into();
        if self.runners.insert(step_name.clone(), runner).is_some() {
            warn!(step_name = %step_name, "Runner already registered, replacing");
        }
        self
    }

    pub fn build(self) -> StepRegistry {
        info!(steps = self.runners.len(), "Step registry built");
        StepRegistry {
            runners: Arc::new(self.runners),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PartitionBounds;
    use crate::runner::{RunSummary, RunnerError};
    use async_trait::async_trait;

    struct CountingRunner(i64);

    #[async_trait]
    impl PartitionRunner for CountingRunner {
        async fn run(&self, _: i64, bounds: PartitionBounds) -> Result<RunSummary, RunnerError> {
            let rows = bounds.len() as i64 * self.0;
            Ok(RunSummary::new(rows, rows))
        }
    }

    #[tokio::test]
    async fn test_resolve_registered_step() {
        let registry = StepRegistry::builder()
            .register("slaveStep", Arc::new(CountingRunner(1)))
            .build();

        assert!(registry.contains("slaveStep"));
        assert_eq!(registry.len(), 1);
        let runner = registry.resolve("slaveStep").unwrap();
        let summary = runner.run(1, PartitionBounds::new(1, 10)).await.unwrap();
        assert_eq!(summary, RunSummary::new(10, 10));
    }

    #[test]
    fn test_unknown_step() {
        let registry = StepRegistry::builder()
            .register("slaveStep", Arc::new(CountingRunner(1)))
            .build();
        assert!(matches!(
            registry.resolve("otherStep"),
            Err(BatchError::UnknownStep(name)) if name == "otherStep"
        ));
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = StepRegistry::builder()
            .register("b", Arc::new(CountingRunner(1)))
            .register("a", Arc::new(CountingRunner(1)))
            .register("b", Arc::new(CountingRunner(2)))
            .build();
        assert_eq!(registry.step_names(), vec!["a".to_string(), "b".to_string()]);
    }
}
