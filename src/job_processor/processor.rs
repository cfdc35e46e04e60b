//! The processor capability set and its registry (section 9): a
//! `name → (settings-validator, constructor)` table, replacing the source's
//! reflection-based "processor by type name" with explicit registration.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::ConfigurationError;
use crate::model::{InstanceStorageInfo, LocalApplicationEntity};
use crate::repository::Repository;
use crate::types::AeTitle;

use super::ae_title_processor::AeTitleProcessor;

/// A processor attached to one `LocalApplicationEntity`: turns staged
/// instances into persisted `InferenceJob`s.
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;
    fn ae_title(&self) -> &AeTitle;
    /// Accepts a newly-stored instance. Synchronous: any async follow-up
    /// work (repository writes on window expiry) is spawned internally.
    fn handle_instance(&self, info: InstanceStorageInfo);
}

type Constructor = dyn Fn(LocalApplicationEntity, Arc<dyn Repository>, CancellationToken) -> Result<Arc<dyn Processor>, ConfigurationError>
    + Send
    + Sync;

pub struct ProcessorFactory {
    validate: fn(&LocalApplicationEntity) -> Result<(), ConfigurationError>,
    construct: Arc<Constructor>,
}

/// Maps a `processorName` to its validator and constructor. Unknown names
/// are rejected the same way an unrecognized setting is (section 4.4: "any
/// unrecognized key ⇒ configuration error and the LocalAE is rejected at
/// registration time" applies symmetrically to the processor name itself).
#[derive(Default)]
pub struct ProcessorRegistry {
    entries: HashMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in "AE Title Job Processor".
    pub fn with_default_processors() -> Self {
        let mut registry = Self::new();
        registry.register(
            AeTitleProcessor::PROCESSOR_NAME,
            AeTitleProcessor::validate_settings,
            |ae, repository, cancel| Ok(Arc::new(AeTitleProcessor::new(ae, repository, cancel)?)),
        );
        registry
    }

    pub fn register<F>(
        &mut self,
        name: &str,
        validate: fn(&LocalApplicationEntity) -> Result<(), ConfigurationError>,
        construct: F,
    ) where
        F: Fn(LocalApplicationEntity, Arc<dyn Repository>, CancellationToken) -> Result<Arc<dyn Processor>, ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        self.entries.insert(
            name.to_string(),
            ProcessorFactory {
                validate,
                construct: Arc::new(construct),
            },
        );
    }

    pub fn validate(&self, ae: &LocalApplicationEntity) -> Result<(), ConfigurationError> {
        let factory = self.entries.get(&ae.processor_name).ok_or_else(|| {
            ConfigurationError::Other(format!("unrecognized processor {:?}", ae.processor_name))
        })?;
        (factory.validate)(ae)
    }

    pub fn construct(
        &self,
        ae: LocalApplicationEntity,
        repository: Arc<dyn Repository>,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn Processor>, ConfigurationError> {
        let factory = self.entries.get(&ae.processor_name).ok_or_else(|| {
            ConfigurationError::Other(format!("unrecognized processor {:?}", ae.processor_name))
        })?;
        (factory.construct)(ae, repository, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn ae_with_settings(processor_name: &str, settings: Vec<(&str, &str)>) -> LocalApplicationEntity {
        LocalApplicationEntity {
            name: "test".to_string(),
            ae_title: AeTitle::from_static("CLARA1"),
            overwrite_same_instance: false,
            ignored_sop_classes: BTreeSet::new(),
            processor_name: processor_name.to_string(),
            processor_settings: settings
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_unknown_processor_name_is_rejected() {
        let registry = ProcessorRegistry::with_default_processors();
        let ae = ae_with_settings("Nonexistent Processor", vec![]);
        assert!(registry.validate(&ae).is_err());
    }

    #[test]
    fn test_default_processor_validates_with_pipeline() {
        let registry = ProcessorRegistry::with_default_processors();
        let ae = ae_with_settings("AE Title Job Processor", vec![("pipeline-a", "PID1")]);
        assert!(registry.validate(&ae).is_ok());
    }
}
