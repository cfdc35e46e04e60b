//! ApplicationEntityChangeBus (section 2 item 4): the only path through
//! which a `LocalApplicationEntity` is added, updated, or deleted. Callers
//! that mutate LocalAE configuration go through `add`/`update`/`delete`
//! here rather than the `Repository` directly, so every subscriber
//! (notably the DIMSE listener's per-AE handler teardown) learns about the
//! change at the same time it is persisted.

use crate::model::LocalApplicationEntity;
use crate::notification_bus::{Bus, Subscription};
use crate::repository::Repository;
use crate::types::AeTitle;

#[derive(Debug, Clone)]
pub enum AeChangeEvent {
    Added(LocalApplicationEntity),
    Updated(LocalApplicationEntity),
    Deleted(AeTitle),
}

#[derive(Default)]
pub struct ApplicationEntityChangeBus {
    bus: Bus<AeChangeEvent>,
}

impl ApplicationEntityChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription<AeChangeEvent>
    where
        F: Fn(&AeChangeEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn publish_added(&self, ae: LocalApplicationEntity) {
        self.bus.publish(&AeChangeEvent::Added(ae));
    }

    pub fn publish_updated(&self, ae: LocalApplicationEntity) {
        self.bus.publish(&AeChangeEvent::Updated(ae));
    }

    pub fn publish_deleted(&self, ae_title: AeTitle) {
        self.bus.publish(&AeChangeEvent::Deleted(ae_title));
    }

    /// Persists `ae` as a new LocalAE, then publishes `Added`.
    pub async fn add(&self, repository: &dyn Repository, ae: LocalApplicationEntity) -> anyhow::Result<()> {
        repository.put_local_ae(ae.clone()).await?;
        self.publish_added(ae);
        Ok(())
    }

    /// Persists changed settings for an existing LocalAE, then publishes
    /// `Updated`.
    pub async fn update(&self, repository: &dyn Repository, ae: LocalApplicationEntity) -> anyhow::Result<()> {
        repository.put_local_ae(ae.clone()).await?;
        self.publish_updated(ae);
        Ok(())
    }

    /// Removes a LocalAE, then publishes `Deleted` so every subscriber
    /// (e.g. the DIMSE listener's `AeHandlerEntry` map) tears its
    /// per-AE state down.
    pub async fn delete(&self, repository: &dyn Repository, ae_title: AeTitle) -> anyhow::Result<()> {
        repository.delete_local_ae(&ae_title).await?;
        self.publish_deleted(ae_title);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::FakeRepository;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ae(ae_title: &str) -> LocalApplicationEntity {
        LocalApplicationEntity {
            name: "test".to_string(),
            ae_title: AeTitle::from(ae_title.to_string()),
            overwrite_same_instance: false,
            ignored_sop_classes: BTreeSet::new(),
            processor_name: "AE Title Job Processor".to_string(),
            processor_settings: vec![("pipeline-a".to_string(), "PID1".to_string())],
        }
    }

    #[tokio::test]
    async fn test_delete_persists_and_publishes() {
        let repository = FakeRepository::new();
        let bus = ApplicationEntityChangeBus::new();
        repository.put_local_ae(ae("CLARA1")).await.unwrap();

        let deleted = Arc::new(AtomicUsize::new(0));
        let deleted_in_callback = Arc::clone(&deleted);
        let _sub = bus.subscribe(move |event| {
            if let AeChangeEvent::Deleted(ae_title) = event {
                assert_eq!(ae_title.as_str(), "CLARA1");
                deleted_in_callback.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.delete(&repository, AeTitle::from_static("CLARA1")).await.unwrap();

        assert_eq!(deleted.load(Ordering::SeqCst), 1);
        assert!(repository.get_local_ae(&AeTitle::from_static("CLARA1")).await.unwrap().is_none());
    }
}
